//! Domain types for the ride-hailing client core.
//!
//! These are the validated data shapes shared by the session, planner,
//! location, and presence layers. They carry no I/O; everything here is
//! constructible and testable without a network.

pub mod claims;

mod availability;
mod catalog;
mod fare;
mod geo;
mod place;
mod profile;
mod route;

pub use availability::AvailabilitySnapshot;
pub use catalog::{
    ServiceClass, ServiceClassDto, VehicleCategory, VehicleCategoryDto, map_service_classes,
    map_vehicle_categories,
};
pub use fare::{DEFAULT_CURRENCY, EstimateRequest, FareBreakdown, FareQuote};
pub use geo::{GeoBounds, GeoPoint, GeoSample, LatLng, is_coord_like, rounded_key};
pub use place::PlaceSuggestion;
pub use profile::Profile;
pub use route::RouteSummary;
