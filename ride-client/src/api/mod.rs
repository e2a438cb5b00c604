//! Backend and provider API clients.
//!
//! Each external collaborator gets a trait seam (so the orchestration
//! layers can be tested against mocks) plus a reqwest implementation.
//! Every failure is normalized into [`ApiError`] before it leaves this
//! module.

mod auth;
mod error;
mod maps;
mod presence;
mod ride;

#[cfg(test)]
pub mod mock;

pub use auth::{AuthApi, AuthConfig, AuthTokens, HttpAuthClient, LoginRequest, SessionKind};
pub use error::{ApiError, Envelope, normalize_error, read_json};
pub use maps::{
    HttpMapsClient, MapsApi, MapsConfig, ReverseResult, RouteResult, SearchOptions,
};
pub use presence::{
    HttpPresenceClient, LocationPing, PresenceAck, PresenceApi, PresenceRole,
};
pub use ride::{
    CreateTripRequest, HttpRideClient, PaymentMode, RideApi, RideConfig, TripResponse, TripStop,
};
