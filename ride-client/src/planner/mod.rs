//! Interactive trip planning.
//!
//! `PlannerStore` holds the reactive planning state and its invalidation
//! rules, `PlanCache` persists the chosen endpoints across launches, and
//! `TripPlannerEngine` keeps the state consistent with the geocoding,
//! routing, and pricing collaborators.

mod cache;
mod engine;
mod state;

pub use cache::{CachedEntry, PlanCache, PlanCacheError, PlanSlot};
pub use engine::{EngineConfig, PlannerError, TripPlannerEngine};
pub use state::{PlannerState, PlannerStore};
