//! Presence reporting.
//!
//! `PresenceReporter` turns the filtered location stream into meaningful
//! position reports (move + heartbeat triggers, client-side throttling);
//! `AvailabilityStore` plus the auto-lifecycle helpers drive the driver
//! variant's running state from the backend's matchable predicate.

mod availability;
mod reporter;

pub use availability::{AvailabilityStore, attach_auto_lifecycle, forward_acks_to_store};
pub use reporter::{PresenceReporter, ReporterProfile};
