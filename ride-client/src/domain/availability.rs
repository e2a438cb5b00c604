//! Driver availability snapshot.

use serde::{Deserialize, Serialize};

use super::geo::GeoPoint;

/// The backend's view of a driver's availability, returned by presence
/// pings and pushed into the availability store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySnapshot {
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_available_for_trips: bool,
    /// Reason the driver cannot take trips (documents pending, suspended),
    /// `None` when nothing blocks them.
    #[serde(default)]
    pub availability_reason: Option<String>,
    #[serde(default)]
    pub current_trip_id: Option<String>,
    #[serde(default)]
    pub last_location: Option<GeoPoint>,
    #[serde(default)]
    pub last_location_timestamp: Option<String>,
}

impl AvailabilitySnapshot {
    /// A driver is matchable when they are online, open for trips, not
    /// blocked, and not already on a trip.
    pub fn is_matchable(&self) -> bool {
        self.is_online
            && self.is_available_for_trips
            && self.availability_reason.is_none()
            && self.current_trip_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matchable_requires_all_conditions() {
        let mut snap = AvailabilitySnapshot {
            is_online: true,
            is_available_for_trips: true,
            ..Default::default()
        };
        assert!(snap.is_matchable());

        snap.availability_reason = Some("documents_pending".into());
        assert!(!snap.is_matchable());

        snap.availability_reason = None;
        snap.current_trip_id = Some("trip-1".into());
        assert!(!snap.is_matchable());

        snap.current_trip_id = None;
        snap.is_online = false;
        assert!(!snap.is_matchable());
    }
}
