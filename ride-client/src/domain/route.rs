//! Route summaries produced by the directions provider.

use serde::{Deserialize, Serialize};

use super::geo::LatLng;

/// A computed driving route between two points.
///
/// `distance_km` is rounded to 0.1 km and `duration_min` to whole minutes
/// when the summary is built, so equal routes compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub origin: LatLng,
    pub destination: LatLng,
    pub origin_label: Option<String>,
    pub destination_label: Option<String>,
    pub distance_km: f64,
    pub duration_min: u32,
    /// Route path as a polyline of `[lng, lat]` coordinates.
    pub geometry: Vec<[f64; 2]>,
}
