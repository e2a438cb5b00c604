//! Fare estimation types.

use serde::{Deserialize, Serialize};

use super::geo::LatLng;

/// Default currency for fare estimation.
pub const DEFAULT_CURRENCY: &str = "CUP";

/// Request body for a fare estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRequest {
    pub vehicle_category_id: String,
    pub service_class_id: String,
    pub pickup: LatLng,
    pub stops: Vec<LatLng>,
    pub currency: String,
}

/// Itemized fare components as the backend returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub distance_km_est: f64,
    pub duration_min_est: f64,
    pub base_fare: f64,
    pub min_fare: f64,
    pub cost_per_km: f64,
    pub cost_per_minute: f64,
    pub subtotal: f64,
    pub total: f64,
    pub surge_multiplier: f64,
}

/// A fare quote for the currently planned trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareQuote {
    pub currency: String,
    pub surge_multiplier: f64,
    pub total_estimated: f64,
    pub breakdown: FareBreakdown,
}
