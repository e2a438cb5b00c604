//! Ride backend client: catalog, fare estimation, trip creation.

use serde::{Deserialize, Serialize};

use crate::domain::{
    EstimateRequest, FareQuote, LatLng, ServiceClass, ServiceClassDto, VehicleCategory,
    VehicleCategoryDto, map_service_classes, map_vehicle_categories,
};

use super::error::{ApiError, Envelope, read_json};

/// Payment modes accepted by trip creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Cash,
    Card,
    Wallet,
}

/// One stop in a trip creation payload.
#[derive(Debug, Clone, Serialize)]
pub struct TripStop {
    pub point: LatLng,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Trip creation payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    pub passenger_id: String,
    pub payment_mode: PaymentMode,
    pub pickup_point: LatLng,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    pub stops: Vec<TripStop>,
    pub vehicle_category_id: String,
    pub service_class_id: String,
    /// Generated per attempt; lets the backend collapse retries.
    pub idempotency_key: String,
}

/// Created trip, as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripResponse {
    pub id: String,
    pub passenger_id: String,
    #[serde(default)]
    pub pickup_address: Option<String>,
}

/// Catalog and trip operations consumed by the trip planner engine.
pub trait RideApi: Send + Sync + 'static {
    fn vehicle_categories(
        &self,
    ) -> impl Future<Output = Result<Vec<VehicleCategory>, ApiError>> + Send;

    fn service_classes(&self) -> impl Future<Output = Result<Vec<ServiceClass>, ApiError>> + Send;

    fn estimate(
        &self,
        req: EstimateRequest,
    ) -> impl Future<Output = Result<FareQuote, ApiError>> + Send;

    fn create_trip(
        &self,
        req: CreateTripRequest,
    ) -> impl Future<Output = Result<TripResponse, ApiError>> + Send;
}

/// Configuration for the HTTP ride client.
#[derive(Debug, Clone)]
pub struct RideConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl RideConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: 30,
        }
    }
}

/// HTTP implementation of [`RideApi`].
#[derive(Debug, Clone)]
pub struct HttpRideClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRideClient {
    pub fn new(config: RideConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl RideApi for HttpRideClient {
    async fn vehicle_categories(&self) -> Result<Vec<VehicleCategory>, ApiError> {
        let url = self.url("/vehicle-categories");
        let response = self.http.get(&url).send().await?;
        let envelope: Envelope<Vec<VehicleCategoryDto>> =
            read_json(response, "vehicle-categories").await?;
        Ok(map_vehicle_categories(
            envelope.into_data("vehicle-categories")?,
        ))
    }

    async fn service_classes(&self) -> Result<Vec<ServiceClass>, ApiError> {
        let url = self.url("/vehicle-service-classes");
        let response = self.http.get(&url).send().await?;
        let envelope: Envelope<Vec<ServiceClassDto>> =
            read_json(response, "service-classes").await?;
        Ok(map_service_classes(envelope.into_data("service-classes")?))
    }

    async fn estimate(&self, req: EstimateRequest) -> Result<FareQuote, ApiError> {
        let url = self.url("/trips/estimate");
        let response = self.http.post(&url).json(&req).send().await?;
        let envelope: Envelope<FareQuote> = read_json(response, "estimate").await?;
        envelope.into_data("estimate")
    }

    async fn create_trip(&self, req: CreateTripRequest) -> Result<TripResponse, ApiError> {
        let url = self.url("/trips");
        let response = self.http.post(&url).json(&req).send().await?;
        let envelope: Envelope<TripResponse> = read_json(response, "create-trip").await?;
        envelope.into_data("create-trip")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_trip_omits_absent_addresses() {
        let req = CreateTripRequest {
            passenger_id: "u-1".into(),
            payment_mode: PaymentMode::Cash,
            pickup_point: LatLng::new(20.02, -75.82),
            pickup_address: None,
            stops: vec![TripStop {
                point: LatLng::new(20.0, -75.8),
                address: Some("Parque Céspedes".into()),
            }],
            vehicle_category_id: "car".into(),
            service_class_id: "standard".into(),
            idempotency_key: "k-1".into(),
        };

        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("pickupAddress").is_none());
        assert_eq!(json["paymentMode"], "cash");
        assert_eq!(json["stops"][0]["address"], "Parque Céspedes");
    }
}
