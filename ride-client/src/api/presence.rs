//! Presence ping client.
//!
//! Drivers and passengers report their position to different endpoints
//! but with the same body shape: an optional position plus the provider
//! timestamp. A heartbeat is a ping without a position.

use serde::{Deserialize, Serialize};

use crate::domain::{AvailabilitySnapshot, GeoPoint};

use super::error::{ApiError, Envelope, read_json};

/// Presence ping body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    /// RFC 3339. For heartbeats this is "now"; for moves it is the
    /// sample's provider timestamp.
    pub reported_at: String,
}

impl LocationPing {
    pub fn heartbeat(reported_at: String) -> Self {
        Self {
            lat: None,
            lng: None,
            accuracy_meters: None,
            reported_at,
        }
    }

    pub fn at(lat: f64, lng: f64, accuracy_meters: Option<f64>, reported_at: String) -> Self {
        Self {
            lat: Some(lat),
            lng: Some(lng),
            accuracy_meters,
            reported_at,
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }
}

/// What the backend echoes back after a ping. Drivers get availability
/// fields; passengers get their updated stored location. Fields absent
/// from the response stay at their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceAck {
    #[serde(default)]
    pub current_location: Option<GeoPoint>,
    #[serde(flatten)]
    pub availability: AvailabilitySnapshot,
}

/// Presence reporting seam consumed by the reporter.
pub trait PresenceApi: Send + Sync + 'static {
    fn ping(&self, body: LocationPing) -> impl Future<Output = Result<PresenceAck, ApiError>> + Send;
}

/// Which presence endpoint this client reports to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceRole {
    Driver,
    Passenger,
}

impl PresenceRole {
    fn path(&self) -> &'static str {
        match self {
            PresenceRole::Driver => "/drivers/availability/ping",
            PresenceRole::Passenger => "/passengers/location/ping",
        }
    }
}

/// HTTP implementation of [`PresenceApi`].
#[derive(Debug, Clone)]
pub struct HttpPresenceClient {
    http: reqwest::Client,
    base_url: String,
    role: PresenceRole,
}

impl HttpPresenceClient {
    pub fn new(
        base_url: impl Into<String>,
        role: PresenceRole,
        timeout_secs: u64,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            role,
        })
    }
}

impl PresenceApi for HttpPresenceClient {
    async fn ping(&self, body: LocationPing) -> Result<PresenceAck, ApiError> {
        let url = format!("{}{}", self.base_url, self.role.path());
        let response = self.http.post(&url).json(&body).send().await?;
        let envelope: Envelope<PresenceAck> = read_json(response, "presence-ping").await?;
        envelope.into_data("presence-ping")
    }
}
