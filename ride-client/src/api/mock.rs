//! In-memory API mocks for tests.
//!
//! Each mock mirrors its live client's interface, records calls, and
//! serves scripted responses, so session/planner/presence logic can be
//! exercised without a network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::domain::{
    EstimateRequest, FareBreakdown, FareQuote, LatLng, PlaceSuggestion, Profile, ServiceClass,
    VehicleCategory,
};

use super::auth::{AuthApi, AuthTokens, LoginRequest, SessionKind};
use super::error::ApiError;
use super::maps::{MapsApi, ReverseResult, RouteResult, SearchOptions};
use super::presence::{LocationPing, PresenceAck, PresenceApi};
use super::ride::{CreateTripRequest, RideApi, TripResponse};

/// Scripted tokens helper.
pub fn tokens(access: &str, expires_at: Option<i64>, refresh: Option<&str>) -> AuthTokens {
    AuthTokens {
        access_token: access.to_string(),
        access_token_expires_at: expires_at,
        access_token_expires_in: None,
        refresh_token: refresh.map(str::to_string),
        session_kind: refresh.map(|_| SessionKind::BodyToken),
    }
}

/// Scripted fare helper.
pub fn fare(total: f64) -> FareQuote {
    FareQuote {
        currency: "CUP".to_string(),
        surge_multiplier: 1.0,
        total_estimated: total,
        breakdown: FareBreakdown {
            distance_km_est: 5.0,
            duration_min_est: 12.0,
            base_fare: 100.0,
            min_fare: 150.0,
            cost_per_km: 40.0,
            cost_per_minute: 5.0,
            subtotal: total,
            total,
            surge_multiplier: 1.0,
        },
    }
}

/// Mock [`AuthApi`].
pub struct MockAuthApi {
    pub login_responses: Mutex<VecDeque<Result<AuthTokens, ApiError>>>,
    pub refresh_responses: Mutex<VecDeque<Result<AuthTokens, ApiError>>>,
    pub profile_responses: Mutex<VecDeque<Result<Profile, ApiError>>>,
    pub logout_result: Mutex<Result<(), ApiError>>,
    /// Artificial latency for refresh calls, to open overlap windows.
    pub refresh_delay: Mutex<Duration>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    /// `(had_body_token, use_cookie)` per refresh call.
    pub refresh_args: Mutex<Vec<(bool, bool)>>,
}

impl Default for MockAuthApi {
    fn default() -> Self {
        Self {
            login_responses: Mutex::new(VecDeque::new()),
            refresh_responses: Mutex::new(VecDeque::new()),
            profile_responses: Mutex::new(VecDeque::new()),
            logout_result: Mutex::new(Ok(())),
            refresh_delay: Mutex::new(Duration::ZERO),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_args: Mutex::new(Vec::new()),
        }
    }
}

impl MockAuthApi {
    pub fn push_login(&self, result: Result<AuthTokens, ApiError>) {
        self.login_responses.lock().unwrap().push_back(result);
    }

    pub fn push_refresh(&self, result: Result<AuthTokens, ApiError>) {
        self.refresh_responses.lock().unwrap().push_back(result);
    }

    pub fn push_profile(&self, result: Result<Profile, ApiError>) {
        self.profile_responses.lock().unwrap().push_back(result);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<Result<T, ApiError>>>) -> Result<T, ApiError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("mock: nothing scripted".to_string())))
    }
}

impl AuthApi for MockAuthApi {
    async fn login(&self, _req: LoginRequest) -> Result<AuthTokens, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.login_responses)
    }

    async fn refresh(
        &self,
        refresh_token: Option<String>,
        use_cookie: bool,
    ) -> Result<AuthTokens, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_args
            .lock()
            .unwrap()
            .push((refresh_token.is_some(), use_cookie));
        let delay = *self.refresh_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        Self::next(&self.refresh_responses)
    }

    async fn logout(&self, _refresh_token: Option<String>) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_result.lock().unwrap().clone()
    }

    async fn fetch_profile(&self, _use_cookie: bool) -> Result<Profile, ApiError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.profile_responses)
    }
}

/// Mock [`MapsApi`].
pub struct MockMapsApi {
    pub search_responses: Mutex<VecDeque<Result<Vec<PlaceSuggestion>, ApiError>>>,
    pub reverse_responses: Mutex<VecDeque<Result<Option<ReverseResult>, ApiError>>>,
    pub route_responses: Mutex<VecDeque<Result<RouteResult, ApiError>>>,
    pub search_calls: Mutex<Vec<(String, bool, Option<LatLng>)>>,
    pub reverse_calls: AtomicUsize,
    pub route_calls: AtomicUsize,
}

impl Default for MockMapsApi {
    fn default() -> Self {
        Self {
            search_responses: Mutex::new(VecDeque::new()),
            reverse_responses: Mutex::new(VecDeque::new()),
            route_responses: Mutex::new(VecDeque::new()),
            search_calls: Mutex::new(Vec::new()),
            reverse_calls: AtomicUsize::new(0),
            route_calls: AtomicUsize::new(0),
        }
    }
}

impl MockMapsApi {
    pub fn push_search(&self, result: Result<Vec<PlaceSuggestion>, ApiError>) {
        self.search_responses.lock().unwrap().push_back(result);
    }

    pub fn push_reverse(&self, result: Result<Option<ReverseResult>, ApiError>) {
        self.reverse_responses.lock().unwrap().push_back(result);
    }

    pub fn push_route(&self, result: Result<RouteResult, ApiError>) {
        self.route_responses.lock().unwrap().push_back(result);
    }

    /// A plausible short route between the given endpoints.
    pub fn simple_route() -> RouteResult {
        RouteResult {
            distance_km: 4.27,
            duration_min: 11.6,
            geometry: vec![[-75.82, 20.02], [-75.8, 20.0]],
        }
    }
}

impl MapsApi for MockMapsApi {
    async fn search(
        &self,
        query: String,
        opts: SearchOptions,
    ) -> Result<Vec<PlaceSuggestion>, ApiError> {
        self.search_calls
            .lock()
            .unwrap()
            .push((query, opts.clamp_to_province, opts.proximity));
        self.search_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn reverse(
        &self,
        _point: LatLng,
        _clamp_to_province: bool,
    ) -> Result<Option<ReverseResult>, ApiError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        self.reverse_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn route(&self, _origin: LatLng, _destination: LatLng) -> Result<RouteResult, ApiError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        self.route_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::simple_route()))
    }
}

/// Mock [`RideApi`].
pub struct MockRideApi {
    pub categories: Mutex<Result<Vec<VehicleCategory>, ApiError>>,
    pub classes: Mutex<Result<Vec<ServiceClass>, ApiError>>,
    pub estimate_responses: Mutex<VecDeque<Result<FareQuote, ApiError>>>,
    pub trip_responses: Mutex<VecDeque<Result<TripResponse, ApiError>>>,
    pub estimate_calls: AtomicUsize,
    pub estimate_requests: Mutex<Vec<EstimateRequest>>,
    pub trip_requests: Mutex<Vec<CreateTripRequest>>,
}

impl Default for MockRideApi {
    fn default() -> Self {
        Self {
            categories: Mutex::new(Ok(vec![
                VehicleCategory {
                    id: "car".into(),
                    label: "Car".into(),
                },
                VehicleCategory {
                    id: "moto".into(),
                    label: "Moto".into(),
                },
            ])),
            classes: Mutex::new(Ok(vec![
                ServiceClass {
                    id: "standard".into(),
                    label: "Standard".into(),
                },
                ServiceClass {
                    id: "comfort".into(),
                    label: "Comfort".into(),
                },
            ])),
            estimate_responses: Mutex::new(VecDeque::new()),
            trip_responses: Mutex::new(VecDeque::new()),
            estimate_calls: AtomicUsize::new(0),
            estimate_requests: Mutex::new(Vec::new()),
            trip_requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockRideApi {
    pub fn push_estimate(&self, result: Result<FareQuote, ApiError>) {
        self.estimate_responses.lock().unwrap().push_back(result);
    }

    pub fn push_trip(&self, result: Result<TripResponse, ApiError>) {
        self.trip_responses.lock().unwrap().push_back(result);
    }
}

impl RideApi for MockRideApi {
    async fn vehicle_categories(&self) -> Result<Vec<VehicleCategory>, ApiError> {
        self.categories.lock().unwrap().clone()
    }

    async fn service_classes(&self) -> Result<Vec<ServiceClass>, ApiError> {
        self.classes.lock().unwrap().clone()
    }

    async fn estimate(&self, req: EstimateRequest) -> Result<FareQuote, ApiError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.estimate_requests.lock().unwrap().push(req);
        self.estimate_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(fare(250.0)))
    }

    async fn create_trip(&self, req: CreateTripRequest) -> Result<TripResponse, ApiError> {
        let response = self
            .trip_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(TripResponse {
                    id: "trip-1".to_string(),
                    passenger_id: req.passenger_id.clone(),
                    pickup_address: req.pickup_address.clone(),
                })
            });
        self.trip_requests.lock().unwrap().push(req);
        response
    }
}

/// Mock [`PresenceApi`].
pub struct MockPresenceApi {
    pub ack: Mutex<Result<PresenceAck, ApiError>>,
    pub pings: Mutex<Vec<LocationPing>>,
}

impl Default for MockPresenceApi {
    fn default() -> Self {
        Self {
            ack: Mutex::new(Ok(PresenceAck::default())),
            pings: Mutex::new(Vec::new()),
        }
    }
}

impl MockPresenceApi {
    pub fn ping_count(&self) -> usize {
        self.pings.lock().unwrap().len()
    }

    pub fn positioned_ping_count(&self) -> usize {
        self.pings
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.has_position())
            .count()
    }
}

impl PresenceApi for MockPresenceApi {
    async fn ping(&self, body: LocationPing) -> Result<PresenceAck, ApiError> {
        self.pings.lock().unwrap().push(body);
        self.ack.lock().unwrap().clone()
    }
}
