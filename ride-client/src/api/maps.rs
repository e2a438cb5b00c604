//! Geocoding and directions provider client.
//!
//! Forward search, reverse lookup, and driving routes. Searches are
//! clamped to the operating province by default: a bbox plus proximity
//! bias on the request, and a client-side context filter on the results
//! (the provider sometimes leaks matches from outside the bbox).

use serde::Deserialize;

use crate::domain::{GeoBounds, LatLng, PlaceSuggestion};

use super::error::{ApiError, normalize_error};

/// Feature types requested for forward searches.
const SEARCH_TYPES: &str = "poi,poi.landmark,address,street,place,locality,neighborhood";

/// Label tails stripped from result labels, outermost first: the country
/// tail must go before the province tail can match.
const LABEL_TAILS: [&str; 2] = [", cuba", ", santiago de cuba"];

/// Region name matched against feature context to keep a result.
const PROVINCE_CONTEXT: &str = "santiago de cuba";

/// Options for a forward geocoding search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Clamp to the operating province (bbox + context filter).
    pub clamp_to_province: bool,
    /// Bias results toward this point. Clamped searches default to the
    /// province center when no bias is given.
    pub proximity: Option<LatLng>,
    pub limit: u8,
    pub language: String,
    pub country: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            clamp_to_province: true,
            proximity: None,
            limit: 10,
            language: "es".to_string(),
            country: "cu".to_string(),
        }
    }
}

impl SearchOptions {
    pub fn with_proximity(mut self, p: LatLng) -> Self {
        self.proximity = Some(p);
        self
    }

    pub fn unclamped(mut self) -> Self {
        self.clamp_to_province = false;
        self
    }
}

/// Result of a reverse lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseResult {
    pub label: String,
    pub coords: LatLng,
}

/// Result of a route computation. Distances/durations are raw provider
/// values; rounding happens when the planner builds its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResult {
    pub distance_km: f64,
    pub duration_min: f64,
    /// Path as `[lng, lat]` coordinates.
    pub geometry: Vec<[f64; 2]>,
}

/// Geocoding/directions operations consumed by the trip planner engine.
pub trait MapsApi: Send + Sync + 'static {
    fn search(
        &self,
        query: String,
        opts: SearchOptions,
    ) -> impl Future<Output = Result<Vec<PlaceSuggestion>, ApiError>> + Send;

    /// Reverse-geocode a point to a human label. `Ok(None)` means the
    /// provider had nothing useful, which is not an error.
    fn reverse(
        &self,
        point: LatLng,
        clamp_to_province: bool,
    ) -> impl Future<Output = Result<Option<ReverseResult>, ApiError>> + Send;

    fn route(
        &self,
        origin: LatLng,
        destination: LatLng,
    ) -> impl Future<Output = Result<RouteResult, ApiError>> + Send;
}

/// Configuration for the HTTP maps client.
#[derive(Debug, Clone)]
pub struct MapsConfig {
    pub access_token: String,
    pub geocoding_base_url: String,
    pub directions_base_url: String,
    pub timeout_secs: u64,
}

impl MapsConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            geocoding_base_url: "https://api.mapbox.com/geocoding/v5/mapbox.places".to_string(),
            directions_base_url: "https://api.mapbox.com/directions/v5/mapbox/driving".to_string(),
            timeout_secs: 15,
        }
    }

    /// Point both endpoints at a test server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.geocoding_base_url = format!("{}/geocoding", url.trim_end_matches('/'));
        self.directions_base_url = format!("{}/directions", url.trim_end_matches('/'));
        self
    }
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    text: String,
    place_name: String,
    /// `[lng, lat]`
    center: [f64; 2],
    #[serde(default)]
    context: Vec<FeatureContext>,
    #[serde(default)]
    place_type: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FeatureContext {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    /// Meters.
    distance: f64,
    /// Seconds.
    duration: f64,
    geometry: RouteGeometry,
}

#[derive(Debug, Deserialize)]
struct RouteGeometry {
    #[serde(default)]
    coordinates: Vec<[f64; 2]>,
}

/// Is this feature inside the operating province, judged by its context?
fn in_province(feature: &Feature) -> bool {
    feature
        .place_name
        .to_lowercase()
        .contains(PROVINCE_CONTEXT)
        || feature
            .context
            .iter()
            .any(|c| c.text.to_lowercase().contains(PROVINCE_CONTEXT))
}

/// Strip the province/country tail from a display label.
fn strip_label_tail(label: &str) -> String {
    let mut out = label.to_string();
    for tail in LABEL_TAILS {
        // The tails are plain ASCII, so the case-folded match maps back
        // to the same byte length in the original.
        if out.to_lowercase().ends_with(tail) {
            out.truncate(out.len() - tail.len());
        }
    }
    out
}

/// Pick the best reverse-geocode feature: most specific type first.
fn pick_reverse_feature(features: &[Feature]) -> Option<&Feature> {
    const PRIORITY: [&str; 6] = [
        "poi",
        "poi.landmark",
        "address",
        "place",
        "locality",
        "neighborhood",
    ];
    for wanted in PRIORITY {
        if let Some(f) = features
            .iter()
            .find(|f| f.place_type.iter().any(|t| t == wanted))
        {
            return Some(f);
        }
    }
    features.first()
}

/// HTTP implementation of [`MapsApi`].
#[derive(Debug, Clone)]
pub struct HttpMapsClient {
    http: reqwest::Client,
    config: MapsConfig,
}

impl HttpMapsClient {
    pub fn new(config: MapsConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    async fn get_features(&self, url: &str, params: &[(&str, String)]) -> Result<Vec<Feature>, ApiError> {
        let response = self.http.get(url).query(params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(normalize_error(status.as_u16(), &body));
        }
        let collection: FeatureCollection = serde_json::from_str(&body)
            .map_err(|e| ApiError::Malformed(format!("geocoding: {e}")))?;
        Ok(collection.features)
    }
}

impl MapsApi for HttpMapsClient {
    async fn search(
        &self,
        query: String,
        opts: SearchOptions,
    ) -> Result<Vec<PlaceSuggestion>, ApiError> {
        let url = format!(
            "{}/{}.json",
            self.config.geocoding_base_url,
            urlencode(&query)
        );

        let mut params: Vec<(&str, String)> = vec![
            ("access_token", self.config.access_token.clone()),
            ("autocomplete", "true".to_string()),
            ("limit", opts.limit.min(10).to_string()),
            ("language", opts.language.clone()),
            ("types", SEARCH_TYPES.to_string()),
            ("country", opts.country.clone()),
        ];

        let proximity = if opts.clamp_to_province {
            params.push(("bbox", GeoBounds::PROVINCE.as_bbox_param()));
            Some(opts.proximity.unwrap_or(GeoBounds::PROVINCE_CENTER))
        } else {
            opts.proximity
        };
        if let Some(p) = proximity {
            params.push(("proximity", format!("{},{}", p.lng, p.lat)));
        }

        let mut features = self.get_features(&url, &params).await?;
        if opts.clamp_to_province {
            features.retain(in_province);
        }

        Ok(features
            .into_iter()
            .map(|f| PlaceSuggestion {
                id: f.id,
                short_text: f.text,
                full_label: strip_label_tail(&f.place_name),
                coords: LatLng::new(f.center[1], f.center[0]),
            })
            .collect())
    }

    async fn reverse(
        &self,
        point: LatLng,
        clamp_to_province: bool,
    ) -> Result<Option<ReverseResult>, ApiError> {
        // No bbox/country on reverse lookups; the provider rejects them.
        let url = format!(
            "{}/{},{}.json",
            self.config.geocoding_base_url, point.lng, point.lat
        );
        let params = vec![("access_token", self.config.access_token.clone())];

        let mut features = self.get_features(&url, &params).await?;
        if clamp_to_province {
            features.retain(in_province);
        }

        Ok(pick_reverse_feature(&features).map(|f| ReverseResult {
            label: strip_label_tail(&f.place_name),
            coords: LatLng::new(f.center[1], f.center[0]),
        }))
    }

    async fn route(&self, origin: LatLng, destination: LatLng) -> Result<RouteResult, ApiError> {
        for v in [origin.lat, origin.lng, destination.lat, destination.lng] {
            if !v.is_finite() {
                return Err(ApiError::Malformed(
                    "route: non-finite coordinate".to_string(),
                ));
            }
        }

        // Six decimals avoids float-noise coordinates in the URL.
        let coords = format!(
            "{:.6},{:.6};{:.6},{:.6}",
            origin.lng, origin.lat, destination.lng, destination.lat
        );
        let url = format!("{}/{}", self.config.directions_base_url, coords);

        let params = [
            ("access_token", self.config.access_token.clone()),
            ("alternatives", "false".to_string()),
            ("geometries", "geojson".to_string()),
            ("overview", "full".to_string()),
            ("annotations", "distance,duration".to_string()),
        ];

        let response = self.http.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(normalize_error(status.as_u16(), &body));
        }

        let parsed: DirectionsResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Malformed(format!("directions: {e}")))?;
        let route = parsed
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Malformed("directions: no routes".to_string()))?;

        Ok(RouteResult {
            distance_km: route.distance / 1000.0,
            duration_min: route.duration / 60.0,
            geometry: route.geometry.coordinates,
        })
    }
}

/// Percent-encode a path segment. Only what a search query needs.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
