//! Geographic primitives.
//!
//! All coordinates are WGS84 degrees. Positions coming from a platform
//! location source are `GeoSample`s; everything the planner works with is
//! a plain `LatLng`. Backend payloads use GeoJSON points (`GeoPoint`),
//! which store coordinates in `[lng, lat]` order.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters, used by the haversine distance.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_meters(&self, other: &LatLng) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let s1 = (d_lat / 2.0).sin().powi(2);
        let s2 = self.lat.to_radians().cos()
            * other.lat.to_radians().cos()
            * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * (s1 + s2).sqrt().asin()
    }

    /// Render as `"lat, lng"` with six decimals, the display form used when
    /// no human-readable label is available.
    pub fn to_label(&self) -> String {
        format!("{:.6}, {:.6}", self.lat, self.lng)
    }
}

/// A GeoJSON point as the backend serializes locations.
///
/// Coordinates are `[lng, lat]`; anything else in the type tag is rejected
/// by [`GeoPoint::to_lat_lng`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

impl GeoPoint {
    pub fn from_lat_lng(p: LatLng) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: vec![p.lng, p.lat],
        }
    }

    /// Convert to a `LatLng`, or `None` if the value is not a well-formed
    /// point.
    pub fn to_lat_lng(&self) -> Option<LatLng> {
        if self.kind != "Point" || self.coordinates.len() != 2 {
            return None;
        }
        let (lng, lat) = (self.coordinates[0], self.coordinates[1]);
        if !lng.is_finite() || !lat.is_finite() {
            return None;
        }
        Some(LatLng { lat, lng })
    }
}

/// One position sample from a location source.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoSample {
    pub lat: f64,
    pub lng: f64,
    /// Reported horizontal accuracy, when the provider gives one.
    pub accuracy_meters: Option<f64>,
    /// Provider timestamp, epoch milliseconds.
    pub reported_at_ms: i64,
}

impl GeoSample {
    pub fn position(&self) -> LatLng {
        LatLng {
            lat: self.lat,
            lng: self.lng,
        }
    }

    /// RFC 3339 rendering of `reported_at_ms` for backend payloads.
    pub fn reported_at_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.reported_at_ms)
            .unwrap_or_default()
            .to_rfc3339()
    }
}

/// An axis-aligned bounding box used to reject implausible positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    /// The service area: the whole island with a small margin. Samples
    /// outside it are VPN or stale-cache artifacts and are dropped.
    pub const SERVICE_AREA: GeoBounds = GeoBounds {
        min_lat: 19.5,
        max_lat: 23.6,
        min_lng: -85.6,
        max_lng: -73.4,
    };

    /// The operating province, used to clamp geocoding searches.
    pub const PROVINCE: GeoBounds = GeoBounds {
        min_lat: 19.60,
        max_lat: 20.60,
        min_lng: -76.30,
        max_lng: -75.10,
    };

    /// Proximity bias used for clamped geocoding searches.
    pub const PROVINCE_CENTER: LatLng = LatLng {
        lat: 20.02,
        lng: -75.82,
    };

    pub fn contains(&self, p: LatLng) -> bool {
        p.lat >= self.min_lat
            && p.lat <= self.max_lat
            && p.lng >= self.min_lng
            && p.lng <= self.max_lng
    }

    /// Pass `sample` through if it lies inside the bounds, else drop it.
    pub fn filter(&self, sample: GeoSample) -> Option<GeoSample> {
        if self.contains(sample.position()) {
            Some(sample)
        } else {
            None
        }
    }

    /// `[min_lng, min_lat, max_lng, max_lat]`, the order geocoding APIs
    /// expect for a bbox parameter.
    pub fn as_bbox_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lng, self.min_lat, self.max_lng, self.max_lat
        )
    }
}

/// Round a coordinate pair to five decimals (~1 m), the key used by the
/// reverse-geocode label cache.
pub fn rounded_key(p: LatLng) -> (i64, i64) {
    ((p.lat * 1e5).round() as i64, (p.lng * 1e5).round() as i64)
}

/// Does a label look like a bare `"lat, lng"` coordinate pair?
///
/// Such labels are placeholders and are treated as absent wherever a human
/// label is wanted.
pub fn is_coord_like(label: &str) -> bool {
    let trimmed = label.trim();
    let Some((a, b)) = trimmed.split_once(',') else {
        return false;
    };
    a.trim().parse::<f64>().is_ok() && b.trim().parse::<f64>().is_ok()
}
