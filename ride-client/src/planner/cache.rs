//! Disk cache for the planned origin and destination.
//!
//! One JSON file with an entry per slot. Entries carry the save
//! timestamp; on load they are discarded when older than the TTL (24 h)
//! or outside the service area, so a stale or implausible plan never
//! resurrects on a later launch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{GeoBounds, LatLng};

/// Default entry lifetime.
const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache write failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("plan cache error: {0}")]
pub struct PlanCacheError(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPlace {
    lat: f64,
    lng: f64,
    label: Option<String>,
    saved_at_ms: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    origin: Option<CachedPlace>,
    #[serde(default)]
    destination: Option<CachedPlace>,
}

/// A rehydrated cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub point: LatLng,
    pub label: Option<String>,
}

/// Which slot an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSlot {
    Origin,
    Destination,
}

/// Disk cache for planning endpoints.
#[derive(Debug, Clone)]
pub struct PlanCache {
    path: PathBuf,
    ttl: Duration,
    bounds: GeoBounds,
}

impl PlanCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: DEFAULT_TTL,
            bounds: GeoBounds::SERVICE_AREA,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a slot, applying the TTL and service-area filters. Unreadable
    /// or invalid cache content behaves like an empty cache.
    pub fn load(&self, slot: PlanSlot, now_ms: i64) -> Option<CachedEntry> {
        let file = self.read_file().ok()?;
        let entry = match slot {
            PlanSlot::Origin => file.origin,
            PlanSlot::Destination => file.destination,
        }?;

        let age_ms = now_ms.saturating_sub(entry.saved_at_ms);
        if age_ms >= self.ttl.as_millis() as i64 {
            return None;
        }

        let point = LatLng::new(entry.lat, entry.lng);
        if !self.bounds.contains(point) {
            return None;
        }

        Some(CachedEntry {
            point,
            label: entry.label,
        })
    }

    /// Save a slot with the current timestamp.
    pub fn save(
        &self,
        slot: PlanSlot,
        point: LatLng,
        label: Option<&str>,
        now_ms: i64,
    ) -> Result<(), PlanCacheError> {
        let mut file = self.read_file().unwrap_or_default();
        let entry = Some(CachedPlace {
            lat: point.lat,
            lng: point.lng,
            label: label.map(str::to_string),
            saved_at_ms: now_ms,
        });
        match slot {
            PlanSlot::Origin => file.origin = entry,
            PlanSlot::Destination => file.destination = entry,
        }
        self.write_file(&file)
    }

    /// Remove a slot's entry.
    pub fn clear(&self, slot: PlanSlot) -> Result<(), PlanCacheError> {
        let mut file = self.read_file().unwrap_or_default();
        match slot {
            PlanSlot::Origin => file.origin = None,
            PlanSlot::Destination => file.destination = None,
        }
        self.write_file(&file)
    }

    fn read_file(&self) -> Result<CacheFile, PlanCacheError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheFile::default()),
            Err(e) => return Err(PlanCacheError(format!("read {}: {e}", self.path.display()))),
        };
        serde_json::from_str(&contents)
            .map_err(|e| PlanCacheError(format!("parse {}: {e}", self.path.display())))
    }

    fn write_file(&self, file: &CacheFile) -> Result<(), PlanCacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PlanCacheError(format!("create {}: {e}", parent.display())))?;
            }
        }
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| PlanCacheError(format!("serialize: {e}")))?;
        std::fs::write(&self.path, json)
            .map_err(|e| PlanCacheError(format!("write {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000_000;

    fn cache_in(dir: &tempfile::TempDir) -> PlanCache {
        PlanCache::new(dir.path().join("plan.json"))
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let cache = cache_in(&dir);
        let p = LatLng::new(20.02, -75.82);

        cache.save(PlanSlot::Origin, p, Some("Casa"), NOW).unwrap();
        cache
            .save(PlanSlot::Destination, LatLng::new(20.0, -75.8), None, NOW)
            .unwrap();

        let origin = cache.load(PlanSlot::Origin, NOW + 1000).unwrap();
        assert_eq!(origin.point, p);
        assert_eq!(origin.label.as_deref(), Some("Casa"));

        let dest = cache.load(PlanSlot::Destination, NOW + 1000).unwrap();
        assert!(dest.label.is_none());
    }

    #[test]
    fn expired_entries_are_not_loaded() {
        let dir = tempdir().unwrap();
        let cache = cache_in(&dir);
        cache
            .save(PlanSlot::Origin, LatLng::new(20.02, -75.82), None, NOW)
            .unwrap();

        let day_ms = 24 * 3600 * 1000;
        assert!(cache.load(PlanSlot::Origin, NOW + day_ms - 1).is_some());
        assert!(cache.load(PlanSlot::Origin, NOW + day_ms).is_none());
    }

    #[test]
    fn out_of_area_entries_are_not_loaded() {
        let dir = tempdir().unwrap();
        let cache = cache_in(&dir);
        // Miami is cached (somehow) but never rehydrated.
        cache
            .save(PlanSlot::Origin, LatLng::new(25.76, -80.19), None, NOW)
            .unwrap();
        assert!(cache.load(PlanSlot::Origin, NOW + 1000).is_none());
    }

    #[test]
    fn clear_removes_only_its_slot() {
        let dir = tempdir().unwrap();
        let cache = cache_in(&dir);
        cache
            .save(PlanSlot::Origin, LatLng::new(20.02, -75.82), None, NOW)
            .unwrap();
        cache
            .save(PlanSlot::Destination, LatLng::new(20.0, -75.8), None, NOW)
            .unwrap();

        cache.clear(PlanSlot::Destination).unwrap();
        assert!(cache.load(PlanSlot::Origin, NOW).is_some());
        assert!(cache.load(PlanSlot::Destination, NOW).is_none());
    }

    #[test]
    fn corrupt_file_behaves_like_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, "not json").unwrap();

        let cache = PlanCache::new(&path);
        assert!(cache.load(PlanSlot::Origin, NOW).is_none());
        // Saving over the corrupt file recovers it.
        cache
            .save(PlanSlot::Origin, LatLng::new(20.02, -75.82), None, NOW)
            .unwrap();
        assert!(cache.load(PlanSlot::Origin, NOW).is_some());
    }
}
