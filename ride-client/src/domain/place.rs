//! Place suggestions produced by geocoding search.

use serde::{Deserialize, Serialize};

use super::geo::LatLng;

/// One autocomplete result. Ordering within a result list is the
/// provider's relevance order and must be preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSuggestion {
    /// Provider feature id.
    pub id: String,
    /// Short title (main text).
    pub short_text: String,
    /// Full human-readable label ("street, city").
    pub full_label: String,
    pub coords: LatLng,
}
