//! User profile types.

use serde::{Deserialize, Serialize};

use super::geo::GeoPoint;

/// A user profile as returned by the profile endpoint.
///
/// Most fields are optional: a profile can also be derived from access
/// token claims alone (see [`crate::domain::claims`]), in which case only
/// the identity fields are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    /// Last known position, GeoJSON point.
    #[serde(default)]
    pub current_location: Option<GeoPoint>,
}

impl Profile {
    /// Minimal profile carrying only an identity.
    pub fn from_identity(id: String, email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            id,
            name: None,
            email,
            phone_number,
            user_type: None,
            current_location: None,
        }
    }
}
