//! Access token claim decoding.
//!
//! The backend's access tokens are JWTs. The claims are used only as a
//! fallback: expiry when the response carries no explicit timestamp, and
//! identity when the profile fetch fails. Decoding never verifies the
//! signature and never fails loudly; any malformed input yields `None`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use super::profile::Profile;

/// Claims this client cares about. Unknown claims are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccessClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "phoneNumber")]
    pub phone_number: Option<String>,
    /// Expiry, epoch seconds.
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Decode the payload segment of a JWT.
pub fn decode(token: &str) -> Option<AccessClaims> {
    let payload = token.split('.').nth(1)?;
    // Some issuers pad base64url; strip it so the no-pad engine accepts both.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry claim as epoch milliseconds, if the token carries one.
pub fn expiry_ms(token: &str) -> Option<i64> {
    decode(token)?.exp.map(|secs| secs * 1000)
}

/// Minimal identity derived from token claims, if a subject is present.
pub fn identity(token: &str) -> Option<Profile> {
    let claims = decode(token)?;
    let sub = claims.sub?;
    Some(Profile::from_identity(
        sub,
        claims.email,
        claims.phone_number,
    ))
}
