//! Normalized API errors.
//!
//! Every transport-level failure (connection errors, non-2xx statuses,
//! unparseable bodies) is folded into one `ApiError` shape here, so no
//! downstream consumer ever branches on `reqwest` types. The error is
//! `Clone` because the session layer fans a single refresh result out to
//! every concurrent awaiter.

use std::collections::HashMap;

use serde::Deserialize;

/// A normalized backend/transport error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// No usable response: connectivity, DNS, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// 401 with no more specific code.
    #[error("unauthorized")]
    Unauthorized,

    /// The backend rejected the credentials themselves.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Structured per-field rejection.
    #[error("validation failed")]
    Validation {
        fields: HashMap<String, Vec<String>>,
    },

    /// The response arrived but violated the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Any other error status.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::InvalidCredentials)
    }

    /// Machine code, when the backend sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

/// Error body shape the backend uses for rejections.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    validation: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    errors: Option<HashMap<String, Vec<String>>>,
}

/// Normalize an error status + body into an `ApiError`.
///
/// The body may be JSON in the backend's error shape, bare text, or HTML
/// from an intermediary; all three are handled.
pub fn normalize_error(status: u16, body: &str) -> ApiError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();

    if let Some(body) = &parsed {
        if let Some(fields) = body.validation.clone().or_else(|| body.errors.clone()) {
            return ApiError::Validation { fields };
        }

        let code = body.code.as_deref();
        if status == 401 || matches!(code, Some("INVALID_CREDENTIALS") | Some("UNAUTHORIZED")) {
            return if matches!(code, Some("INVALID_CREDENTIALS")) {
                ApiError::InvalidCredentials
            } else {
                ApiError::Unauthorized
            };
        }
    } else if status == 401 {
        return ApiError::Unauthorized;
    }

    let message = match &parsed {
        Some(b) => b
            .message
            .clone()
            .unwrap_or_else(|| format!("status {status}")),
        None if body.trim_start().starts_with("<!DOCTYPE") || body.trim_start().starts_with("<html") => {
            format!("server error (HTML response), status {status}")
        }
        None if !body.is_empty() => body.chars().take(200).collect(),
        None => format!("status {status}"),
    };

    ApiError::Api {
        status,
        message,
        code: parsed.and_then(|b| b.code),
    }
}

/// The backend's uniform success envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::Deserialize<'de>"))]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload, treating a missing or unsuccessful envelope as
    /// a malformed response.
    pub fn into_data(self, context: &str) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Api {
                status: 200,
                message: self
                    .message
                    .unwrap_or_else(|| format!("{context}: unsuccessful response")),
                code: None,
            });
        }
        self.data
            .ok_or_else(|| ApiError::Malformed(format!("{context}: missing data")))
    }
}

/// Read a response, mapping error statuses through [`normalize_error`] and
/// deserializing success bodies as `T`.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(normalize_error(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| ApiError::Malformed(format!("{context}: {e}")))
}
