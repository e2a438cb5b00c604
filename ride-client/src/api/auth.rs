//! Authentication backend client.
//!
//! Login, token refresh, logout, and profile fetch against the ride
//! backend. The refresh endpoint serves two flows: cookie sessions (the
//! refresh token lives in an HTTP-only cookie, sent automatically) and
//! body sessions (the refresh token travels in the request body). The
//! session layer decides which flow to use; this client only executes it.

use serde::{Deserialize, Serialize};

use crate::domain::Profile;

use super::error::{ApiError, Envelope, read_json};

/// How the session's refresh token is transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    /// Refresh token in an HTTP-only cookie.
    #[serde(rename = "cookie")]
    Cookie,
    /// Refresh token returned in and sent via the request body.
    #[serde(rename = "body")]
    BodyToken,
}

impl SessionKind {
    /// Stable string form used when persisting the kind across restarts.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Cookie => "cookie",
            SessionKind::BodyToken => "body",
        }
    }

    /// Inverse of [`SessionKind::as_str`]; unknown values are discarded.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cookie" => Some(SessionKind::Cookie),
            "body" => Some(SessionKind::BodyToken),
            _ => None,
        }
    }
}

/// Login request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub password: String,
    pub app_audience: String,
    pub expected_user_type: String,
}

impl LoginRequest {
    /// Passenger-app login with an email identity.
    pub fn passenger_email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone_number: None,
            password: password.into(),
            app_audience: "passenger_app".to_string(),
            expected_user_type: "passenger".to_string(),
        }
    }
}

/// Token payload returned by login and refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    /// Absolute expiry, epoch ms. Preferred over everything else.
    #[serde(default)]
    pub access_token_expires_at: Option<i64>,
    /// Remaining lifetime in ms, used when no absolute expiry is sent.
    #[serde(default)]
    pub access_token_expires_in: Option<i64>,
    /// Present only for body sessions.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub session_kind: Option<SessionKind>,
}

impl AuthTokens {
    /// The session kind this response implies: the explicit field when
    /// present, else inferred from whether a refresh token came in the
    /// body.
    pub fn implied_kind(&self) -> SessionKind {
        self.session_kind.unwrap_or(if self.refresh_token.is_some() {
            SessionKind::BodyToken
        } else {
            SessionKind::Cookie
        })
    }
}

/// Authentication operations consumed by the session manager.
///
/// Implemented by [`HttpAuthClient`] and by the in-memory mock used in
/// tests.
pub trait AuthApi: Send + Sync + 'static {
    fn login(
        &self,
        req: LoginRequest,
    ) -> impl Future<Output = Result<AuthTokens, ApiError>> + Send;

    /// Refresh the access token. `use_cookie` selects the cookie flow;
    /// otherwise `refresh_token` must carry the body-flow token.
    fn refresh(
        &self,
        refresh_token: Option<String>,
        use_cookie: bool,
    ) -> impl Future<Output = Result<AuthTokens, ApiError>> + Send;

    /// Invalidate the session remotely. Best-effort for callers.
    fn logout(
        &self,
        refresh_token: Option<String>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn fetch_profile(
        &self,
        use_cookie: bool,
    ) -> impl Future<Output = Result<Profile, ApiError>> + Send;
}

/// Configuration for the HTTP auth client.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl AuthConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: 30,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// HTTP implementation of [`AuthApi`].
///
/// Uses a cookie store so the cookie-flow refresh token set at login is
/// replayed on refresh and logout.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl HttpAuthClient {
    pub fn new(config: AuthConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
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

    fn validate_tokens(tokens: AuthTokens, context: &str) -> Result<AuthTokens, ApiError> {
        if tokens.access_token.is_empty() {
            return Err(ApiError::Malformed(format!(
                "{context}: missing accessToken"
            )));
        }
        Ok(tokens)
    }
}

impl AuthApi for HttpAuthClient {
    async fn login(&self, req: LoginRequest) -> Result<AuthTokens, ApiError> {
        let url = self.url("/auth/login");
        let response = self.http.post(&url).json(&req).send().await?;
        let envelope: Envelope<AuthTokens> = read_json(response, "login").await?;
        Self::validate_tokens(envelope.into_data("login")?, "login")
    }

    async fn refresh(
        &self,
        refresh_token: Option<String>,
        use_cookie: bool,
    ) -> Result<AuthTokens, ApiError> {
        let url = self.url("/auth/refresh");

        if !use_cookie && refresh_token.is_none() {
            return Err(ApiError::Malformed(
                "refresh: body flow requires a refresh token".to_string(),
            ));
        }

        let body = RefreshBody {
            refresh_token: if use_cookie { None } else { refresh_token },
        };
        let response = self.http.post(&url).json(&body).send().await?;
        let envelope: Envelope<AuthTokens> = read_json(response, "refresh").await?;
        let tokens = Self::validate_tokens(envelope.into_data("refresh")?, "refresh")?;

        // The backend always sends an absolute expiry on refresh; treat its
        // absence as a malformed response rather than guessing later.
        if tokens.access_token_expires_at.is_none() {
            return Err(ApiError::Malformed(
                "refresh: missing accessTokenExpiresAt".to_string(),
            ));
        }

        Ok(tokens)
    }

    async fn logout(&self, refresh_token: Option<String>) -> Result<(), ApiError> {
        let url = self.url("/auth/logout");
        let body = RefreshBody { refresh_token };
        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(super::error::normalize_error(status.as_u16(), &text));
        }
        Ok(())
    }

    async fn fetch_profile(&self, _use_cookie: bool) -> Result<Profile, ApiError> {
        let url = self.url("/users/profile");
        let response = self.http.get(&url).send().await?;
        let envelope: Envelope<Profile> = read_json(response, "profile").await?;
        envelope.into_data("profile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_kind_round_trip() {
        assert_eq!(SessionKind::parse("cookie"), Some(SessionKind::Cookie));
        assert_eq!(SessionKind::parse("body"), Some(SessionKind::BodyToken));
        assert_eq!(SessionKind::parse("web"), None);
        assert_eq!(
            SessionKind::parse(SessionKind::BodyToken.as_str()),
            Some(SessionKind::BodyToken)
        );
    }

    #[test]
    fn implied_kind_prefers_explicit_field() {
        let tokens: AuthTokens = serde_json::from_str(
            r#"{"accessToken":"A","refreshToken":"R","sessionKind":"cookie"}"#,
        )
        .unwrap();
        assert_eq!(tokens.implied_kind(), SessionKind::Cookie);

        let tokens: AuthTokens =
            serde_json::from_str(r#"{"accessToken":"A","refreshToken":"R"}"#).unwrap();
        assert_eq!(tokens.implied_kind(), SessionKind::BodyToken);

        let tokens: AuthTokens = serde_json::from_str(r#"{"accessToken":"A"}"#).unwrap();
        assert_eq!(tokens.implied_kind(), SessionKind::Cookie);
    }

    #[test]
    fn login_request_serializes_without_empty_identity() {
        let req = LoginRequest::passenger_email("ana@example.com", "secret");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["email"], "ana@example.com");
        assert!(json.get("phoneNumber").is_none());
        assert_eq!(json["appAudience"], "passenger_app");
    }
}
