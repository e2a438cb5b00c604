//! Request authentication middleware.
//!
//! Wraps outbound calls to protected endpoints: injects the current
//! bearer token, and on a 401 triggers one shared refresh and retries the
//! request exactly once with the new token. Auth endpoints (login,
//! refresh, logout) never go through this wrapper; they are invoked
//! directly on the auth client, so the refresh path cannot recurse into
//! itself.

use tracing::{debug, warn};

use crate::api::{ApiError, AuthApi};

use super::manager::{SessionError, SessionManager};
use super::store::TokenStore;

/// Middleware for calls to protected endpoints.
pub struct AuthMiddleware<A, S> {
    manager: SessionManager<A, S>,
}

impl<A: AuthApi, S: TokenStore> AuthMiddleware<A, S> {
    pub fn new(manager: SessionManager<A, S>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &SessionManager<A, S> {
        &self.manager
    }

    /// Execute `request` with the current bearer token. On a 401, refresh
    /// once (sharing any in-flight refresh) and retry once; the retry's
    /// outcome is final. A failed refresh performs full local logout and
    /// the original failure is terminal.
    pub async fn send<T, F, Fut>(&self, request: F) -> Result<T, ApiError>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = self.manager.access_token();
        match request(token).await {
            Err(ApiError::Unauthorized) => {
                debug!("401 on protected call, refreshing once");
                match self.manager.perform_refresh().await {
                    Ok(new_token) => {
                        // Retried exactly once: a second 401 propagates.
                        request(Some(new_token)).await
                    }
                    Err(e) => {
                        warn!(error = %e, "refresh after 401 failed, ending session");
                        self.manager.clear_local().await;
                        Err(match e {
                            SessionError::Api(api) => api,
                            SessionError::NoRefreshToken | SessionError::Cancelled => {
                                ApiError::Unauthorized
                            }
                        })
                    }
                }
            }
            other => other,
        }
    }
}
