//! Session lifecycle manager.
//!
//! Owns login, token refresh, cold-start restoration, and logout. The
//! central guarantee is single-flight refresh: however many callers race
//! into `perform_refresh` (the auto-refresh timer, a batch of 401
//! retries, a cold-start restore), exactly one network refresh happens
//! per overlapping batch, and every caller observes its result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiError, AuthApi, AuthTokens, LoginRequest, SessionKind};
use crate::domain::{Profile, claims};

use super::state::{SessionPatch, SessionStore, now_ms};
use super::store::{REFRESH_TOKEN_KEY, SESSION_KIND_KEY, TokenStore};

/// Refresh fires this long before expiry, shortened to half the token's
/// lifetime for short-lived tokens.
const AUTO_REFRESH_OFFSET_MS: i64 = 30_000;

/// Session-layer errors. `Clone` because a single refresh outcome is
/// fanned out to every concurrent awaiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Body-flow refresh attempted with no token in memory or storage.
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The session was torn down while the operation was in flight.
    #[error("refresh cancelled")]
    Cancelled,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<String, SessionError>>>;

struct ManagerInner<A, S> {
    api: A,
    store: S,
    session: SessionStore,
    /// The one in-flight refresh, shared by all concurrent callers.
    refresh_slot: Mutex<Option<RefreshFuture>>,
    auto_refresh: Mutex<Option<JoinHandle<()>>>,
    /// Cancelled on logout; replaced so the next login starts clean.
    cancel: Mutex<CancellationToken>,
}

/// Session manager handle. Cheap to clone; all clones share state.
pub struct SessionManager<A, S> {
    inner: Arc<ManagerInner<A, S>>,
}

impl<A, S> Clone for SessionManager<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AuthApi, S: TokenStore> SessionManager<A, S> {
    pub fn new(api: A, store: S, session: SessionStore) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                api,
                store,
                session,
                refresh_slot: Mutex::new(None),
                auto_refresh: Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// Current access token, if any, valid or not (validity is the
    /// server's call on use).
    pub fn access_token(&self) -> Option<String> {
        self.inner.session.snapshot().access_token
    }

    // ------------------------------------------------------------------
    // Login
    // ------------------------------------------------------------------

    /// Authenticate and populate the session. On any failure the session
    /// is left fully cleared, never partially authenticated.
    pub async fn login(&self, req: LoginRequest) -> Result<Profile, SessionError> {
        self.inner.session.set_loading(true);
        let result = self.login_inner(req).await;
        self.inner.session.set_loading(false);
        if result.is_err() {
            self.clear_local().await;
        }
        result
    }

    async fn login_inner(&self, req: LoginRequest) -> Result<Profile, SessionError> {
        let tokens = self.inner.api.login(req).await?;
        let kind = tokens.implied_kind();
        let access_token = tokens.access_token.clone();

        self.apply_tokens(&tokens, kind).await;

        let profile = match self
            .inner
            .api
            .fetch_profile(kind == SessionKind::Cookie)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                debug!(error = %e, "profile fetch failed after login, deriving identity from token");
                claims::identity(&access_token).ok_or_else(|| {
                    ApiError::Malformed("login: no usable identity".to_string())
                })?
            }
        };

        self.inner.session.set_user(Some(profile.clone()));
        Ok(profile)
    }

    // ------------------------------------------------------------------
    // Refresh (single-flight)
    // ------------------------------------------------------------------

    /// Refresh the access token. Concurrent callers share one in-flight
    /// operation and all receive the same token or the same failure.
    pub async fn perform_refresh(&self) -> Result<String, SessionError> {
        let fut = {
            let mut slot = self.inner.refresh_slot.lock().unwrap();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let manager = self.clone();
                    let cancel = self.inner.cancel.lock().unwrap().clone();
                    let fut: RefreshFuture =
                        async move { manager.run_refresh(cancel).await }.boxed().shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = fut.await;

        // Settled: free the slot so the next batch starts a new operation.
        let mut slot = self.inner.refresh_slot.lock().unwrap();
        if slot.as_ref().is_some_and(|f| f.peek().is_some()) {
            *slot = None;
        }
        result
    }

    async fn run_refresh(self, cancel: CancellationToken) -> Result<String, SessionError> {
        self.inner.session.set_loading(true);
        let result = self.run_refresh_inner(&cancel).await;
        self.inner.session.set_loading(false);

        // A failed refresh always tears the whole session down; a
        // cancelled one was torn down by whoever cancelled it.
        if result.is_err() && !matches!(result, Err(SessionError::Cancelled)) {
            warn!("refresh failed, clearing session");
            self.clear_local().await;
        }
        result
    }

    async fn run_refresh_inner(&self, cancel: &CancellationToken) -> Result<String, SessionError> {
        let recorded_kind = self.inner.session.snapshot().kind;

        let tokens = match recorded_kind {
            Some(SessionKind::Cookie) => self.refresh_call(None, true, cancel).await?,
            Some(SessionKind::BodyToken) => {
                let rt = self
                    .stored_refresh_token()
                    .await
                    .ok_or(SessionError::NoRefreshToken)?;
                self.refresh_call(Some(rt), false, cancel).await?
            }
            None => {
                // Kind unknown (state lost before it was recorded): try the
                // cookie flow first, then the body flow if a token is at hand.
                match self.refresh_call(None, true, cancel).await {
                    Ok(tokens) => tokens,
                    Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
                    Err(_cookie_err) => {
                        let Some(rt) = self.stored_refresh_token().await else {
                            return Err(SessionError::NoRefreshToken);
                        };
                        self.refresh_call(Some(rt), false, cancel).await?
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let kind = recorded_kind.unwrap_or_else(|| tokens.implied_kind());
        let access_token = tokens.access_token.clone();
        self.apply_tokens(&tokens, kind).await;

        // Refresh the profile too; token claims are the fallback identity.
        match self
            .inner
            .api
            .fetch_profile(kind == SessionKind::Cookie)
            .await
        {
            Ok(profile) => self.inner.session.set_user(Some(profile)),
            Err(e) => {
                debug!(error = %e, "profile fetch failed after refresh");
                if self.inner.session.snapshot().user.is_none() {
                    if let Some(profile) = claims::identity(&access_token) {
                        self.inner.session.set_user(Some(profile));
                    }
                }
            }
        }

        Ok(access_token)
    }

    /// Execute one refresh network call, observing the cancellation
    /// signal. The underlying call is not aborted on cancellation; it
    /// runs to completion in its own task and its result is discarded.
    async fn refresh_call(
        &self,
        refresh_token: Option<String>,
        use_cookie: bool,
        cancel: &CancellationToken,
    ) -> Result<AuthTokens, SessionError> {
        let manager = self.clone();
        let call = tokio::spawn(async move {
            manager
                .inner
                .api
                .refresh(refresh_token, use_cookie)
                .await
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            joined = call => match joined {
                Ok(result) => result.map_err(SessionError::from),
                Err(e) => Err(SessionError::Api(ApiError::Network(format!(
                    "refresh task failed: {e}"
                )))),
            },
        }
    }

    /// Refresh token for the body flow: in-memory copy first, then
    /// storage. Storage errors behave like an absent token.
    async fn stored_refresh_token(&self) -> Option<String> {
        if let Some(rt) = self.inner.session.snapshot().refresh_token_in_memory {
            return Some(rt);
        }
        match self.inner.store.load(REFRESH_TOKEN_KEY).await {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "refresh token load failed");
                None
            }
        }
    }

    /// Store tokens + expiry + kind, persist what must survive restarts,
    /// and (re)schedule the auto-refresh timer.
    async fn apply_tokens(&self, tokens: &AuthTokens, kind: SessionKind) {
        let now = now_ms();
        // Expiry priority: absolute timestamp, then TTL, then the token's
        // own decoded claim.
        let expires_at = tokens
            .access_token_expires_at
            .or_else(|| tokens.access_token_expires_in.map(|ttl| now + ttl.max(0)))
            .or_else(|| claims::expiry_ms(&tokens.access_token));

        if let Some(rt) = &tokens.refresh_token {
            if let Err(e) = self.inner.store.save(REFRESH_TOKEN_KEY, Some(rt)).await {
                warn!(error = %e, "failed to persist refresh token");
            }
        }
        if let Err(e) = self
            .inner
            .store
            .save(SESSION_KIND_KEY, Some(kind.as_str()))
            .await
        {
            warn!(error = %e, "failed to persist session kind");
        }

        self.inner.session.apply(SessionPatch {
            access_token: Some(tokens.access_token.clone()),
            access_token_expires_at: expires_at,
            refresh_token_in_memory: tokens.refresh_token.clone(),
            kind: Some(kind),
            ..Default::default()
        });

        if let Some(at) = expires_at {
            self.schedule_auto_refresh(at);
        }
    }

    // ------------------------------------------------------------------
    // Auto-refresh scheduling
    // ------------------------------------------------------------------

    /// Schedule a refresh `min(30s, ttl/2)` before `expires_at`. A
    /// non-positive delay fires the refresh asynchronously on the next
    /// scheduling opportunity instead of synchronously, so a caller
    /// holding locks cannot re-enter itself. Any previously scheduled
    /// firing is cancelled first.
    pub fn schedule_auto_refresh(&self, expires_at: i64) {
        let mut guard = self.inner.auto_refresh.lock().unwrap();
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let ttl = (expires_at - now_ms()).max(0);
        let offset = AUTO_REFRESH_OFFSET_MS.min(ttl / 2);
        let delay = ttl - offset;

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            match manager.perform_refresh().await {
                Ok(_) => debug!("auto refresh succeeded"),
                Err(e) => warn!(error = %e, "auto refresh failed"),
            }
        });
        *guard = Some(handle);
    }

    pub fn cancel_auto_refresh(&self) {
        if let Some(handle) = self.inner.auto_refresh.lock().unwrap().take() {
            handle.abort();
        }
    }

    // ------------------------------------------------------------------
    // Restore / logout
    // ------------------------------------------------------------------

    /// Cold-start restoration: restore the persisted session kind, then
    /// silently refresh unless a valid session is already in memory.
    pub async fn restore_session(&self) -> Result<(), SessionError> {
        if self.inner.session.snapshot().kind.is_none() {
            if let Ok(Some(value)) = self.inner.store.load(SESSION_KIND_KEY).await {
                match SessionKind::parse(&value) {
                    Some(kind) => self.inner.session.set_kind(Some(kind)),
                    None => {
                        warn!(value = %value, "discarding unknown persisted session kind");
                        let _ = self.inner.store.save(SESSION_KIND_KEY, None).await;
                    }
                }
            }
        }

        if self.inner.session.snapshot().is_authenticated(now_ms()) {
            debug!("restore: valid session already in memory");
            return Ok(());
        }

        let token = self.perform_refresh().await?;

        // The refresh pipeline populates the user; this is the last-ditch
        // fallback when both the profile fetch and its claim fallback gave
        // nothing.
        if self.inner.session.snapshot().user.is_none() {
            match claims::identity(&token) {
                Some(profile) => self.inner.session.set_user(Some(profile)),
                None => {
                    self.clear_local().await;
                    return Err(SessionError::Api(ApiError::Malformed(
                        "restore: no usable identity".to_string(),
                    )));
                }
            }
        }
        Ok(())
    }

    /// Race [`restore_session`] against a startup budget so application
    /// launch is never blocked on it. Returns whether a session was
    /// restored within the budget; on timeout the restore keeps running
    /// in the background and its eventual result is discarded.
    pub async fn restore_session_with_timeout(&self, budget: Duration) -> bool {
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.restore_session().await });
        match tokio::time::timeout(budget, task).await {
            Ok(Ok(Ok(()))) => true,
            Ok(_) => false,
            Err(_) => {
                debug!("restore: startup budget elapsed, proceeding unauthenticated");
                false
            }
        }
    }

    /// Best-effort remote invalidation followed by unconditional local
    /// cleanup.
    pub async fn logout(&self) {
        let snap = self.inner.session.snapshot();
        let refresh_token = match snap.kind {
            Some(SessionKind::Cookie) => None,
            _ => self.stored_refresh_token().await,
        };

        if let Err(e) = self.inner.api.logout(refresh_token).await {
            warn!(error = %e, "remote logout failed, continuing with local cleanup");
        }
        self.clear_local().await;
    }

    /// Local teardown: cancel the auto-refresh timer, signal any in-flight
    /// refresh (without awaiting it), wipe storage, clear state. The UI
    /// observes the cleared session and returns to the entry screen.
    pub async fn clear_local(&self) {
        self.cancel_auto_refresh();

        {
            let mut guard = self.inner.cancel.lock().unwrap();
            guard.cancel();
            *guard = CancellationToken::new();
        }

        if let Err(e) = self.inner.store.save(REFRESH_TOKEN_KEY, None).await {
            warn!(error = %e, "failed to clear refresh token");
        }
        if let Err(e) = self.inner.store.save(SESSION_KIND_KEY, None).await {
            warn!(error = %e, "failed to clear session kind");
        }
        self.inner.session.clear();
    }
}

#[cfg(test)]
impl<A: AuthApi, S: TokenStore> SessionManager<A, S> {
    pub(crate) fn api(&self) -> &A {
        &self.inner.api
    }
}

/// Map a login failure to per-field form messages where one applies.
/// Fields without a visible form stay as step-level notifications.
pub fn login_form_errors(error: &ApiError) -> Option<HashMap<String, Vec<String>>> {
    match error {
        ApiError::Validation { fields } => Some(fields.clone()),
        ApiError::InvalidCredentials | ApiError::Unauthorized => Some(HashMap::from([(
            "password".to_string(),
            vec!["invalid credentials".to_string()],
        )])),
        ApiError::Api { code: Some(code), .. } if code == "EMAIL_NOT_VERIFIED" => {
            Some(HashMap::from([(
                "email".to_string(),
                vec!["email not verified".to_string()],
            )]))
        }
        _ => None,
    }
}
