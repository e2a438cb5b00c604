//! In-memory session state.
//!
//! A `SessionStore` owns the current [`SessionState`] behind a `watch`
//! channel: mutations go through the store's methods, readers either take
//! a snapshot or subscribe and react to changes. Nothing outside this
//! module writes the state directly.

use tokio::sync::watch;

use crate::api::SessionKind;
use crate::domain::Profile;

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The session's reactive state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub access_token: Option<String>,
    /// Epoch ms. The token is valid iff both token and expiry are set and
    /// the expiry is in the future.
    pub access_token_expires_at: Option<i64>,
    /// Present only for body sessions.
    pub refresh_token_in_memory: Option<String>,
    pub user: Option<Profile>,
    /// Fixed at login; persisted (non-sensitive) across restarts.
    pub kind: Option<SessionKind>,
    pub loading: bool,
}

impl SessionState {
    pub fn is_access_token_valid(&self, now_ms: i64) -> bool {
        match (&self.access_token, self.access_token_expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now_ms,
            _ => false,
        }
    }

    pub fn is_authenticated(&self, now_ms: i64) -> bool {
        self.is_access_token_valid(now_ms) && self.user.is_some()
    }

    /// Remaining token lifetime in ms, `None` when no expiry is known.
    pub fn expires_in_ms(&self, now_ms: i64) -> Option<i64> {
        self.access_token_expires_at.map(|at| (at - now_ms).max(0))
    }
}

/// Merge-patch applied by login/refresh. `None` fields keep their current
/// value; use [`SessionStore::clear`] to reset.
#[derive(Debug, Default)]
pub struct SessionPatch {
    pub access_token: Option<String>,
    pub access_token_expires_at: Option<i64>,
    pub refresh_token_in_memory: Option<String>,
    pub user: Option<Profile>,
    pub kind: Option<SessionKind>,
}

/// Owner of the session state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    tx: watch::Sender<SessionState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Subscribe to state changes. The receiver sees every settled state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn apply(&self, patch: SessionPatch) {
        self.tx.send_modify(|s| {
            if let Some(token) = patch.access_token {
                s.access_token = Some(token);
            }
            if let Some(at) = patch.access_token_expires_at {
                s.access_token_expires_at = Some(at);
            }
            if let Some(rt) = patch.refresh_token_in_memory {
                s.refresh_token_in_memory = Some(rt);
            }
            if let Some(user) = patch.user {
                s.user = Some(user);
            }
            if let Some(kind) = patch.kind {
                s.kind = Some(kind);
            }
        });
    }

    pub fn set_user(&self, user: Option<Profile>) {
        self.tx.send_modify(|s| s.user = user);
    }

    pub fn set_kind(&self, kind: Option<SessionKind>) {
        self.tx.send_modify(|s| s.kind = kind);
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_modify(|s| s.loading = loading);
    }

    /// Reset everything to the empty state.
    pub fn clear(&self) {
        self.tx.send_modify(|s| *s = SessionState::default());
    }
}
