//! Platform location source seam.
//!
//! A `LocationSource` is whatever the platform provides: the native
//! device API or the browser API. Both are selected at startup by a
//! capability check and hidden behind the same trait; the stream logic
//! never branches on platform. `ReplaySource` plays a scripted sequence
//! for development and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::GeoSample;

/// Location acquisition failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("location unavailable")]
    Unavailable,

    #[error("location permission denied")]
    PermissionDenied,

    #[error("location provider error: {0}")]
    Provider(String),

    #[error("location fix timed out")]
    Timeout,
}

/// Options for a one-shot fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixRequest {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Maximum acceptable age of a cached fix. Zero forces a fresh one.
    pub max_age: Duration,
}

impl FixRequest {
    pub fn high(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            max_age: Duration::ZERO,
        }
    }

    pub fn low(timeout: Duration) -> Self {
        Self {
            high_accuracy: false,
            timeout,
            max_age: Duration::from_secs(10),
        }
    }
}

/// Options for a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchRequest {
    pub high_accuracy: bool,
    pub max_age: Duration,
}

/// Handle to a running platform watch. Cancelling (or dropping) it tears
/// the platform watch down.
#[derive(Debug)]
pub struct WatchGuard {
    token: CancellationToken,
}

impl WatchGuard {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// One-shot fix and continuous watch, as the platform provides them.
pub trait LocationSource: Send + Sync + 'static {
    fn get_once(
        &self,
        req: FixRequest,
    ) -> impl Future<Output = Result<GeoSample, LocationError>> + Send;

    /// Start a continuous watch feeding `sink`. Provider errors are
    /// delivered through the sink as `Err` items; the watch stays
    /// formally open until the returned guard is cancelled.
    fn watch(
        &self,
        req: WatchRequest,
        sink: mpsc::Sender<Result<GeoSample, LocationError>>,
    ) -> impl Future<Output = Result<WatchGuard, LocationError>> + Send;
}

/// A scripted location source for development and tests.
///
/// One-shot fixes pop from a queue (empty queue means unavailable). The
/// watch script is a sequence of `(delay, item)` pairs consumed across
/// watch sessions, so restart behavior can be scripted too; when the
/// script runs dry the watch goes silent rather than ending, like a real
/// provider with no new fixes.
#[derive(Clone, Default)]
pub struct ReplaySource {
    inner: Arc<ReplayInner>,
}

#[derive(Default)]
struct ReplayInner {
    once: Mutex<VecDeque<Result<GeoSample, LocationError>>>,
    watch_script: Mutex<VecDeque<(Duration, Result<GeoSample, LocationError>)>>,
    once_requests: Mutex<Vec<FixRequest>>,
    watch_starts: AtomicUsize,
    active_watches: AtomicIsize,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_once(&self, item: Result<GeoSample, LocationError>) {
        self.inner.once.lock().unwrap().push_back(item);
    }

    pub fn push_watch(&self, delay: Duration, item: Result<GeoSample, LocationError>) {
        self.inner
            .watch_script
            .lock()
            .unwrap()
            .push_back((delay, item));
    }

    /// Fix requests seen so far, in order.
    pub fn once_requests(&self) -> Vec<FixRequest> {
        self.inner.once_requests.lock().unwrap().clone()
    }

    /// How many watch sessions have been started.
    pub fn watch_starts(&self) -> usize {
        self.inner.watch_starts.load(Ordering::SeqCst)
    }

    /// How many watch sessions are currently running.
    pub fn active_watches(&self) -> isize {
        self.inner.active_watches.load(Ordering::SeqCst)
    }
}

impl LocationSource for ReplaySource {
    async fn get_once(&self, req: FixRequest) -> Result<GeoSample, LocationError> {
        self.inner.once_requests.lock().unwrap().push(req);
        self.inner
            .once
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LocationError::Unavailable))
    }

    async fn watch(
        &self,
        _req: WatchRequest,
        sink: mpsc::Sender<Result<GeoSample, LocationError>>,
    ) -> Result<WatchGuard, LocationError> {
        self.inner.watch_starts.fetch_add(1, Ordering::SeqCst);
        self.inner.active_watches.fetch_add(1, Ordering::SeqCst);

        let token = CancellationToken::new();
        let child = token.clone();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            loop {
                let next = inner.watch_script.lock().unwrap().pop_front();
                let Some((delay, item)) = next else {
                    // Script exhausted: stay silent until cancelled.
                    child.cancelled().await;
                    break;
                };

                tokio::select! {
                    _ = child.cancelled() => {
                        // Unconsumed item goes back for the next session.
                        inner.watch_script.lock().unwrap().push_front((Duration::ZERO, item));
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                if sink.send(item).await.is_err() {
                    break;
                }
            }
            inner.active_watches.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(WatchGuard::new(token))
    }
}
