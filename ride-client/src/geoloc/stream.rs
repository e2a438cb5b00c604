//! Filtered, self-healing location stream.
//!
//! `LocationStream` layers reliability on top of raw platform sources:
//! a balanced one-shot (native first, then browser), a bounded wait for
//! the first valid fix, and an infinite restartable watch. Every emitted
//! sample has passed the service-area filter; samples outside it are
//! dropped silently. A 60 s watchdog restarts a watch that has gone
//! quiet, and provider errors back off 1-2-5-10-30 s, resetting to 1 s on
//! the next valid sample. There is no terminal give-up state: positioning
//! may come back at any time, so the stream keeps retrying until its
//! consumer goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{GeoBounds, GeoSample};

use super::source::{FixRequest, LocationError, LocationSource, WatchGuard, WatchRequest};

/// Escalating retry delays after provider errors, in seconds.
const BACKOFF_STEPS_SECS: [u64; 5] = [1, 2, 5, 10, 30];

/// Provider-error retry schedule: walks 1-2-5-10-30 s and stays at the
/// cap; any success resets it to the first step.
#[derive(Debug, Default)]
pub struct Backoff {
    step: usize,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// The delay to apply now; escalates for the next call.
    pub fn next(&mut self) -> Duration {
        let delay = Duration::from_secs(BACKOFF_STEPS_SECS[self.step]);
        if self.step < BACKOFF_STEPS_SECS.len() - 1 {
            self.step += 1;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

/// Stream tuning.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Samples outside these bounds never reach consumers.
    pub bounds: GeoBounds,
    /// Restart the platform watch after this long without a valid sample.
    pub watchdog: Duration,
    /// Force high-accuracy, uncached fixes on the browser source. Set on
    /// platforms whose network positioning is known to be unreliable.
    pub force_browser_high_accuracy: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bounds: GeoBounds::SERVICE_AREA,
            watchdog: Duration::from_secs(60),
            force_browser_high_accuracy: false,
        }
    }
}

struct StreamInner<N, B> {
    native: Option<N>,
    browser: B,
    config: StreamConfig,
}

/// Geographically-filtered location sampling over platform sources.
pub struct LocationStream<N, B> {
    inner: Arc<StreamInner<N, B>>,
}

impl<N, B> Clone for LocationStream<N, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A running balanced watch. Dropping it tears down the platform watch
/// and every internal timer.
pub struct LocationWatch {
    rx: mpsc::Receiver<GeoSample>,
    cancel: CancellationToken,
}

impl LocationWatch {
    /// Next valid sample, or `None` once the watch has been cancelled.
    pub async fn recv(&mut self) -> Option<GeoSample> {
        self.rx.recv().await
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<N: LocationSource, B: LocationSource> LocationStream<N, B> {
    /// Native platform detected: both sources available.
    pub fn with_native(native: N, browser: B, config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                native: Some(native),
                browser,
                config,
            }),
        }
    }

    /// Browser-only platform.
    pub fn browser_only(browser: B, config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                native: None,
                browser,
                config,
            }),
        }
    }

    fn browser_fix(&self, high: bool, timeout: Duration) -> FixRequest {
        if self.inner.config.force_browser_high_accuracy {
            FixRequest::high(timeout)
        } else if high {
            FixRequest::high(timeout)
        } else {
            FixRequest::low(timeout)
        }
    }

    /// One balanced reading: native high-accuracy first, then a browser
    /// low-accuracy fix, then a browser high-accuracy fix. The first
    /// sample inside the service area wins; `None` if every attempt
    /// failed or fell outside it.
    pub async fn get_once_balanced(&self) -> Option<GeoSample> {
        if let Some(native) = &self.inner.native {
            match native.get_once(FixRequest::high(Duration::from_secs(10))).await {
                Ok(sample) => {
                    if let Some(sample) = self.inner.config.bounds.filter(sample) {
                        return Some(sample);
                    }
                }
                Err(e) => debug!(error = %e, "native one-shot fix failed"),
            }
        }

        match self
            .inner
            .browser
            .get_once(self.browser_fix(false, Duration::from_secs(8)))
            .await
        {
            Ok(sample) => {
                if let Some(sample) = self.inner.config.bounds.filter(sample) {
                    return Some(sample);
                }
            }
            Err(e) => debug!(error = %e, "browser low-accuracy fix failed"),
        }

        match self
            .inner
            .browser
            .get_once(self.browser_fix(true, Duration::from_secs(10)))
            .await
        {
            Ok(sample) => self.inner.config.bounds.filter(sample),
            Err(e) => {
                debug!(error = %e, "browser high-accuracy fix failed");
                None
            }
        }
    }

    /// First valid fix within `timeout`: one balanced attempt, then the
    /// continuous watch. The watch is torn down when this returns.
    pub async fn wait_for_valid_fix(&self, timeout: Duration) -> Option<GeoSample> {
        if let Some(sample) = self.get_once_balanced().await {
            return Some(sample);
        }
        let mut watch = self.watch_balanced();
        tokio::time::timeout(timeout, watch.recv()).await.ok().flatten()
    }

    /// Infinite, restartable watch. Emits an initial best-effort sample,
    /// then platform-watch samples filtered to the service area.
    pub fn watch_balanced(&self) -> LocationWatch {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let stream = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            stream.drive_watch(tx, token).await;
        });
        LocationWatch { rx, cancel }
    }

    async fn drive_watch(self, tx: mpsc::Sender<GeoSample>, cancel: CancellationToken) {
        // Initial best-effort sample.
        let seed = tokio::select! {
            _ = cancel.cancelled() => return,
            seed = self.get_once_balanced() => seed,
        };
        if let Some(sample) = seed {
            if tx.send(sample).await.is_err() {
                return;
            }
        }

        let mut backoff = Backoff::new();

        'sessions: loop {
            if cancel.is_cancelled() {
                return;
            }

            let (ptx, mut prx) = mpsc::channel(16);
            let guard = match self.start_platform_watch(ptx).await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "platform watch start failed");
                    if !self.backoff_sleep(&mut backoff, &cancel).await {
                        return;
                    }
                    continue 'sessions;
                }
            };

            // Valid samples push the watchdog deadline forward; invalid
            // ones do not.
            let mut deadline = Instant::now() + self.inner.config.watchdog;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        drop(guard);
                        return;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!("location watchdog: no valid fix, restarting watch");
                        drop(guard);
                        continue 'sessions;
                    }
                    item = prx.recv() => match item {
                        None => {
                            warn!("platform watch ended unexpectedly");
                            drop(guard);
                            if !self.backoff_sleep(&mut backoff, &cancel).await {
                                return;
                            }
                            continue 'sessions;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "platform watch error");
                            drop(guard);
                            if !self.backoff_sleep(&mut backoff, &cancel).await {
                                return;
                            }
                            continue 'sessions;
                        }
                        Some(Ok(sample)) => {
                            if let Some(sample) = self.inner.config.bounds.filter(sample) {
                                backoff.reset();
                                deadline = Instant::now() + self.inner.config.watchdog;
                                if tx.send(sample).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn start_platform_watch(
        &self,
        sink: mpsc::Sender<Result<GeoSample, LocationError>>,
    ) -> Result<WatchGuard, LocationError> {
        if let Some(native) = &self.inner.native {
            native
                .watch(
                    WatchRequest {
                        high_accuracy: false,
                        max_age: Duration::ZERO,
                    },
                    sink,
                )
                .await
        } else {
            let force = self.inner.config.force_browser_high_accuracy;
            self.inner
                .browser
                .watch(
                    WatchRequest {
                        high_accuracy: force,
                        max_age: if force {
                            Duration::ZERO
                        } else {
                            Duration::from_secs(10)
                        },
                    },
                    sink,
                )
                .await
        }
    }

    /// Sleep the next backoff delay; false when cancelled meanwhile.
    async fn backoff_sleep(&self, backoff: &mut Backoff, cancel: &CancellationToken) -> bool {
        let delay = backoff.next();
        debug!(delay_secs = delay.as_secs(), "location watch backing off");
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoloc::source::ReplaySource;

    fn inside(lat_offset: f64) -> GeoSample {
        GeoSample {
            lat: 20.02 + lat_offset,
            lng: -75.82,
            accuracy_meters: Some(10.0),
            reported_at_ms: 1_700_000_000_000,
        }
    }

    fn outside() -> GeoSample {
        GeoSample {
            lat: 25.76,
            lng: -80.19,
            accuracy_meters: Some(10.0),
            reported_at_ms: 1_700_000_000_000,
        }
    }

    fn browser_only(browser: ReplaySource) -> LocationStream<ReplaySource, ReplaySource> {
        LocationStream::browser_only(browser, StreamConfig::default())
    }

    #[test]
    fn backoff_escalates_then_caps_then_resets() {
        let mut backoff = Backoff::new();
        let observed: Vec<u64> = (0..6).map(|_| backoff.next().as_secs()).collect();
        assert_eq!(observed, vec![1, 2, 5, 10, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next().as_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn once_balanced_walks_the_fallback_chain() {
        let native = ReplaySource::new();
        let browser = ReplaySource::new();
        // Native fails, browser low fails, browser high succeeds.
        native.push_once(Err(LocationError::Unavailable));
        browser.push_once(Err(LocationError::Timeout));
        browser.push_once(Ok(inside(0.0)));

        let stream =
            LocationStream::with_native(native.clone(), browser.clone(), StreamConfig::default());
        let sample = stream.get_once_balanced().await.unwrap();
        assert_eq!(sample.lat, 20.02);

        let native_reqs = native.once_requests();
        assert_eq!(native_reqs.len(), 1);
        assert!(native_reqs[0].high_accuracy);

        let browser_reqs = browser.once_requests();
        assert_eq!(browser_reqs.len(), 2);
        assert!(!browser_reqs[0].high_accuracy);
        assert!(browser_reqs[1].high_accuracy);
    }

    #[tokio::test(start_paused = true)]
    async fn once_balanced_drops_out_of_area_fixes() {
        let browser = ReplaySource::new();
        browser.push_once(Ok(outside()));
        browser.push_once(Ok(outside()));

        let stream = browser_only(browser);
        assert!(stream.get_once_balanced().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn watch_filters_out_of_area_samples_silently() {
        let browser = ReplaySource::new();
        browser.push_watch(Duration::from_millis(10), Ok(outside()));
        browser.push_watch(Duration::from_millis(10), Ok(inside(0.0)));

        let stream = browser_only(browser);
        let mut watch = stream.watch_balanced();

        let first = watch.recv().await.unwrap();
        assert_eq!(first.lat, 20.02, "out-of-area sample must be skipped");
    }

    #[tokio::test(start_paused = true)]
    async fn provider_errors_back_off_and_success_resets() {
        let browser = ReplaySource::new();
        // Two errors, a valid fix, another error, another fix, scripted
        // up front so the replay never goes idle mid-test.
        browser.push_watch(Duration::ZERO, Err(LocationError::Provider("gps off".into())));
        browser.push_watch(Duration::ZERO, Err(LocationError::Provider("gps off".into())));
        browser.push_watch(Duration::ZERO, Ok(inside(0.0)));
        browser.push_watch(Duration::ZERO, Err(LocationError::Provider("gps off".into())));
        browser.push_watch(Duration::ZERO, Ok(inside(0.01)));

        let stream = browser_only(browser.clone());
        let mut watch = stream.watch_balanced();

        let start = Instant::now();
        let sample = watch.recv().await.unwrap();
        assert_eq!(sample.lat, 20.02);
        // 1 s after the first error + 2 s after the second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(10), "elapsed {elapsed:?}");
        assert_eq!(browser.watch_starts(), 3);

        // The success reset the schedule: the error that follows it only
        // delays the next fix by the first step (~1 s), not 5 s.
        let before = Instant::now();
        let sample = watch.recv().await.unwrap();
        assert_eq!(sample.lat, 20.03);
        let elapsed = before.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_restarts_a_silent_watch() {
        let browser = ReplaySource::new();
        browser.push_watch(Duration::ZERO, Ok(inside(0.0)));
        // Then silence; after the restart the next session delivers.
        browser.push_watch(Duration::from_secs(61), Ok(inside(0.01)));

        let stream = browser_only(browser.clone());
        let mut watch = stream.watch_balanced();

        assert_eq!(watch.recv().await.unwrap().lat, 20.02);

        // The second sample is scripted 61 s out, past the 60 s watchdog,
        // so the first session gets restarted before it plays.
        let sample = watch.recv().await.unwrap();
        assert_eq!(sample.lat, 20.03);
        assert!(browser.watch_starts() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_watch_tears_everything_down() {
        let browser = ReplaySource::new();
        browser.push_watch(Duration::from_millis(5), Ok(inside(0.0)));
        browser.push_watch(Duration::from_secs(3600), Ok(inside(0.01)));

        let stream = browser_only(browser.clone());
        let mut watch = stream.watch_balanced();
        watch.recv().await.unwrap();

        drop(watch);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(browser.active_watches(), 0, "platform watch must be torn down");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_valid_fix_times_out_to_none() {
        let browser = ReplaySource::new();
        let stream = browser_only(browser);
        let fix = stream.wait_for_valid_fix(Duration::from_secs(5)).await;
        assert!(fix.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_valid_fix_takes_first_watch_sample() {
        let browser = ReplaySource::new();
        // One-shot attempts fail; the watch delivers within the timeout.
        browser.push_watch(Duration::from_secs(2), Ok(inside(0.0)));

        let stream = browser_only(browser);
        let fix = stream.wait_for_valid_fix(Duration::from_secs(20)).await;
        assert_eq!(fix.unwrap().lat, 20.02);
    }
}
