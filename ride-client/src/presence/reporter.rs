//! Presence reporter.
//!
//! Reports the holder's position only when it is meaningful: a move far
//! enough from the last *reported* position, or a heartbeat when nothing
//! was reported for the role's interval. Everything is throttled by a
//! leading-edge 3 s client-side guard so the backend is never flooded,
//! whatever the triggers do. Ping failures are logged and the stream
//! stays alive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{LocationPing, PresenceAck, PresenceApi};
use crate::domain::{GeoSample, LatLng};
use crate::geoloc::{LocationSource, LocationStream, LocationWatch};

/// Per-role reporting parameters.
#[derive(Debug, Clone)]
pub struct ReporterProfile {
    /// A move below this distance from the last reported position does
    /// not trigger a report.
    pub move_threshold_m: f64,
    /// Report at least this often, moved or not.
    pub heartbeat: Duration,
    /// Leading-edge minimum spacing between any two reports.
    pub min_interval: Duration,
    /// Quiet period before a location sample is considered settled.
    pub debounce: Duration,
    /// Consecutive samples closer than this are micro-jitter and are
    /// dropped before any trigger logic.
    pub jitter_floor_m: f64,
}

impl ReporterProfile {
    pub fn driver() -> Self {
        Self {
            move_threshold_m: 75.0,
            heartbeat: Duration::from_secs(45),
            min_interval: Duration::from_secs(3),
            debounce: Duration::from_millis(500),
            jitter_floor_m: 5.0,
        }
    }

    pub fn passenger() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            ..Self::driver()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Watch + move triggers + heartbeat.
    Active,
    /// Heartbeat pings only, no location watch.
    HeartbeatOnly,
}

#[derive(Default)]
struct ReportState {
    /// Time of the last successful report.
    last_report: Option<Instant>,
    /// Position of the last successful positioned report.
    last_sent_pos: Option<LatLng>,
    /// Time of the last report that passed the throttle (leading edge).
    last_pass: Option<Instant>,
}

struct ReporterInner<P, N, B> {
    api: P,
    location: LocationStream<N, B>,
    profile: ReporterProfile,
    running: Mutex<Option<CancellationToken>>,
    state: Mutex<ReportState>,
    acks: watch::Sender<Option<PresenceAck>>,
}

/// Presence reporter handle. Cheap to clone; all clones share state.
pub struct PresenceReporter<P, N, B> {
    inner: Arc<ReporterInner<P, N, B>>,
}

impl<P, N, B> Clone for PresenceReporter<P, N, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, N, B> PresenceReporter<P, N, B>
where
    P: PresenceApi,
    N: LocationSource,
    B: LocationSource,
{
    pub fn new(api: P, location: LocationStream<N, B>, profile: ReporterProfile) -> Self {
        let (acks, _) = watch::channel(None);
        Self {
            inner: Arc::new(ReporterInner {
                api,
                location,
                profile,
                running: Mutex::new(None),
                state: Mutex::new(ReportState::default()),
                acks,
            }),
        }
    }

    /// Observe ping acknowledgements (latest wins).
    pub fn subscribe_acks(&self) -> watch::Receiver<Option<PresenceAck>> {
        self.inner.acks.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().unwrap().is_some()
    }

    /// Start full reporting (watch + move + heartbeat). Idempotent: a
    /// running reporter is restarted, never doubled.
    pub fn start(&self) {
        self.start_mode(Mode::Active);
    }

    /// Start heartbeat-only reporting: presence without a continuous
    /// position stream.
    pub fn start_heartbeat_only(&self) {
        self.start_mode(Mode::HeartbeatOnly);
    }

    /// Stop reporting and reset counters. No-op when already stopped.
    pub fn stop(&self) {
        if let Some(token) = self.inner.running.lock().unwrap().take() {
            token.cancel();
            debug!("presence reporter stopped");
        }
        *self.inner.state.lock().unwrap() = ReportState::default();
    }

    /// Post-login bootstrap: one best-effort fix + ping, then
    /// heartbeat-only mode.
    pub async fn bootstrap_on_login(&self) {
        let sample = self.inner.location.get_once_balanced().await;
        self.start_heartbeat_only();
        if let Some(sample) = sample {
            self.try_report(Some(&sample)).await;
        }
    }

    /// Leave active mode but keep presence alive.
    pub fn back_to_heartbeat_only(&self) {
        self.start_heartbeat_only();
    }

    fn start_mode(&self, mode: Mode) {
        self.stop();
        let token = CancellationToken::new();
        *self.inner.running.lock().unwrap() = Some(token.clone());
        debug!(?mode, "presence reporter started");

        let reporter = self.clone();
        tokio::spawn(async move { reporter.run(mode, token).await });
    }

    async fn run(self, mode: Mode, cancel: CancellationToken) {
        let mut watch: Option<LocationWatch> = match mode {
            Mode::Active => Some(self.inner.location.watch_balanced()),
            Mode::HeartbeatOnly => None,
        };

        // Heartbeat eligibility is checked every second, like a clock
        // tick, not scheduled from the last report.
        let mut tick =
            tokio::time::interval_at(Instant::now() + Duration::from_secs(1), Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Debounce: the last sample waiting out its quiet period.
        let mut pending: Option<GeoSample> = None;
        let mut settle_at: Option<Instant> = None;
        // Jitter reference: last sample that survived the debounce.
        let mut last_emitted: Option<LatLng> = None;

        loop {
            let debounce_wait = async {
                match settle_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            let next_sample = async {
                match watch.as_mut() {
                    Some(w) => w.recv().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return,

                sample = next_sample => match sample {
                    Some(sample) => {
                        pending = Some(sample);
                        settle_at = Some(Instant::now() + self.inner.profile.debounce);
                    }
                    None => {
                        // The stream only ends when cancelled underneath us.
                        watch = None;
                    }
                },

                _ = debounce_wait => {
                    settle_at = None;
                    let Some(sample) = pending.take() else { continue };
                    let position = sample.position();

                    // Micro-jitter gate against the previous settled sample.
                    if let Some(last) = last_emitted {
                        if last.distance_meters(&position) < self.inner.profile.jitter_floor_m {
                            continue;
                        }
                    }
                    last_emitted = Some(position);

                    let last_sent = self.inner.state.lock().unwrap().last_sent_pos;
                    let moved = match last_sent {
                        None => true,
                        Some(last) => {
                            last.distance_meters(&position) >= self.inner.profile.move_threshold_m
                        }
                    };
                    if moved {
                        self.try_report(Some(&sample)).await;
                    }
                },

                _ = tick.tick() => {
                    let due = {
                        let state = self.inner.state.lock().unwrap();
                        state
                            .last_report
                            .is_none_or(|at| at.elapsed() >= self.inner.profile.heartbeat)
                    };
                    if due {
                        self.try_report(None).await;
                    }
                },
            }
        }
    }

    /// Send one report unless the leading-edge throttle suppresses it.
    /// Returns whether a report was actually sent and acknowledged.
    async fn try_report(&self, sample: Option<&GeoSample>) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap();
            let now = Instant::now();
            if state
                .last_pass
                .is_some_and(|at| now - at < self.inner.profile.min_interval)
            {
                return false;
            }
            state.last_pass = Some(now);
        }

        let ping = match sample {
            Some(s) => LocationPing::at(s.lat, s.lng, s.accuracy_meters, s.reported_at_rfc3339()),
            None => LocationPing::heartbeat(chrono::Utc::now().to_rfc3339()),
        };

        match self.inner.api.ping(ping).await {
            Ok(ack) => {
                {
                    let mut state = self.inner.state.lock().unwrap();
                    state.last_report = Some(Instant::now());
                    if let Some(s) = sample {
                        state.last_sent_pos = Some(s.position());
                    }
                }
                let _ = self.inner.acks.send(Some(ack));
                true
            }
            Err(e) => {
                warn!(error = %e, "presence ping failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockPresenceApi;
    use crate::domain::AvailabilitySnapshot;
    use crate::geoloc::{ReplaySource, StreamConfig};
    use crate::presence::availability::{
        AvailabilityStore, attach_auto_lifecycle, forward_acks_to_store,
    };

    type TestReporter = PresenceReporter<MockPresenceApi, ReplaySource, ReplaySource>;

    fn sample(lat: f64, lng: f64) -> GeoSample {
        GeoSample {
            lat,
            lng,
            accuracy_meters: Some(8.0),
            reported_at_ms: 1_700_000_000_000,
        }
    }

    fn reporter_with(browser: &ReplaySource, profile: ReporterProfile) -> TestReporter {
        PresenceReporter::new(
            MockPresenceApi::default(),
            LocationStream::browser_only(browser.clone(), StreamConfig::default()),
            profile,
        )
    }

    impl TestReporter {
        fn api(&self) -> &MockPresenceApi {
            &self.inner.api
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_is_dropped_and_moves_fire_at_threshold() {
        let browser = ReplaySource::new();
        // Base fix, then ~3 m of jitter, then an ~80 m move.
        browser.push_watch(Duration::from_millis(100), Ok(sample(20.02, -75.82)));
        browser.push_watch(Duration::from_millis(900), Ok(sample(20.020_027, -75.82)));
        browser.push_watch(Duration::from_secs(3), Ok(sample(20.020_72, -75.82)));

        let reporter = reporter_with(&browser, ReporterProfile::driver());
        reporter.start();

        tokio::time::sleep(Duration::from_secs(10)).await;

        let pings = reporter.api().pings.lock().unwrap().clone();
        let positioned: Vec<_> = pings.iter().filter(|p| p.has_position()).collect();
        assert_eq!(positioned.len(), 2, "jittered sample must not report");
        assert_eq!(positioned[0].lat, Some(20.02));
        assert_eq!(positioned[1].lat, Some(20.020_72));
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn sub_threshold_move_does_not_report() {
        let browser = ReplaySource::new();
        // Base fix, then a ~22 m move: above the jitter floor, below the
        // 75 m move threshold.
        browser.push_watch(Duration::from_millis(100), Ok(sample(20.02, -75.82)));
        browser.push_watch(Duration::from_secs(4), Ok(sample(20.0202, -75.82)));

        let reporter = reporter_with(&browser, ReporterProfile::driver());
        reporter.start();

        tokio::time::sleep(Duration::from_secs(10)).await;

        let positioned = reporter.api().positioned_ping_count();
        assert_eq!(positioned, 1, "only the first fix reports");
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_on_the_role_interval() {
        let browser = ReplaySource::new();
        let reporter = reporter_with(&browser, ReporterProfile::passenger());
        reporter.start_heartbeat_only();

        // First tick: nothing reported yet, heartbeat fires.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(reporter.api().ping_count(), 1);
        assert_eq!(reporter.api().positioned_ping_count(), 0);

        // Next heartbeat only after the 60 s passenger interval.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(reporter.api().ping_count(), 1);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(reporter.api().ping_count(), 2);
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_is_leading_edge_with_minimum_spacing() {
        let browser = ReplaySource::new();
        // A 1 s heartbeat against a 3 s throttle: reports pass at ~1 s,
        // ~4 s, ~7 s.
        let profile = ReporterProfile {
            heartbeat: Duration::from_secs(1),
            ..ReporterProfile::driver()
        };
        let reporter = reporter_with(&browser, profile);
        reporter.start_heartbeat_only();

        tokio::time::sleep(Duration::from_millis(8_500)).await;
        assert_eq!(reporter.api().ping_count(), 3);
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_unsubscribes() {
        let browser = ReplaySource::new();
        let reporter = reporter_with(&browser, ReporterProfile::driver());

        reporter.start();
        reporter.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reporter.is_running());
        assert_eq!(
            browser.active_watches(),
            1,
            "restart must not double-subscribe"
        );

        reporter.stop();
        reporter.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reporter.is_running());
        assert_eq!(browser.active_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_failures_keep_the_stream_alive() {
        let browser = ReplaySource::new();
        let profile = ReporterProfile {
            heartbeat: Duration::from_secs(1),
            ..ReporterProfile::driver()
        };
        let reporter = reporter_with(&browser, profile);
        *reporter.api().ack.lock().unwrap() = Err(crate::api::ApiError::Network("down".into()));
        reporter.start_heartbeat_only();

        tokio::time::sleep(Duration::from_millis(8_500)).await;
        // Attempts keep coming despite failures.
        assert!(reporter.api().ping_count() >= 2);
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_pings_once_then_heartbeats() {
        let browser = ReplaySource::new();
        browser.push_once(Ok(sample(20.02, -75.82)));
        let reporter = reporter_with(&browser, ReporterProfile::passenger());

        reporter.bootstrap_on_login().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(reporter.is_running());
        assert_eq!(reporter.api().positioned_ping_count(), 1);
        // The bootstrap ping counts as a report: no immediate heartbeat.
        assert_eq!(reporter.api().ping_count(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(reporter.api().ping_count(), 2);
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn auto_lifecycle_follows_matchable_predicate() {
        let browser = ReplaySource::new();
        let reporter = reporter_with(&browser, ReporterProfile::driver());
        let store = AvailabilityStore::new();
        let lifecycle = attach_auto_lifecycle(reporter.clone(), store.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reporter.is_running());

        store.set_snapshot(AvailabilitySnapshot {
            is_online: true,
            is_available_for_trips: true,
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(reporter.is_running());

        store.set_snapshot(AvailabilitySnapshot {
            is_online: true,
            is_available_for_trips: true,
            current_trip_id: Some("trip-1".into()),
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reporter.is_running());

        lifecycle.cancel();
        reporter.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn ack_feedback_stops_reporter_without_relooping() {
        let browser = ReplaySource::new();
        let profile = ReporterProfile {
            heartbeat: Duration::from_secs(1),
            ..ReporterProfile::driver()
        };
        let reporter = reporter_with(&browser, profile);

        // Every ping ack says a trip is now assigned.
        *reporter.api().ack.lock().unwrap() = Ok(PresenceAck {
            current_location: None,
            availability: AvailabilitySnapshot {
                is_online: true,
                is_available_for_trips: true,
                current_trip_id: Some("trip-9".into()),
                ..Default::default()
            },
        });

        let store = AvailabilityStore::new();
        let lifecycle = attach_auto_lifecycle(reporter.clone(), store.clone());
        let forward = forward_acks_to_store(&reporter, store.clone());

        store.set_snapshot(AvailabilitySnapshot {
            is_online: true,
            is_available_for_trips: true,
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_secs(3)).await;

        // The first heartbeat's ack marked the driver unmatchable; the
        // lifecycle stopped the reporter and settled there.
        assert!(!reporter.is_running());
        let count_after_stop = reporter.api().ping_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(reporter.api().ping_count(), count_after_stop);

        lifecycle.cancel();
        forward.cancel();
    }
}
