//! Driver availability state and automatic reporter lifecycle.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::PresenceApi;
use crate::domain::AvailabilitySnapshot;
use crate::geoloc::LocationSource;

use super::reporter::PresenceReporter;

/// Owner of the backend's availability snapshot for this driver.
#[derive(Debug, Clone)]
pub struct AvailabilityStore {
    tx: watch::Sender<AvailabilitySnapshot>,
}

impl Default for AvailabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AvailabilitySnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> AvailabilitySnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AvailabilitySnapshot> {
        self.tx.subscribe()
    }

    pub fn set_snapshot(&self, snapshot: AvailabilitySnapshot) {
        self.tx.send_modify(|s| *s = snapshot);
    }
}

/// Drive the reporter's running state from the matchable predicate:
/// start it when the driver becomes matchable, stop it when they stop
/// being matchable. Returns a token that detaches the lifecycle.
///
/// The reporter's own running flag is not part of the watched snapshot,
/// and desired state is compared with actual before acting, so a
/// start/stop cannot re-trigger this loop.
pub fn attach_auto_lifecycle<P, N, B>(
    reporter: PresenceReporter<P, N, B>,
    store: AvailabilityStore,
) -> CancellationToken
where
    P: PresenceApi,
    N: LocationSource,
    B: LocationSource,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut rx = store.subscribe();
        loop {
            let matchable = rx.borrow_and_update().is_matchable();
            if matchable && !reporter.is_running() {
                debug!("driver became matchable, starting reporter");
                reporter.start();
            } else if !matchable && reporter.is_running() {
                debug!("driver no longer matchable, stopping reporter");
                reporter.stop();
            }

            tokio::select! {
                _ = token.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    });

    cancel
}

/// Forward availability snapshots from ping acknowledgements into the
/// store: the feedback loop that lets a ping response (trip assigned,
/// driver blocked) stop the reporter through the auto lifecycle.
pub fn forward_acks_to_store<P, N, B>(
    reporter: &PresenceReporter<P, N, B>,
    store: AvailabilityStore,
) -> CancellationToken
where
    P: PresenceApi,
    N: LocationSource,
    B: LocationSource,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut acks = reporter.subscribe_acks();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                changed = acks.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let ack = acks.borrow_and_update().clone();
                    if let Some(ack) = ack {
                        store.set_snapshot(ack.availability);
                    }
                }
            }
        }
    });

    cancel
}
