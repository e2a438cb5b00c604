//! Development harness for the client core.
//!
//! Wires the real HTTP clients together from environment configuration,
//! restores the session within a startup budget, and runs the planner
//! engine and the passenger presence reporter until interrupted. The
//! location source is a replay source here; on device the platform
//! bindings implement `LocationSource` instead.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use ride_client::api::{
    AuthConfig, HttpAuthClient, HttpMapsClient, HttpPresenceClient, HttpRideClient, MapsConfig,
    PresenceRole, RideConfig,
};
use ride_client::geoloc::{LocationStream, ReplaySource, StreamConfig};
use ride_client::planner::{EngineConfig, PlanCache, PlannerStore, TripPlannerEngine};
use ride_client::presence::{PresenceReporter, ReporterProfile};
use ride_client::session::{FileTokenStore, SessionManager, SessionStore, now_ms};

/// Bootstrap never waits longer than this for session restoration.
const RESTORE_BUDGET: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let api_base = std::env::var("RIDE_API_URL").unwrap_or_else(|_| {
        warn!("RIDE_API_URL not set; using http://localhost:3000/api");
        "http://localhost:3000/api".to_string()
    });
    let maps_token = std::env::var("MAPS_ACCESS_TOKEN").unwrap_or_else(|_| {
        warn!("MAPS_ACCESS_TOKEN not set; geocoding and routing will fail");
        String::new()
    });
    let data_dir: PathBuf = std::env::var("RIDE_DATA_DIR")
        .unwrap_or_else(|_| "data".to_string())
        .into();

    let auth =
        HttpAuthClient::new(AuthConfig::new(api_base.as_str())).expect("failed to build auth client");
    let maps = HttpMapsClient::new(MapsConfig::new(maps_token)).expect("failed to build maps client");
    let ride =
        HttpRideClient::new(RideConfig::new(api_base.as_str())).expect("failed to build ride client");
    let presence = HttpPresenceClient::new(api_base.as_str(), PresenceRole::Passenger, 15)
        .expect("failed to build presence client");

    // Session restore, raced against the startup budget.
    let session = SessionStore::new();
    let tokens = FileTokenStore::new(data_dir.join("tokens.json"));
    let manager = SessionManager::new(auth, tokens, session.clone());
    let restored = manager.restore_session_with_timeout(RESTORE_BUDGET).await;
    info!(restored, "session restore finished");

    // Planner engine over a shared location stream.
    let location = LocationStream::<ReplaySource, ReplaySource>::browser_only(
        ReplaySource::new(),
        StreamConfig::default(),
    );
    let engine = TripPlannerEngine::new(
        maps,
        ride,
        location.clone(),
        PlannerStore::new(),
        session.clone(),
        Some(PlanCache::new(data_dir.join("plan.json"))),
        EngineConfig::default(),
    );
    engine.start().await;
    engine.ensure_catalog_loaded().await;

    let reporter = PresenceReporter::new(presence, location, ReporterProfile::passenger());
    if session.snapshot().is_authenticated(now_ms()) {
        reporter.bootstrap_on_login().await;
    }

    info!("client core running; press ctrl-c to stop");
    let _ = tokio::signal::ctrl_c().await;

    reporter.stop();
    engine.shutdown();
    manager.cancel_auto_refresh();
    info!("shut down");
}
