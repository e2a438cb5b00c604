//! Trip planner engine.
//!
//! Reacts to planner-state changes and user input to keep the state
//! consistent with external reality (geocoding, routing, pricing)
//! without redundant network calls. The reactive rules run off the
//! store's watch channel: every settled state is evaluated once, and
//! each rule carries its own change-detection key so repeated
//! evaluations of an unchanged state never re-trigger a call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moka::future::Cache as MokaCache;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{
    ApiError, CreateTripRequest, MapsApi, PaymentMode, RideApi, SearchOptions, TripResponse,
    TripStop,
};
use crate::domain::{
    DEFAULT_CURRENCY, EstimateRequest, GeoBounds, GeoSample, LatLng, PlaceSuggestion,
    RouteSummary, is_coord_like, rounded_key,
};
use crate::geoloc::{LocationSource, LocationStream};
use crate::session::{SessionStore, now_ms};

use super::cache::{PlanCache, PlanSlot};
use super::state::{PlannerState, PlannerStore};

/// Planner operation failures surfaced to callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlannerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A trip was requested without identity or selections; fails locally
    /// with no network call.
    #[error("missing trip preconditions")]
    MissingPrecondition,
}

/// Engine tuning. Defaults match production behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiet period before a destination query is dispatched.
    pub search_debounce: Duration,
    /// Queries shorter than this only clear the suggestion list.
    pub min_query_chars: usize,
    /// Cadence at which the live-follow applies the latest fix.
    pub follow_sample_period: Duration,
    /// Live-follow ignores moves smaller than this.
    pub follow_min_displacement_m: f64,
    pub bounds: GeoBounds,
    pub currency: String,
    /// Capacity of the reverse-geocode label cache.
    pub label_cache_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_debounce: Duration::from_millis(250),
            min_query_chars: 3,
            follow_sample_period: Duration::from_secs(4),
            follow_min_displacement_m: 40.0,
            bounds: GeoBounds::SERVICE_AREA,
            currency: DEFAULT_CURRENCY.to_string(),
            label_cache_capacity: 512,
        }
    }
}

#[derive(Default)]
struct EstimateGuard {
    /// Serialized request of the last dispatched estimate.
    last_key: Option<String>,
    in_flight: bool,
}

#[derive(Default)]
struct CatalogGuard {
    categories_loading: bool,
    classes_loading: bool,
}

type PersistKey = ((i64, i64), Option<String>);

#[derive(Default)]
struct PersistedKeys {
    origin: Option<PersistKey>,
    destination: Option<PersistKey>,
}

type RoutePair = ((i64, i64), (i64, i64));

enum LabelTarget {
    Origin,
    Destination,
}

struct EngineInner<M, R, N, B> {
    maps: M,
    ride: R,
    location: LocationStream<N, B>,
    store: PlannerStore,
    session: SessionStore,
    cache: Option<PlanCache>,
    label_cache: MokaCache<(i64, i64), String>,
    search_tx: mpsc::Sender<String>,
    search_rx: Mutex<Option<mpsc::Receiver<String>>>,
    route_in_flight: AtomicBool,
    /// Endpoint pair of the last failed auto-route, so a persistent
    /// provider failure does not spin; any endpoint change or manual
    /// recalculation clears it.
    route_failed_for: Mutex<Option<RoutePair>>,
    estimate: Mutex<EstimateGuard>,
    catalog: Mutex<CatalogGuard>,
    persisted: Mutex<PersistedKeys>,
    cancel: CancellationToken,
    config: EngineConfig,
}

/// The trip planner engine. Cheap to clone; all clones drive the same
/// state.
pub struct TripPlannerEngine<M, R, N, B> {
    inner: Arc<EngineInner<M, R, N, B>>,
}

impl<M, R, N, B> Clone for TripPlannerEngine<M, R, N, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Drop a label that is absent, blank, or just a coordinate pair.
fn sanitize_label(label: Option<&str>) -> Option<String> {
    let label = label?.trim();
    if label.is_empty() || is_coord_like(label) {
        None
    } else {
        Some(label.to_string())
    }
}

impl<M, R, N, B> TripPlannerEngine<M, R, N, B>
where
    M: MapsApi,
    R: RideApi,
    N: LocationSource,
    B: LocationSource,
{
    pub fn new(
        maps: M,
        ride: R,
        location: LocationStream<N, B>,
        store: PlannerStore,
        session: SessionStore,
        cache: Option<PlanCache>,
        config: EngineConfig,
    ) -> Self {
        let (search_tx, search_rx) = mpsc::channel(32);
        let label_cache = MokaCache::builder()
            .max_capacity(config.label_cache_capacity)
            .build();
        Self {
            inner: Arc::new(EngineInner {
                maps,
                ride,
                location,
                store,
                session,
                cache,
                label_cache,
                search_tx,
                search_rx: Mutex::new(Some(search_rx)),
                route_in_flight: AtomicBool::new(false),
                route_failed_for: Mutex::new(None),
                estimate: Mutex::new(EstimateGuard::default()),
                catalog: Mutex::new(CatalogGuard::default()),
                persisted: Mutex::new(PersistedKeys::default()),
                cancel: CancellationToken::new(),
                config,
            }),
        }
    }

    pub fn store(&self) -> &PlannerStore {
        &self.inner.store
    }

    /// Hydrate cached endpoints, seed the origin, and start the reactive
    /// loop, the autocomplete pipeline, and the live location follow.
    pub async fn start(&self) {
        self.hydrate_from_cache();
        self.seed_origin().await;

        let engine = self.clone();
        tokio::spawn(async move { engine.reactive_loop().await });

        if let Some(rx) = self.inner.search_rx.lock().unwrap().take() {
            let engine = self.clone();
            tokio::spawn(async move { engine.autocomplete_loop(rx).await });
        }

        let engine = self.clone();
        tokio::spawn(async move { engine.follow_location().await });
    }

    /// Stop every engine task. The state itself is left as-is.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    /// Load cached endpoints unless the state already has them.
    fn hydrate_from_cache(&self) {
        let Some(cache) = &self.inner.cache else {
            return;
        };
        let snap = self.inner.store.snapshot();

        if snap.origin_point.is_none() {
            if let Some(entry) = cache.load(PlanSlot::Origin, now_ms()) {
                self.inner.store.set_origin_point(Some(entry.point), true);
                self.inner.store.set_origin_label(entry.label);
            }
        }
        if snap.destination_point.is_none() {
            if let Some(entry) = cache.load(PlanSlot::Destination, now_ms()) {
                self.inner
                    .store
                    .set_destination_point(entry.point, entry.label);
            }
        }
    }

    /// Seed the origin from the profile's last known location, falling
    /// back to a one-shot GPS fix. Either source only replaces the
    /// current origin when it moved far enough to matter.
    async fn seed_origin(&self) {
        let current = self.inner.store.snapshot().origin_point;
        let threshold = self.inner.config.follow_min_displacement_m;

        let profile_point = self
            .inner
            .session
            .snapshot()
            .user
            .and_then(|u| u.current_location)
            .and_then(|p| p.to_lat_lng())
            .filter(|p| self.inner.config.bounds.contains(*p));

        if let Some(p) = profile_point {
            let moved = current.is_none_or(|c| c.distance_meters(&p) > threshold);
            if moved {
                self.set_origin_resolving_label(p);
            }
            return;
        }

        if current.is_none() {
            if let Some(sample) = self.inner.location.get_once_balanced().await {
                let p = sample.position();
                if self.inner.config.bounds.contains(p) {
                    self.set_origin_resolving_label(p);
                }
            }
        }
    }

    fn set_origin_resolving_label(&self, p: LatLng) {
        self.inner.store.set_origin_point(Some(p), true);
        self.ensure_label(p, None, LabelTarget::Origin);
    }

    // ------------------------------------------------------------------
    // Reactive rules
    // ------------------------------------------------------------------

    async fn reactive_loop(self) {
        let mut rx = self.inner.store.subscribe();
        loop {
            let snap = rx.borrow_and_update().clone();
            self.persistence_rule(&snap);
            self.auto_route_rule(&snap);
            self.auto_estimate_rule(&snap);

            tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Persist origin/destination whenever point or label changed;
    /// clearing a point removes its cache entry.
    fn persistence_rule(&self, snap: &PlannerState) {
        let Some(cache) = &self.inner.cache else {
            return;
        };
        let mut persisted = self.inner.persisted.lock().unwrap();

        let origin_key: Option<PersistKey> = snap
            .origin_point
            .map(|p| (rounded_key(p), snap.origin_label.clone()));
        if origin_key != persisted.origin {
            let result = match snap.origin_point {
                Some(p) => cache.save(PlanSlot::Origin, p, snap.origin_label.as_deref(), now_ms()),
                None => cache.clear(PlanSlot::Origin),
            };
            if let Err(e) = result {
                warn!(error = %e, "origin cache update failed");
            }
            persisted.origin = origin_key;
        }

        let dest_label = sanitize_label(Some(snap.destination_text.as_str()));
        let dest_key: Option<PersistKey> = snap
            .destination_point
            .map(|p| (rounded_key(p), dest_label.clone()));
        if dest_key != persisted.destination {
            let result = match snap.destination_point {
                Some(p) => {
                    cache.save(PlanSlot::Destination, p, dest_label.as_deref(), now_ms())
                }
                None => cache.clear(PlanSlot::Destination),
            };
            if let Err(e) = result {
                warn!(error = %e, "destination cache update failed");
            }
            persisted.destination = dest_key;
        }
    }

    /// Compute the route when both endpoints are set, none exists yet,
    /// and no load is in progress.
    fn auto_route_rule(&self, snap: &PlannerState) {
        if !snap.ready_to_route()
            || snap.route_summary.is_some()
            || snap.loading
            || self.inner.route_in_flight.load(Ordering::SeqCst)
        {
            return;
        }

        // Do not spin on a pair that already failed; a manual recalc or
        // any endpoint change re-arms the rule.
        if let (Some(o), Some(d)) = (snap.origin_point, snap.destination_point) {
            let pair = (rounded_key(o), rounded_key(d));
            if *self.inner.route_failed_for.lock().unwrap() == Some(pair) {
                return;
            }
        }

        self.trigger_route_compute();
    }

    fn trigger_route_compute(&self) {
        if self
            .inner
            .route_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.inner.store.set_loading(true);

        let engine = self.clone();
        tokio::spawn(async move {
            engine.compute_route().await;
            // Release the guard before the loading flag settles, so the
            // state change it produces re-evaluates the rules unguarded.
            engine.inner.route_in_flight.store(false, Ordering::SeqCst);
            engine.inner.store.set_loading(false);
        });
    }

    async fn compute_route(&self) -> bool {
        let snap = self.inner.store.snapshot();
        let (Some(origin), Some(destination)) = (snap.origin_point, snap.destination_point) else {
            return false;
        };

        let origin_label = sanitize_label(snap.origin_label.as_deref());
        let destination_label = sanitize_label(Some(snap.destination_text.as_str()));

        let result = self.inner.maps.route(origin, destination).await;

        // The endpoints may have changed while the call was in flight; a
        // summary for the old pair must not overwrite the new plan.
        let current = self.inner.store.snapshot();
        if current.origin_point != Some(origin) || current.destination_point != Some(destination)
        {
            debug!("discarding route computed for superseded endpoints");
            return false;
        }

        match result {
            Ok(result) => {
                let summary = RouteSummary {
                    origin,
                    destination,
                    origin_label: origin_label.clone(),
                    destination_label: destination_label.clone(),
                    distance_km: (result.distance_km * 10.0).round() / 10.0,
                    duration_min: result.duration_min.round() as u32,
                    geometry: result.geometry,
                };
                self.inner.store.set_route_summary(Some(summary));
                self.inner.store.set_error(None);
                *self.inner.route_failed_for.lock().unwrap() = None;

                // Resolve missing labels in the background.
                self.ensure_label(origin, origin_label, LabelTarget::Origin);
                self.ensure_label(destination, destination_label, LabelTarget::Destination);
                true
            }
            Err(e) => {
                warn!(error = %e, "route computation failed");
                self.inner.store.set_route_summary(None);
                self.inner
                    .store
                    .set_error(Some("No se pudo calcular la ruta".to_string()));
                *self.inner.route_failed_for.lock().unwrap() =
                    Some((rounded_key(origin), rounded_key(destination)));
                false
            }
        }
    }

    /// Estimate the fare when a route and both selections exist. The
    /// serialized request is the change-detection key: byte-identical
    /// inputs never re-trigger a call, and only one estimate is in
    /// flight at a time.
    fn auto_estimate_rule(&self, snap: &PlannerState) {
        let (Some(_), Some(vehicle_id), Some(class_id), Some(origin), Some(destination)) = (
            snap.route_summary.as_ref(),
            snap.selected_vehicle_id.as_ref(),
            snap.selected_service_class_id.as_ref(),
            snap.origin_point,
            snap.destination_point,
        ) else {
            return;
        };

        let req = EstimateRequest {
            vehicle_category_id: vehicle_id.clone(),
            service_class_id: class_id.clone(),
            pickup: origin,
            stops: vec![destination],
            currency: self.inner.config.currency.clone(),
        };
        let Ok(key) = serde_json::to_string(&req) else {
            return;
        };

        {
            let mut guard = self.inner.estimate.lock().unwrap();
            if guard.in_flight || guard.last_key.as_deref() == Some(key.as_str()) {
                return;
            }
            guard.last_key = Some(key);
            guard.in_flight = true;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.inner.ride.estimate(req).await;
            // Release the guard before the quote lands: the quote's state
            // change re-evaluates the rules, and inputs that changed
            // while this call was in flight get their estimate then.
            engine.inner.estimate.lock().unwrap().in_flight = false;
            match result {
                Ok(quote) => engine.inner.store.set_fare_quote(Some(quote)),
                Err(e) => {
                    warn!(error = %e, "fare estimate failed");
                    engine.inner.store.set_fare_quote(None);
                }
            }
        });
    }

    /// Force a re-estimate on the next evaluation even if inputs are
    /// unchanged.
    pub fn refresh_estimate(&self) {
        self.inner.estimate.lock().unwrap().last_key = None;
        let snap = self.inner.store.snapshot();
        self.auto_estimate_rule(&snap);
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Resolve a human label for `point` unless `current` is already a
    /// decent one. Lookups go through the rounded-coordinate cache so the
    /// same spot is never reverse-geocoded twice.
    fn ensure_label(&self, point: LatLng, current: Option<String>, target: LabelTarget) {
        let decent = current
            .as_deref()
            .is_some_and(|c| c.trim().len() >= 3 && !is_coord_like(c));
        if decent {
            return;
        }

        let engine = self.clone();
        tokio::spawn(async move {
            let label = engine.resolve_label(point).await;
            match target {
                LabelTarget::Origin => engine.inner.store.set_origin_label(Some(label)),
                LabelTarget::Destination => engine.inner.store.set_destination_text(label),
            }
        });
    }

    async fn resolve_label(&self, point: LatLng) -> String {
        let key = rounded_key(point);
        if let Some(label) = self.inner.label_cache.get(&key).await {
            return label;
        }
        let label = match self.inner.maps.reverse(point, true).await {
            Ok(Some(result)) => result.label,
            Ok(None) => point.to_label(),
            Err(e) => {
                debug!(error = %e, "reverse geocode failed");
                point.to_label()
            }
        };
        self.inner.label_cache.insert(key, label.clone()).await;
        label
    }

    // ------------------------------------------------------------------
    // Autocomplete
    // ------------------------------------------------------------------

    /// Feed a destination search keystroke.
    pub fn on_destination_input(&self, text: &str) {
        self.inner.store.set_destination_text(text);
        // A full queue means older keystrokes are still pending; dropping
        // this one is fine, the debounce only cares about the latest.
        let _ = self.inner.search_tx.try_send(text.to_string());
    }

    async fn autocomplete_loop(self, mut rx: mpsc::Receiver<String>) {
        let mut last_query: Option<String> = None;

        loop {
            let mut text = tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                received = rx.recv() => match received {
                    Some(t) => t,
                    None => return,
                },
            };

            // Debounce: absorb newer keystrokes until a quiet period.
            loop {
                tokio::select! {
                    _ = self.inner.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.inner.config.search_debounce) => break,
                    received = rx.recv() => match received {
                        Some(t) => text = t,
                        None => return,
                    },
                }
            }

            let trimmed = text.trim().to_string();
            if last_query.as_deref() == Some(trimmed.as_str()) {
                continue;
            }
            last_query = Some(trimmed.clone());

            if trimmed.chars().count() < self.inner.config.min_query_chars {
                self.inner.store.clear_suggestions();
                continue;
            }

            self.inner.store.set_loading(true);
            let items = self.search_tiers(&trimmed).await;
            self.inner.store.set_suggestions(items);
            self.inner.store.set_loading(false);
        }
    }

    /// Three-tier search: clamped to the province, then clamped with a
    /// proximity bias toward the origin, then unclamped. Each tier
    /// short-circuits on the first non-empty result. A failed search
    /// yields an empty list plus the error flag, never a panic or a
    /// thrown error.
    async fn search_tiers(&self, query: &str) -> Vec<PlaceSuggestion> {
        let fail = |e: ApiError| {
            warn!(error = %e, "place search failed");
            self.inner
                .store
                .set_error(Some("No se pudo autocompletar".to_string()));
            Vec::new()
        };

        match self
            .inner
            .maps
            .search(query.to_string(), SearchOptions::default())
            .await
        {
            Ok(items) if !items.is_empty() => return items,
            Ok(_) => {}
            Err(e) => return fail(e),
        }

        if let Some(origin) = self.inner.store.snapshot().origin_point {
            match self
                .inner
                .maps
                .search(
                    query.to_string(),
                    SearchOptions::default().with_proximity(origin),
                )
                .await
            {
                Ok(items) if !items.is_empty() => return items,
                Ok(_) => {}
                Err(e) => return fail(e),
            }
        }

        match self
            .inner
            .maps
            .search(query.to_string(), SearchOptions::default().unclamped())
            .await
        {
            Ok(items) => items,
            Err(e) => fail(e),
        }
    }

    /// The user picked a suggestion: fix the destination and compute the
    /// route immediately instead of waiting for the next reactive tick.
    pub fn pick_suggestion(&self, picked: &PlaceSuggestion) {
        self.inner.store.set_destination_from_suggestion(picked);
        *self.inner.route_failed_for.lock().unwrap() = None;
        self.trigger_route_compute();
    }

    /// Confirm the first suggestion, if any (enter-key shortcut).
    pub fn confirm_first_suggestion(&self) -> bool {
        let suggestions = self.inner.store.snapshot().suggestions;
        match suggestions.first() {
            Some(first) => {
                self.pick_suggestion(first);
                true
            }
            None => false,
        }
    }

    /// Destination marker dragged or tapped: set the point (clearing the
    /// derived route/fare) and recompute at once.
    pub fn recalc_route_after_adjust(&self, point: LatLng, label: Option<String>) {
        self.inner.store.set_destination_point(point, label);
        *self.inner.route_failed_for.lock().unwrap() = None;
        self.trigger_route_compute();
    }

    // ------------------------------------------------------------------
    // Live follow
    // ------------------------------------------------------------------

    /// Follow the device position, applying the latest valid sample at a
    /// fixed cadence and only when it moved far enough from the applied
    /// origin; jitter must not churn the route/fare invalidation chain.
    async fn follow_location(self) {
        let mut watch = self.inner.location.watch_balanced();
        let period = self.inner.config.follow_sample_period;
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut latest: Option<GeoSample> = None;

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                sample = watch.recv() => match sample {
                    Some(s) => latest = Some(s),
                    None => return,
                },
                _ = tick.tick() => {
                    let Some(sample) = latest.take() else { continue };
                    let next = sample.position();
                    if !self.inner.config.bounds.contains(next) {
                        continue;
                    }
                    let applied = self.inner.store.snapshot().origin_point;
                    let moved = applied.is_none_or(|last| {
                        last.distance_meters(&next) > self.inner.config.follow_min_displacement_m
                    });
                    if moved {
                        debug!(lat = next.lat, lng = next.lng, "follow: applying new origin");
                        self.inner.store.set_origin_point(Some(next), true);
                        let current = self.inner.store.snapshot().origin_label;
                        self.ensure_label(next, current, LabelTarget::Origin);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// Idempotent catalog load: fetches categories and classes at most
    /// once each (until a reset), storing empty lists on failure.
    pub async fn ensure_catalog_loaded(&self) {
        if self.inner.store.snapshot().vehicle_categories.is_empty() {
            let already = {
                let mut guard = self.inner.catalog.lock().unwrap();
                std::mem::replace(&mut guard.categories_loading, true)
            };
            if !already {
                match self.inner.ride.vehicle_categories().await {
                    Ok(list) => self.inner.store.set_vehicle_categories(list),
                    Err(e) => {
                        warn!(error = %e, "vehicle category fetch failed");
                        self.inner.store.set_vehicle_categories(Vec::new());
                    }
                }
                self.inner.catalog.lock().unwrap().categories_loading = false;
            }
        }

        if self.inner.store.snapshot().service_classes.is_empty() {
            let already = {
                let mut guard = self.inner.catalog.lock().unwrap();
                std::mem::replace(&mut guard.classes_loading, true)
            };
            if !already {
                match self.inner.ride.service_classes().await {
                    Ok(list) => self.inner.store.set_service_classes(list),
                    Err(e) => {
                        warn!(error = %e, "service class fetch failed");
                        self.inner.store.set_service_classes(Vec::new());
                    }
                }
                self.inner.catalog.lock().unwrap().classes_loading = false;
            }
        }
    }

    pub fn select_vehicle(&self, id: &str) {
        self.inner.store.select_vehicle(id);
    }

    pub fn select_service_class(&self, id: &str) {
        self.inner.store.select_service_class(id);
    }

    // ------------------------------------------------------------------
    // Trip request
    // ------------------------------------------------------------------

    /// Assemble and submit the trip creation payload. Missing identity or
    /// selections fail locally without a network call; a backend failure
    /// surfaces the error but leaves the planning state intact so the
    /// user can retry.
    pub async fn request_trip(
        &self,
        payment: PaymentMode,
        pickup_address: Option<String>,
    ) -> Result<TripResponse, PlannerError> {
        let snap = self.inner.store.snapshot();
        let user_id = self.inner.session.snapshot().user.map(|u| u.id);

        let (Some(passenger_id), Some(vehicle_id), Some(class_id)) = (
            user_id,
            snap.selected_vehicle_id.clone(),
            snap.selected_service_class_id.clone(),
        ) else {
            self.inner
                .store
                .set_error(Some("Faltan datos para solicitar el viaje".to_string()));
            return Err(PlannerError::MissingPrecondition);
        };
        let (Some(origin), Some(destination)) = (snap.origin_point, snap.destination_point)
        else {
            self.inner
                .store
                .set_error(Some("Faltan datos para solicitar el viaje".to_string()));
            return Err(PlannerError::MissingPrecondition);
        };

        let pickup_address =
            pickup_address.or_else(|| sanitize_label(snap.origin_label.as_deref()));
        let destination_address = sanitize_label(Some(snap.destination_text.as_str()));

        let req = CreateTripRequest {
            passenger_id,
            payment_mode: payment,
            pickup_point: origin,
            pickup_address,
            stops: vec![TripStop {
                point: destination,
                address: destination_address,
            }],
            vehicle_category_id: vehicle_id,
            service_class_id: class_id,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        };

        self.inner.store.set_loading(true);
        let result = self.inner.ride.create_trip(req).await;
        self.inner.store.set_loading(false);

        match result {
            Ok(trip) => Ok(trip),
            Err(e) => {
                self.inner
                    .store
                    .set_error(Some("No se pudo crear el viaje".to_string()));
                Err(PlannerError::Api(e))
            }
        }
    }

    // ------------------------------------------------------------------
    // Resets
    // ------------------------------------------------------------------

    /// Soft reset when the planning flow exits: keep the origin, drop
    /// everything destination-derived.
    pub fn reset_planning(&self) {
        self.inner.store.reset_keep_origin();
        let mut guard = self.inner.estimate.lock().unwrap();
        guard.last_key = None;
        guard.in_flight = false;
    }

    /// Soft reset plus dropping the cached destination, so hydration does
    /// not bring it back.
    pub fn hard_reset_planning(&self) {
        self.reset_planning();
        if let Some(cache) = &self.inner.cache {
            if let Err(e) = cache.clear(PlanSlot::Destination) {
                warn!(error = %e, "destination cache clear failed");
            }
        }
    }
}

#[cfg(test)]
impl<M, R, N, B> TripPlannerEngine<M, R, N, B> {
    pub(crate) fn maps(&self) -> &M {
        &self.inner.maps
    }

    pub(crate) fn ride(&self) -> &R {
        &self.inner.ride
    }
}
