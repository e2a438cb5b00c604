//! Trip planner reactive state.
//!
//! `PlannerStore` owns the planning state behind a `watch` channel and
//! encodes the invalidation cascade in its mutation methods: a changed
//! destination clears the route and the fare, a changed vehicle or
//! service class clears the fare. Consumers (the engine, the UI) take
//! snapshots or subscribe; they never write fields directly.

use tokio::sync::watch;

use crate::domain::{FareQuote, LatLng, PlaceSuggestion, RouteSummary, ServiceClass, VehicleCategory};

/// The planning state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannerState {
    /// Pickup point, seeded from the profile or GPS at planning start.
    pub origin_point: Option<LatLng>,
    pub origin_label: Option<String>,

    /// Destination search text (also the resolved destination label).
    pub destination_text: String,
    pub destination_point: Option<LatLng>,

    pub suggestions: Vec<PlaceSuggestion>,
    pub loading: bool,
    pub error: Option<String>,

    pub route_summary: Option<RouteSummary>,

    pub vehicle_categories: Vec<VehicleCategory>,
    pub service_classes: Vec<ServiceClass>,
    pub selected_vehicle_id: Option<String>,
    pub selected_service_class_id: Option<String>,

    pub fare_quote: Option<FareQuote>,
}

impl PlannerState {
    /// A route can be computed once both endpoints are known.
    pub fn ready_to_route(&self) -> bool {
        self.origin_point.is_some() && self.destination_point.is_some()
    }
}

/// Owner of the planning state.
#[derive(Debug, Clone)]
pub struct PlannerStore {
    tx: watch::Sender<PlannerState>,
}

impl Default for PlannerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(PlannerState::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> PlannerState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlannerState> {
        self.tx.subscribe()
    }

    /// Set (or clear) the origin. `invalidate` clears the route and fare;
    /// it is only skipped for cosmetic updates that do not move the pin.
    pub fn set_origin_point(&self, p: Option<LatLng>, invalidate: bool) {
        self.tx.send_modify(|s| {
            s.origin_point = p;
            if invalidate {
                s.route_summary = None;
                s.fare_quote = None;
            }
        });
    }

    pub fn set_origin_label(&self, label: Option<String>) {
        self.tx.send_modify(|s| s.origin_label = label);
    }

    /// Raw destination input; typing clears any stale error.
    pub fn set_destination_text(&self, text: impl Into<String>) {
        self.tx.send_modify(|s| {
            s.destination_text = text.into();
            s.error = None;
        });
    }

    pub fn set_suggestions(&self, items: Vec<PlaceSuggestion>) {
        self.tx.send_modify(|s| s.suggestions = items);
    }

    pub fn clear_suggestions(&self) {
        self.tx.send_modify(|s| s.suggestions.clear());
    }

    /// The user picked a suggestion: fix the destination and invalidate
    /// everything derived from it.
    pub fn set_destination_from_suggestion(&self, picked: &PlaceSuggestion) {
        self.tx.send_modify(|s| {
            s.destination_point = Some(picked.coords);
            s.destination_text = picked.full_label.clone();
            s.suggestions.clear();
            s.route_summary = None;
            s.fare_quote = None;
        });
    }

    /// Set the destination from a map interaction. A missing label leaves
    /// the text empty so the engine reverse-geocodes a fresh one.
    pub fn set_destination_point(&self, point: LatLng, label: Option<String>) {
        self.tx.send_modify(|s| {
            s.destination_point = Some(point);
            s.destination_text = label.unwrap_or_default().trim().to_string();
            s.route_summary = None;
            s.fare_quote = None;
        });
    }

    /// Store the catalog; selects the first entry when nothing is
    /// selected yet. Does not touch the fare; that happens on explicit
    /// selection.
    pub fn set_vehicle_categories(&self, list: Vec<VehicleCategory>) {
        self.tx.send_modify(|s| {
            if s.selected_vehicle_id.is_none() {
                s.selected_vehicle_id = list.first().map(|c| c.id.clone());
            }
            s.vehicle_categories = list;
        });
    }

    pub fn set_service_classes(&self, list: Vec<ServiceClass>) {
        self.tx.send_modify(|s| {
            if s.selected_service_class_id.is_none() {
                s.selected_service_class_id = list.first().map(|c| c.id.clone());
            }
            s.service_classes = list;
        });
    }

    pub fn select_vehicle(&self, id: impl Into<String>) {
        self.tx.send_modify(|s| {
            s.selected_vehicle_id = Some(id.into());
            s.fare_quote = None;
        });
    }

    pub fn select_service_class(&self, id: impl Into<String>) {
        self.tx.send_modify(|s| {
            s.selected_service_class_id = Some(id.into());
            s.fare_quote = None;
        });
    }

    pub fn set_fare_quote(&self, quote: Option<FareQuote>) {
        self.tx.send_modify(|s| s.fare_quote = quote);
    }

    /// Store a computed route. Setting a route does not clear the fare;
    /// the estimate rule decides whether its inputs changed.
    pub fn set_route_summary(&self, summary: Option<RouteSummary>) {
        self.tx.send_modify(|s| s.route_summary = summary);
    }

    pub fn clear_route(&self) {
        self.tx.send_modify(|s| {
            s.route_summary = None;
            s.fare_quote = None;
        });
    }

    pub fn clear_destination(&self) {
        self.tx.send_modify(|s| {
            s.destination_point = None;
            s.destination_text.clear();
            s.suggestions.clear();
            s.route_summary = None;
            s.fare_quote = None;
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_modify(|s| s.loading = loading);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.tx.send_modify(|s| s.error = error);
    }

    /// Soft reset when the planning flow exits: keeps the origin and the
    /// catalog, drops everything destination-derived.
    pub fn reset_keep_origin(&self) {
        self.tx.send_modify(|s| {
            s.destination_text.clear();
            s.destination_point = None;
            s.suggestions.clear();
            s.route_summary = None;
            s.fare_quote = None;
            s.error = None;
        });
    }

    pub fn reset(&self) {
        self.tx.send_modify(|s| *s = PlannerState::default());
    }
}
