//! Session state machine shared by the drawing and measurement tools.
//!
//! A controller owns one session from `activate` to `deactivate`. Commands
//! arrive as store changes (queued by the subscriptions the session holds and
//! processed in dispatch order by [`InteractionController::pump_store`]) and
//! as map events passed to [`InteractionController::handle_event`].

use crate::config::SessionConfig;
use crate::feature::{Feature, FeatureCollection, FeatureId, FeatureIdGenerator, StyleOption};
use crate::geometry::Geometry;
use crate::input::{InputState, Key, MapEvent};
use crate::kind::{DrawKind, DrawKindRequest, SessionKind};
use crate::map::{
    InteractionKey, InteractionKind, LayerId, ListenerKey, MapEventKind, MapSurface, VectorLayer,
};
use crate::measure::{GeodesicCalculator, GeodesicMeasurement};
use crate::selection::{SelectOutcome, SelectionCoordinator};
use crate::sketch::{RemoveOutcome, SketchLifecycleManager};
use crate::snap::{SnapResolver, SnapType};
use crate::storage::{GeoResourceRegistry, PersistenceBridge, PersistenceCorrelation, StorageService};
use crate::store::{
    Notification, ReactiveStore, Selector, StoreAction, StoreChange, SubscriptionId,
};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;

/// Map events every session listens to while attached.
const LISTENED_EVENTS: [MapEventKind; 6] = [
    MapEventKind::Pointer,
    MapEventKind::Click,
    MapEventKind::DoubleClick,
    MapEventKind::Key,
    MapEventKind::ResolutionChange,
    MapEventKind::FeatureChange,
];

/// Interaction mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// No session attached.
    #[default]
    Inactive,
    /// Attached, nothing to edit yet.
    Active,
    /// A sketch is running.
    Draw,
    /// A selected feature can be reshaped.
    Modify,
    /// Features can be picked.
    Select,
    /// The pointer rests on a measurement tooltip.
    Overlay,
}

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct Services {
    pub store: Rc<dyn ReactiveStore>,
    pub storage: Arc<dyn StorageService>,
    pub registry: Arc<dyn GeoResourceRegistry>,
}

impl Services {
    pub fn new(
        store: Rc<dyn ReactiveStore>,
        storage: Arc<dyn StorageService>,
        registry: Arc<dyn GeoResourceRegistry>,
    ) -> Self {
        Self {
            store,
            storage,
            registry,
        }
    }
}

/// Handles a session holds on the map and the store while attached.
struct Attachment {
    layer: LayerId,
    draw: Option<InteractionKey>,
    modify: InteractionKey,
    select: InteractionKey,
    snap: InteractionKey,
    listeners: Vec<ListenerKey>,
    subscriptions: Vec<SubscriptionId>,
}

/// Top-level state machine of one tool.
pub struct InteractionController {
    kind: SessionKind,
    config: SessionConfig,
    store: Rc<dyn ReactiveStore>,
    mode: InteractionMode,
    snap: SnapType,
    input: InputState,
    sketch: SketchLifecycleManager,
    snapper: SnapResolver,
    selection: SelectionCoordinator,
    bridge: PersistenceBridge,
    measurement: Option<GeodesicMeasurement>,
    ids: FeatureIdGenerator,
    /// Kind of the most recent sketch, restarted by `reset`.
    last_kind: Option<DrawKind>,
    /// Tool the store names current. Shared slices are only written while
    /// this is our own kind.
    current_tool: Option<SessionKind>,
    /// Store changes waiting to be applied.
    inbox: Rc<RefCell<VecDeque<StoreChange>>>,
    attachment: Option<Attachment>,
}

impl InteractionController {
    /// Create the controller of the drawing tool.
    pub fn drawing(services: Services, config: SessionConfig) -> Self {
        Self::new(SessionKind::Draw, services, config, None)
    }

    /// Create the controller of the measurement tool.
    pub fn measurement(
        services: Services,
        config: SessionConfig,
        calculator: Box<dyn GeodesicCalculator>,
    ) -> Self {
        let measurement = GeodesicMeasurement::new(calculator, config.partition_min_pixels);
        Self::new(SessionKind::Measure, services, config, Some(measurement))
    }

    fn new(
        kind: SessionKind,
        services: Services,
        config: SessionConfig,
        measurement: Option<GeodesicMeasurement>,
    ) -> Self {
        let bridge = PersistenceBridge::new(
            kind,
            services.storage,
            services.registry,
            config.save_debounce(),
        );
        Self {
            kind,
            sketch: SketchLifecycleManager::new(config.min_points),
            snapper: SnapResolver::from_config(&config),
            selection: SelectionCoordinator::new(kind, config.max_selection_size),
            config,
            store: services.store,
            mode: InteractionMode::Inactive,
            snap: SnapType::None,
            input: InputState::new(),
            bridge,
            measurement,
            ids: FeatureIdGenerator::new(kind),
            last_kind: None,
            current_tool: None,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            attachment: None,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.attachment.is_some()
    }

    /// Id of the working layer while attached.
    pub fn layer_id(&self) -> Option<&LayerId> {
        self.attachment.as_ref().map(|attachment| &attachment.layer)
    }

    pub fn selection(&self) -> &[FeatureId] {
        self.selection.selected()
    }

    pub fn snap(&self) -> SnapType {
        self.snap
    }

    pub fn sketch(&self) -> &SketchLifecycleManager {
        &self.sketch
    }

    pub fn bridge(&self) -> &PersistenceBridge {
        &self.bridge
    }

    pub fn geodesic(&self) -> Option<&GeodesicMeasurement> {
        self.measurement.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attach the session to `map` and return the working layer.
    ///
    /// Features of a previously persisted layer are imported before the
    /// selection held by the store is applied. Calling this again while
    /// attached only returns the working layer.
    pub async fn activate(&mut self, map: &mut dyn MapSurface) -> LayerId {
        if let Some(attachment) = &self.attachment {
            log::debug!("{} session already active", self.kind);
            return attachment.layer.clone();
        }

        let layer = LayerId::new(format!("{}_layer", self.kind.prefix()));
        if map.layer(&layer).is_none() {
            map.add_layer(VectorLayer::new(layer.clone(), self.kind.label()));
        }
        let modify = map.add_interaction(InteractionKind::Modify);
        let select = map.add_interaction(InteractionKind::Select);
        let snap = map.add_interaction(InteractionKind::Snap);
        let listeners = LISTENED_EVENTS.iter().map(|kind| map.listen(*kind)).collect();
        let subscriptions = self.subscribe();
        self.store.dispatch(StoreAction::SetCurrentTool(Some(self.kind)));
        self.current_tool = Some(self.kind);
        self.attachment = Some(Attachment {
            layer: layer.clone(),
            draw: None,
            modify,
            select,
            snap,
            listeners,
            subscriptions,
        });
        log::info!("Activated {} session on {}", self.kind, layer);

        let imported = self.bridge.import(map).await;
        self.adopt(map, &layer, imported);
        self.pump_store(map);
        self.settle_mode(map);
        layer
    }

    fn subscribe(&self) -> Vec<SubscriptionId> {
        let mut selectors = vec![
            (Selector::RequestedKind(self.kind), false),
            (Selector::Finish(self.kind), false),
            (Selector::Reset(self.kind), false),
            (Selector::Remove(self.kind), false),
            (Selector::Selection(self.kind), true),
            (Selector::SelectedStyle, false),
            (Selector::Description, false),
            (Selector::CurrentTool, false),
        ];
        if self.measurement.is_some() {
            selectors.push((Selector::DisplayRuler, false));
        }
        selectors
            .into_iter()
            .map(|(selector, fire_on_subscribe)| {
                let inbox = Rc::clone(&self.inbox);
                self.store.observe(
                    selector,
                    Box::new(move |change| inbox.borrow_mut().push_back(change.clone())),
                    fire_on_subscribe,
                )
            })
            .collect()
    }

    /// Move imported features into the working layer.
    fn adopt(&mut self, map: &mut dyn MapSurface, layer: &LayerId, features: Vec<Feature>) {
        let ids: Vec<FeatureId> = features.iter().map(|feature| feature.id.clone()).collect();
        let display_ruler = features
            .iter()
            .filter(|feature| feature.session_kind() == Some(SessionKind::Measure))
            .find_map(|feature| feature.display_ruler)
            .unwrap_or_else(|| self.store.state().display_ruler);

        for id in &ids {
            self.ids.observe(id);
        }
        if let Some(working) = map.layer_mut(layer) {
            for feature in features {
                if !working.features.add(feature) {
                    log::debug!("Skipped duplicate imported feature");
                }
            }
        }

        let Some(measurement) = self.measurement.as_mut() else {
            return;
        };
        measurement.restore_display_ruler(display_ruler);
        self.store.dispatch(StoreAction::SetDisplayRuler(display_ruler));
        for id in ids.iter().filter(|id| id.session_kind() == Some(SessionKind::Measure)) {
            measurement.update_feature(map, layer, id);
        }
    }

    /// Apply every queued store change.
    pub fn pump_store(&mut self, map: &mut dyn MapSurface) {
        if self.attachment.is_none() {
            return;
        }
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(change) = next else {
                break;
            };
            self.apply_change(map, change);
        }
    }

    fn apply_change(&mut self, map: &mut dyn MapSurface, change: StoreChange) {
        match change {
            StoreChange::RequestedKind(Some(DrawKindRequest::Kind(kind))) => {
                self.start_drawing(map, kind)
            }
            StoreChange::RequestedKind(Some(DrawKindRequest::Unsupported(name))) => {
                self.stop_drawing(map);
                self.clear_request();
                self.warn(format!("Unsupported geometry type: {name}"));
                self.settle_mode(map);
            }
            StoreChange::RequestedKind(None) => {
                if self.sketch.is_active() {
                    self.stop_drawing(map);
                }
                self.settle_mode(map);
            }
            StoreChange::Finish(_) => self.finish(map),
            StoreChange::Reset(_) => self.reset(map),
            StoreChange::Remove(_) => self.remove(map),
            StoreChange::Selection(ids) => self.apply_selection(map, &ids),
            StoreChange::SelectedStyle(Some(style)) => self.apply_style(map, &style),
            StoreChange::SelectedStyle(None) => {}
            StoreChange::Description(description) => self.apply_description(map, description),
            StoreChange::DisplayRuler(display) => self.apply_display_ruler(map, display),
            StoreChange::CurrentTool(tool) => self.apply_current_tool(map, tool),
        }
    }

    fn warn(&self, message: String) {
        log::warn!("{}", message);
        self.store.dispatch(StoreAction::Notify(Notification::warn(message)));
    }

    fn is_current(&self) -> bool {
        self.current_tool == Some(self.kind)
    }

    /// Forget the requested kind so that requesting it again is observed.
    fn clear_request(&self) {
        if self.store.state().slice(self.kind).requested.is_some() {
            self.store.dispatch(StoreAction::RequestKind(self.kind, None));
        }
    }

    fn schedule_save(&mut self) {
        self.bridge.schedule(Instant::now());
    }

    fn features(&self, map: &dyn MapSurface) -> FeatureCollection {
        self.layer_id()
            .and_then(|layer| map.layer(layer))
            .map(|layer| layer.features.clone())
            .unwrap_or_default()
    }

    fn start_drawing(&mut self, map: &mut dyn MapSurface, kind: DrawKind) {
        if kind.session_kind() != self.kind {
            self.stop_drawing(map);
            self.clear_request();
            self.warn(format!("{kind} cannot be drawn with the {} tool", self.kind));
            self.settle_mode(map);
            return;
        }
        let style = self.store.state().style;
        if let Some(missing) = kind.missing_prerequisite(&style) {
            self.stop_drawing(map);
            self.clear_request();
            self.warn(format!("Cannot draw {kind} without a {missing}"));
            self.settle_mode(map);
            return;
        }

        self.stop_drawing(map);
        self.deselect_all(map);
        self.sketch.start(kind);
        self.last_kind = Some(kind);
        if let Some(attachment) = self.attachment.as_mut() {
            attachment.draw = Some(map.add_interaction(InteractionKind::Draw(kind)));
        }
        log::debug!("Started {} sketch", kind);
        self.publish_pointer();
        self.settle_mode(map);
    }

    /// Drop the sketch and its draw interaction.
    fn stop_drawing(&mut self, map: &mut dyn MapSurface) {
        if let Some(kind) = self.sketch.abort() {
            log::debug!("Aborted {} sketch", kind);
        }
        if let Some(key) = self.attachment.as_mut().and_then(|a| a.draw.take()) {
            map.remove_interaction(key);
        }
        if let Some(measurement) = self.measurement.as_mut() {
            measurement.finish_sketch(map);
        }
        self.snap = SnapType::None;
        self.store.dispatch(StoreAction::SetPointer(self.kind, None));
    }

    fn deselect_all(&mut self, map: &dyn MapSurface) {
        if !self.selection.clear().is_empty() {
            self.publish_selection(map);
        }
    }

    fn publish_selection(&self, map: &dyn MapSurface) {
        self.selection.publish(self.store.as_ref());
        if self.is_current() {
            let features = self.features(map);
            self.selection.publish_derived(self.store.as_ref(), &features);
        }
    }

    /// Republish the derived pointer state if it changed.
    fn publish_pointer(&mut self) {
        let info = self.sketch.info(self.snap, self.input.is_dragging());
        if self.sketch.publish_if_changed(info.clone()) {
            self.store.dispatch(StoreAction::SetPointer(self.kind, info));
        }
    }

    /// Turn the sketch into a feature. An invalid sketch is started over.
    fn complete_sketch(&mut self, map: &mut dyn MapSurface, close: bool) {
        let Some((kind, geometry)) = self.sketch.finish(close) else {
            log::debug!("{} sketch is not a valid geometry, restarted", self.kind);
            if let Some(measurement) = self.measurement.as_mut() {
                measurement.finish_sketch(map);
            }
            self.snap = SnapType::None;
            self.publish_pointer();
            return;
        };
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };

        let style = self.store.state().style;
        let id = self.unused_id(map, &layer, kind);
        let mut feature = Feature::new(id.clone(), geometry);
        feature.style = kind.style_for(&style);
        feature.kind = Some(kind);
        if let Some(measurement) = &self.measurement {
            feature.display_ruler = Some(measurement.display_ruler());
        }
        let added = map
            .layer_mut(&layer)
            .is_some_and(|working| working.features.add(feature));
        if let Some(key) = self.attachment.as_mut().and_then(|a| a.draw.take()) {
            map.remove_interaction(key);
        }
        if let Some(measurement) = self.measurement.as_mut() {
            measurement.finish_sketch(map);
            if added {
                if let Some(statistic) = measurement.update_feature(map, &layer, &id) {
                    self.store.dispatch(StoreAction::SetStatistic(statistic));
                }
            }
        }

        self.snap = SnapType::None;
        self.store.dispatch(StoreAction::SetPointer(self.kind, None));
        self.clear_request();
        if added {
            log::info!("Created feature {}", id);
            self.schedule_save();
            self.selection.set_selection(&[id]);
            self.publish_selection(map);
        } else {
            log::warn!("Working layer {} rejected feature {}", layer, id);
        }
        self.settle_mode(map);
    }

    /// Next id that no feature of the working layer uses yet.
    fn unused_id(&mut self, map: &dyn MapSurface, layer: &LayerId, kind: DrawKind) -> FeatureId {
        loop {
            let id = self.ids.next_id(kind);
            if !map.layer(layer).is_some_and(|working| working.features.contains(&id)) {
                return id;
            }
        }
    }

    /// Complete the sketch, or edit the newest feature when none is running.
    fn finish(&mut self, map: &mut dyn MapSurface) {
        if self.sketch.is_active() {
            self.complete_sketch(map, false);
            return;
        }
        if self.selection.is_empty() {
            let newest = self
                .layer_id()
                .and_then(|layer| map.layer(layer))
                .and_then(|layer| layer.features.last_of(self.kind))
                .cloned();
            if let Some(id) = newest {
                self.selection.set_selection(&[id]);
                self.publish_selection(map);
            }
        }
        self.settle_mode(map);
    }

    /// Abort everything and start over with the last geometry kind.
    fn reset(&mut self, map: &mut dyn MapSurface) {
        let kind = self.sketch.kind().or(self.last_kind);
        self.stop_drawing(map);
        self.deselect_all(map);
        match kind {
            Some(kind) => self.start_drawing(map, kind),
            None => self.settle_mode(map),
        }
    }

    /// Remove the last sketch vertex, or delete the selected features.
    fn remove(&mut self, map: &mut dyn MapSurface) {
        if self.sketch.is_active() {
            if self.sketch.remove_last_point() == RemoveOutcome::Restarted {
                log::debug!("{} sketch fell below its minimum, restarted", self.kind);
                self.snap = SnapType::None;
            }
            self.refresh_sketch(map);
            return;
        }

        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        let ids = self.selection.selected().to_vec();
        if ids.is_empty() {
            return;
        }
        if let Some(working) = map.layer_mut(&layer) {
            for id in &ids {
                working.features.remove(id);
            }
        }
        if let Some(measurement) = self.measurement.as_mut() {
            for id in &ids {
                measurement.remove_feature(map, id);
            }
        }
        log::info!("Deleted {} {} feature(s)", ids.len(), self.kind);
        self.selection.clear();
        self.publish_selection(map);
        self.schedule_save();
        self.settle_mode(map);
    }

    fn apply_selection(&mut self, map: &mut dyn MapSurface, ids: &[FeatureId]) {
        let features = self.features(map);
        let ids: Vec<FeatureId> = ids.iter().filter(|id| features.contains(id)).cloned().collect();
        if self.selection.set_selection(&ids).is_empty() {
            return;
        }
        if !self.selection.is_empty() {
            self.stop_drawing(map);
            self.clear_request();
        }
        self.publish_selection(map);
        self.settle_mode(map);
    }

    fn apply_current_tool(&mut self, map: &dyn MapSurface, tool: Option<SessionKind>) {
        let was_current = self.is_current();
        self.current_tool = tool;
        if self.is_current() && !was_current {
            // Editors bind to the selection of the current tool.
            let features = self.features(map);
            self.selection.publish_derived(self.store.as_ref(), &features);
        }
    }

    fn apply_style(&mut self, map: &mut dyn MapSurface, style: &StyleOption) {
        if !self.is_current() {
            return;
        }
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        let default = self.store.state().style;
        let mut changed = false;
        if let Some(working) = map.layer_mut(&layer) {
            for id in self.selection.selected() {
                let Some(feature) = working.features.get_mut(id) else {
                    continue;
                };
                // Measurement features keep their fixed style.
                if feature.kind == Some(DrawKind::Measure) || feature.style.resolve(&default) == *style {
                    continue;
                }
                let kind = feature.kind;
                feature.style.apply(kind, style);
                changed = true;
            }
        }
        if changed {
            self.schedule_save();
        }
    }

    fn apply_description(&mut self, map: &mut dyn MapSurface, description: Option<String>) {
        if !self.is_current() {
            return;
        }
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        let mut changed = false;
        if let Some(working) = map.layer_mut(&layer) {
            for id in self.selection.selected() {
                if let Some(feature) = working.features.get_mut(id) {
                    if feature.description != description {
                        feature.description = description.clone();
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.schedule_save();
        }
    }

    fn apply_display_ruler(&mut self, map: &mut dyn MapSurface, display: bool) {
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        let Some(measurement) = self.measurement.as_mut() else {
            return;
        };
        if measurement.display_ruler() == display {
            return;
        }
        measurement.set_display_ruler(map, &layer, display);
        log::debug!("Ruler display set to {}", display);
        self.schedule_save();
    }

    /// Handle one map event.
    pub fn handle_event(&mut self, map: &mut dyn MapSurface, event: &MapEvent) {
        if self.attachment.is_none() {
            return;
        }
        self.pump_store(map);
        self.input.handle(event);
        match event {
            MapEvent::PointerMove { pixel } => self.on_pointer_move(map, *pixel),
            MapEvent::PointerDown { .. } | MapEvent::PointerUp { .. } => self.publish_pointer(),
            MapEvent::Click { pixel } => self.on_click(map, *pixel),
            MapEvent::DoubleClick { .. } => {
                if self.sketch.is_active() {
                    self.complete_sketch(map, false);
                }
            }
            MapEvent::Key(key) => self.on_key(map, key),
            MapEvent::ResolutionChanged => self.on_resolution_change(map),
            MapEvent::FeatureChanged(id) => self.on_feature_changed(map, id),
        }
        self.pump_store(map);
    }

    fn on_key(&mut self, map: &mut dyn MapSurface, key: &Key) {
        match key {
            Key::Escape => {
                if let Some(kind) = self.sketch.restart() {
                    log::debug!("Restarted {} sketch", kind);
                    if let Some(measurement) = self.measurement.as_mut() {
                        measurement.finish_sketch(map);
                    }
                    self.snap = SnapType::None;
                    self.publish_pointer();
                }
            }
            Key::Delete => self.remove(map),
            Key::Other(_) => {}
        }
    }

    /// Pixels of the sketch vertices.
    fn sketch_pixels(&self, map: &dyn MapSurface) -> Vec<Point> {
        self.sketch
            .points()
            .iter()
            .map(|point| map.pixel_from_coordinate(*point))
            .collect()
    }

    /// Coordinate under `pixel`, pinned to a sketch endpoint when snapped.
    fn snapped_coordinate(&self, map: &dyn MapSurface, pixel: Point, snap: SnapType) -> Point {
        let points = self.sketch.points();
        match snap {
            SnapType::FirstPoint => points.first().copied(),
            SnapType::LastPoint => points.last().copied(),
            _ => None,
        }
        .unwrap_or_else(|| map.coordinate_from_pixel(pixel))
    }

    fn on_click(&mut self, map: &mut dyn MapSurface, pixel: Point) {
        if self.mode == InteractionMode::Overlay {
            return;
        }
        if !self.sketch.is_active() {
            self.select_at(map, pixel);
            return;
        }

        let snap = self
            .snapper
            .resolve_sketch(pixel, &self.sketch_pixels(map), self.sketch.can_close())
            .snap;
        self.snap = snap;
        if snap == SnapType::FirstPoint && self.sketch.can_close() {
            self.complete_sketch(map, true);
            return;
        }
        let coordinate = match snap {
            SnapType::LastPoint => self.snapped_coordinate(map, pixel, snap),
            _ => map.coordinate_from_pixel(pixel),
        };
        self.sketch.move_pointer(coordinate);
        self.sketch.add_point(coordinate);
        if self.sketch.kind().is_some_and(DrawKind::is_single_point) {
            self.complete_sketch(map, false);
        } else {
            self.refresh_sketch(map);
        }
    }

    /// Select the feature under `pixel`, hand it off, or deselect.
    fn select_at(&mut self, map: &mut dyn MapSurface, pixel: Point) {
        if !self.config.modify_enabled {
            return;
        }
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        let other = self.kind.other();
        let hit = map
            .features_at_pixel(pixel, self.config.hit_tolerance_px)
            .into_iter()
            .find(|hit| hit.layer == layer || hit.feature.session_kind() == Some(other));

        let Some(hit) = hit else {
            self.deselect_all(map);
            self.settle_mode(map);
            return;
        };
        match self.selection.select(&hit.feature) {
            SelectOutcome::Unchanged => {}
            SelectOutcome::Selected(_) => {
                self.publish_selection(map);
                self.settle_mode(map);
            }
            SelectOutcome::Handoff(handoff) => {
                SelectionCoordinator::handoff(self.store.as_ref(), &handoff);
            }
        }
    }

    fn on_pointer_move(&mut self, map: &mut dyn MapSurface, pixel: Point) {
        if !self.sketch.is_active() && map.overlay_at_pixel(pixel).is_some() {
            if self.mode != InteractionMode::Overlay {
                self.set_mode(map, InteractionMode::Overlay);
            }
            return;
        }
        if self.mode == InteractionMode::Overlay {
            self.settle_mode(map);
        }

        if self.sketch.is_active() {
            let snap = self
            .snapper
            .resolve_sketch(pixel, &self.sketch_pixels(map), self.sketch.can_close())
            .snap;
            self.snap = snap;
            let coordinate = self.snapped_coordinate(map, pixel, snap);
            self.sketch.move_pointer(coordinate);
            self.refresh_sketch(map);
        } else if self.mode == InteractionMode::Modify {
            self.snap = self.snap_selected(map, pixel);
        }
    }

    /// Snap against the vertices and edges of the selected features.
    fn snap_selected(&self, map: &dyn MapSurface, pixel: Point) -> SnapType {
        let Some(layer) = self.layer_id().and_then(|layer| map.layer(layer)) else {
            return SnapType::None;
        };
        self.selection
            .selected()
            .iter()
            .filter_map(|id| layer.features.get(id))
            .map(|feature| {
                let vertices: Vec<Point> = feature
                    .geometry
                    .coordinates()
                    .iter()
                    .map(|point| map.pixel_from_coordinate(*point))
                    .collect();
                let closed = matches!(feature.geometry, Geometry::Polygon(_));
                self.snapper.resolve_feature(pixel, &vertices, closed).snap
            })
            .find(|snap| *snap != SnapType::None)
            .unwrap_or(SnapType::None)
    }

    /// Recompute the sketch statistic and republish the pointer state.
    fn refresh_sketch(&mut self, map: &mut dyn MapSurface) {
        if let Some(measurement) = self.measurement.as_mut() {
            match self.sketch.preview_geometry() {
                Some(preview) => {
                    // Hovering the first vertex previews the closed ring.
                    let preview = if self.snap == SnapType::FirstPoint && self.sketch.can_close() {
                        Geometry::Polygon(self.sketch.points().to_vec())
                    } else {
                        preview
                    };
                    let statistic = measurement.update_sketch(map, &preview);
                    self.store.dispatch(StoreAction::SetStatistic(statistic));
                }
                None => measurement.finish_sketch(map),
            }
        }
        self.publish_pointer();
    }

    fn on_resolution_change(&mut self, map: &mut dyn MapSurface) {
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        if let Some(measurement) = self.measurement.as_mut() {
            measurement.on_resolution_change(map, &layer);
        }
        if self.sketch.is_active() {
            self.refresh_sketch(map);
        }
    }

    fn on_feature_changed(&mut self, map: &mut dyn MapSurface, id: &FeatureId) {
        let Some(layer) = self.layer_id().cloned() else {
            return;
        };
        if !map.layer(&layer).is_some_and(|working| working.features.contains(id)) {
            return;
        }
        self.schedule_save();
        if let Some(measurement) = self.measurement.as_mut() {
            if let Some(statistic) = measurement.update_feature(map, &layer, id) {
                self.store.dispatch(StoreAction::SetStatistic(statistic));
            }
        }
    }

    /// Derive the mode from the sketch, the selection and the layer.
    fn settle_mode(&mut self, map: &mut dyn MapSurface) {
        let mode = match &self.attachment {
            None => InteractionMode::Inactive,
            Some(_) if self.sketch.is_active() => InteractionMode::Draw,
            Some(attachment) => {
                let empty = map
                    .layer(&attachment.layer)
                    .is_none_or(|layer| layer.features.is_empty());
                if !self.config.modify_enabled || empty {
                    InteractionMode::Active
                } else if self.selection.is_empty() {
                    InteractionMode::Select
                } else {
                    InteractionMode::Modify
                }
            }
        };
        self.set_mode(map, mode);
    }

    fn set_mode(&mut self, map: &mut dyn MapSurface, mode: InteractionMode) {
        if self.mode != mode {
            log::debug!("{} mode {:?} -> {:?}", self.kind, self.mode, mode);
            self.mode = mode;
            self.store.dispatch(StoreAction::SetMode(self.kind, mode));
        }
        self.sync_interactions(map);
    }

    fn sync_interactions(&self, map: &mut dyn MapSurface) {
        let Some(attachment) = &self.attachment else {
            return;
        };
        let mode = self.mode;
        map.set_interaction_active(attachment.modify, mode == InteractionMode::Modify);
        map.set_interaction_active(
            attachment.select,
            matches!(mode, InteractionMode::Select | InteractionMode::Modify),
        );
        map.set_interaction_active(
            attachment.snap,
            matches!(mode, InteractionMode::Draw | InteractionMode::Modify),
        );
        if let Some(draw) = attachment.draw {
            map.set_interaction_active(draw, mode == InteractionMode::Draw);
        }
    }

    /// Apply queued store changes and run the pending save once it is due.
    pub async fn tick(&mut self, map: &mut dyn MapSurface, now: Instant) -> Option<PersistenceCorrelation> {
        if self.attachment.is_none() {
            return None;
        }
        self.pump_store(map);
        let features = self.features(map);
        self.bridge.maybe_save(self.store.as_ref(), &features, now).await
    }

    /// Detach the session.
    ///
    /// The pending save is flushed before anything is released. Returns the
    /// host layer the features were handed to, if any.
    pub async fn deactivate(&mut self, map: &mut dyn MapSurface) -> Option<LayerId> {
        let attachment = self.attachment.take()?;
        for id in &attachment.subscriptions {
            self.store.unobserve(*id);
        }
        self.inbox.borrow_mut().clear();

        if let Some(kind) = self.sketch.abort() {
            log::debug!("Dropped {} sketch on deactivate", kind);
        }
        self.store.dispatch(StoreAction::SetPointer(self.kind, None));
        self.clear_request();
        if let Some(measurement) = self.measurement.as_mut() {
            measurement.finish_sketch(map);
        }
        // Queued tool switches were dropped with the inbox.
        let current = self.store.state().current_tool == Some(self.kind);
        if !self.selection.clear().is_empty() {
            self.selection.publish(self.store.as_ref());
            if current {
                self.selection.publish_derived(self.store.as_ref(), &FeatureCollection::new());
            }
        }
        if current {
            self.store.dispatch(StoreAction::SetCurrentTool(None));
        }
        self.current_tool = None;

        let features = map
            .layer(&attachment.layer)
            .map(|layer| layer.features.clone())
            .unwrap_or_default();
        self.bridge.flush(self.store.as_ref(), &features).await;

        if let Some(draw) = attachment.draw {
            map.remove_interaction(draw);
        }
        for key in [attachment.modify, attachment.select, attachment.snap] {
            map.remove_interaction(key);
        }
        for key in attachment.listeners {
            map.unlisten(key);
        }
        if let Some(measurement) = self.measurement.as_mut() {
            measurement.clear(map);
        }
        let registered = self.bridge.finalize(map, &attachment.layer);

        self.input.reset();
        self.snap = SnapType::None;
        self.mode = InteractionMode::Inactive;
        self.store.dispatch(StoreAction::SetMode(self.kind, InteractionMode::Inactive));
        log::info!("Deactivated {} session", self.kind);
        registered
    }
}
