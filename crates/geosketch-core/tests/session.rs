//! End-to-end sessions against the in-memory collaborators.

use geosketch_core::controller::{InteractionController, InteractionMode, Services};
use geosketch_core::feature::{Feature, FeatureId, StyleOption};
use geosketch_core::geometry::Geometry;
use geosketch_core::input::{Key, MapEvent};
use geosketch_core::kind::{DrawKind, DrawKindRequest, SessionKind};
use geosketch_core::kml::{EMPTY_CONTENT, write_kml};
use geosketch_core::map::{InteractionKind, LayerId, MapSurface, MemoryMap, VectorLayer};
use geosketch_core::measure::PlanarCalculator;
use geosketch_core::snap::SnapType;
use geosketch_core::storage::{
    FileFormat, GeoResource, GeoResourceData, GeoResourceRegistry, MemoryRegistry, MemoryStorage,
};
use geosketch_core::store::{MemoryStore, ReactiveStore, StoreAction};
use geosketch_core::{MinPoints, SessionConfig};
use kurbo::Point;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[path = "../src/test_support.rs"]
mod test_support;

use test_support::block_on;

/// Shared collaborators of one host application.
struct Host {
    store: Rc<MemoryStore>,
    storage: Arc<MemoryStorage>,
    registry: Arc<MemoryRegistry>,
    map: MemoryMap,
}

impl Host {
    fn new() -> Self {
        Self {
            store: Rc::new(MemoryStore::new()),
            storage: Arc::new(MemoryStorage::new()),
            registry: Arc::new(MemoryRegistry::new()),
            map: MemoryMap::default(),
        }
    }

    fn services(&self) -> Services {
        Services::new(self.store.clone(), self.storage.clone(), self.registry.clone())
    }

    fn drawing(&self, config: SessionConfig) -> InteractionController {
        InteractionController::drawing(self.services(), config)
    }

    fn measuring(&self) -> InteractionController {
        InteractionController::measurement(
            self.services(),
            SessionConfig::default(),
            Box::new(PlanarCalculator),
        )
    }

    fn command(&mut self, controller: &mut InteractionController, action: StoreAction) {
        self.store.dispatch(action);
        controller.pump_store(&mut self.map);
    }

    fn request(&mut self, controller: &mut InteractionController, kind: DrawKind) {
        let tool = controller.kind();
        self.command(controller, StoreAction::RequestKind(tool, Some(kind.into())));
    }

    fn click(&mut self, controller: &mut InteractionController, x: f64, y: f64) {
        controller.handle_event(&mut self.map, &MapEvent::Click { pixel: Point::new(x, y) });
    }

    /// Sketch a feature through its pixel vertices and finish it.
    fn sketch(&mut self, controller: &mut InteractionController, kind: DrawKind, pixels: &[(f64, f64)]) -> FeatureId {
        self.request(controller, kind);
        for (x, y) in pixels {
            self.click(controller, *x, *y);
        }
        let tool = controller.kind();
        self.command(controller, StoreAction::Finish(tool));
        controller.selection()[0].clone()
    }

    fn layer(&self, id: &str) -> &VectorLayer {
        self.map.layer(&LayerId::from(id)).expect("layer exists")
    }
}

fn is_draw_line_id(id: &FeatureId) -> bool {
    id.as_str()
        .strip_prefix("draw_line_")
        .is_some_and(|ts| !ts.is_empty() && ts.chars().all(|c| c.is_ascii_digit()))
}

#[test]
fn test_line_draw_ends_in_modify() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.request(&mut draw, DrawKind::Line);
    assert_eq!(draw.mode(), InteractionMode::Draw);

    let mut counts = vec![host.store.state().draw.pointer.map(|info| info.point_count)];
    for (x, y) in [(100.0, 100.0), (200.0, 150.0), (300.0, 100.0)] {
        host.click(&mut draw, x, y);
        counts.push(host.store.state().draw.pointer.map(|info| info.point_count));
    }
    assert_eq!(counts, vec![Some(0), Some(1), Some(2), Some(3)]);

    host.command(&mut draw, StoreAction::Finish(SessionKind::Draw));
    assert_eq!(draw.mode(), InteractionMode::Modify);
    assert_eq!(host.store.state().draw.mode, Some(InteractionMode::Modify));
    assert_eq!(host.store.state().draw.pointer, None);

    let layer = host.layer("draw_layer");
    assert_eq!(layer.features.len(), 1);
    let feature = layer.features.iter().next().unwrap();
    assert!(is_draw_line_id(&feature.id), "unexpected id {}", feature.id);
    assert_eq!(feature.geometry.coordinates().len(), 3);
    assert_eq!(host.store.state().draw.selection, vec![feature.id.clone()]);
}

#[test]
fn test_empty_session_registers_nothing() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    assert_eq!(draw.mode(), InteractionMode::Active);

    assert_eq!(block_on(draw.deactivate(&mut host.map)), None);
    assert!(host.registry.is_empty());
    assert_eq!(host.map.layer_count(), 0);
    assert!(host.storage.calls().iter().all(|call| call.content == EMPTY_CONTENT));
}

#[test]
fn test_foreign_feature_is_handed_off() {
    let mut host = Host::new();
    let mut measure_layer = VectorLayer::new(LayerId::from("measure_layer"), "Measurement");
    let measure_id = FeatureId::from("measure_measure_1700000000000");
    measure_layer.features.add(Feature::new(
        measure_id.clone(),
        Geometry::LineString(vec![Point::new(-100.0, 0.0), Point::new(100.0, 0.0)]),
    ));
    host.map.add_layer(measure_layer);

    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.click(&mut draw, 400.0, 300.0);

    let state = host.store.state();
    assert!(draw.selection().is_empty());
    assert!(state.draw.selection.is_empty());
    assert_eq!(state.measurement.selection, vec![measure_id]);
    assert_eq!(state.current_tool, Some(SessionKind::Measure));
}

#[test]
fn test_handoff_reaches_running_measurement() {
    let mut host = Host::new();
    let mut measure = host.measuring();
    block_on(measure.activate(&mut host.map));
    let id = host.sketch(&mut measure, DrawKind::Measure, &[(100.0, 300.0), (700.0, 300.0)]);
    host.click(&mut measure, 400.0, 550.0);
    assert!(measure.selection().is_empty());

    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.click(&mut draw, 400.0, 301.0);
    measure.pump_store(&mut host.map);

    assert!(draw.selection().is_empty());
    assert_eq!(measure.selection(), &[id]);
    assert_eq!(measure.mode(), InteractionMode::Modify);
}

#[test]
fn test_ruler_toggle_updates_every_feature() {
    let mut host = Host::new();
    let mut measure = host.measuring();
    block_on(measure.activate(&mut host.map));
    let first = host.sketch(&mut measure, DrawKind::Measure, &[(0.0, 300.0), (800.0, 300.0)]);
    let second = host.sketch(&mut measure, DrawKind::Measure, &[(0.0, 100.0), (800.0, 100.0)]);
    let partitions = measure.geodesic().unwrap();
    assert_eq!(partitions.partitions_of(&first).len(), 9);
    assert_eq!(partitions.partitions_of(&second).len(), 9);

    host.command(&mut measure, StoreAction::SetDisplayRuler(false));

    let layer = host.layer("measure_layer");
    assert!(layer.features.iter().all(|feature| feature.display_ruler == Some(false)));
    let measurement = measure.geodesic().unwrap();
    assert!(measurement.partitions_of(&first).is_empty());
    assert!(measurement.partitions_of(&second).is_empty());
    assert_eq!(host.map.overlay_count(), 0);
    assert!(measure.bridge().is_pending());
}

#[test]
fn test_ruler_preference_survives_reactivation() {
    let mut host = Host::new();
    let mut measure = host.measuring();
    block_on(measure.activate(&mut host.map));
    host.sketch(&mut measure, DrawKind::Measure, &[(0.0, 300.0), (800.0, 300.0)]);
    host.command(&mut measure, StoreAction::SetDisplayRuler(false));
    let registered = block_on(measure.deactivate(&mut host.map)).expect("layer registered");
    assert!(registered.as_str().starts_with("a_"));

    host.store.dispatch(StoreAction::SetDisplayRuler(true));
    let mut measure = host.measuring();
    block_on(measure.activate(&mut host.map));

    assert_eq!(measure.geodesic().map(|m| m.display_ruler()), Some(false));
    assert!(!host.store.state().display_ruler);
    assert_eq!(host.map.overlay_count(), 0);
    assert_eq!(host.layer("measure_layer").features.len(), 1);
}

#[test]
fn test_rapid_edits_save_once() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    let id = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0)]);

    let start = Instant::now();
    draw.handle_event(&mut host.map, &MapEvent::FeatureChanged(id.clone()));
    draw.handle_event(&mut host.map, &MapEvent::FeatureChanged(id));
    block_on(draw.tick(&mut host.map, start));
    assert_eq!(host.storage.save_count(), 0);

    let correlation = block_on(draw.tick(&mut host.map, Instant::now() + Duration::from_millis(1500)));
    assert_eq!(host.storage.save_count(), 1);
    assert!(correlation.is_some());
    assert_eq!(host.store.state().draw.file_save_result, correlation);
    assert_eq!(host.store.state().measurement.file_save_result, correlation);

    // Nothing pending any more.
    block_on(draw.tick(&mut host.map, Instant::now() + Duration::from_secs(5)));
    assert_eq!(host.storage.save_count(), 1);
}

#[test]
fn test_activate_is_idempotent() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    let first = block_on(draw.activate(&mut host.map));
    let second = block_on(draw.activate(&mut host.map));

    assert_eq!(first, second);
    assert_eq!(host.map.layer_count(), 1);
    assert_eq!(host.map.interaction_count(), 3);
    assert_eq!(host.map.listener_count(), 6);
    assert_eq!(host.store.subscriber_count(), 8);
}

#[test]
fn test_prerequisites_block_drawing() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));

    for kind in [DrawKind::Marker, DrawKind::Text] {
        host.request(&mut draw, kind);
        assert!(!host.map.is_active(InteractionKind::Draw(kind)));
        assert_eq!(draw.mode(), InteractionMode::Active);
        // The refused request is withdrawn so it can be made again.
        assert_eq!(host.store.state().draw.requested, None);
    }
    assert_eq!(host.map.interaction_count(), 3);
    assert_eq!(host.store.state().notifications.len(), 2);

    host.store.dispatch(StoreAction::SetStyle(StyleOption {
        text: Some("Summit".to_string()),
        ..StyleOption::default()
    }));
    host.request(&mut draw, DrawKind::Text);
    assert!(host.map.is_active(InteractionKind::Draw(DrawKind::Text)));
}

#[test]
fn test_unsupported_request_keeps_session_active() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.command(
        &mut draw,
        StoreAction::RequestKind(SessionKind::Draw, Some(DrawKindRequest::from("hexagon"))),
    );
    assert_eq!(draw.mode(), InteractionMode::Active);
    assert_eq!(host.map.interaction_count(), 3);
}

#[test]
fn test_selection_is_capped() {
    let mut host = Host::new();
    let config = SessionConfig {
        max_selection_size: 2,
        ..SessionConfig::default()
    };
    let mut draw = host.drawing(config);
    block_on(draw.activate(&mut host.map));
    let a = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0)]);
    let b = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 200.0), (300.0, 200.0)]);
    let c = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 300.0), (300.0, 300.0)]);

    host.command(
        &mut draw,
        StoreAction::SetSelection(SessionKind::Draw, vec![a.clone(), b.clone(), c.clone()]),
    );
    assert_eq!(draw.selection(), &[b.clone(), c.clone()]);
    assert_eq!(host.store.state().draw.selection, vec![b, c.clone()]);

    // Selecting at capacity drops the oldest member.
    host.click(&mut draw, 200.0, 100.0);
    assert_eq!(draw.selection(), &[c.clone(), a.clone()]);
    assert!(host.store.state().draw.selection.len() <= 2);
}

#[test]
fn test_delete_key_removes_selected_feature() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0)]);

    draw.handle_event(&mut host.map, &MapEvent::Key(Key::from_name("Delete")));
    assert!(host.layer("draw_layer").features.is_empty());
    assert_eq!(draw.mode(), InteractionMode::Active);
    assert!(host.store.state().draw.selection.is_empty());
}

#[test]
fn test_reactivation_reimports_features() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0), (300.0, 250.0)]);
    host.sketch(&mut draw, DrawKind::Polygon, &[(400.0, 100.0), (500.0, 100.0), (500.0, 200.0)]);
    let before: Vec<Feature> = host.layer("draw_layer").features.iter().cloned().collect();

    let registered = block_on(draw.deactivate(&mut host.map)).expect("layer registered");
    assert_eq!(host.storage.save_count(), 1);
    let resource = host.registry.by_id(registered.as_str()).expect("resource registered");
    assert!(resource.hide_metadata);
    assert!(host.map.layer(&registered).is_some_and(|layer| layer.hide_metadata));

    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    assert_eq!(draw.mode(), InteractionMode::Select);
    assert!(host.map.layer(&registered).is_none());

    let after: Vec<&Feature> = host.layer("draw_layer").features.iter().collect();
    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(after) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.geometry.geometry_type(), new.geometry.geometry_type());
        for (a, b) in old.geometry.coordinates().iter().zip(new.geometry.coordinates()) {
            assert!(a.distance(*b) < 1e-6, "{a:?} != {b:?}");
        }
    }

    // The admin layer is updated in place on the next save.
    let id = before[0].id.clone();
    if let Some(feature) = host
        .map
        .layer_mut(&LayerId::from("draw_layer"))
        .and_then(|layer| layer.features.get_mut(&id))
    {
        feature.geometry = Geometry::LineString(vec![Point::new(-300.0, 200.0), Point::new(0.0, 0.0)]);
    }
    draw.handle_event(&mut host.map, &MapEvent::FeatureChanged(id));
    block_on(draw.deactivate(&mut host.map));
    let calls = host.storage.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].admin_id.as_deref(), Some(registered.as_str()));
    assert_eq!(host.map.layer(&registered).map(|layer| layer.features.len()), Some(2));
}

#[test]
fn test_shared_edits_only_reach_the_current_tool() {
    let mut host = Host::new();
    let mut measure = host.measuring();
    block_on(measure.activate(&mut host.map));
    let measured = host.sketch(&mut measure, DrawKind::Measure, &[(100.0, 300.0), (700.0, 300.0)]);
    assert_eq!(measure.selection(), &[measured.clone()]);

    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    assert_eq!(host.store.state().current_tool, Some(SessionKind::Draw));
    let drawn = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0)]);

    host.store.dispatch(StoreAction::SetDescription(Some("river".to_string())));
    measure.pump_store(&mut host.map);
    draw.pump_store(&mut host.map);

    let description = |layer: &str, id: &FeatureId| {
        host.layer(layer).features.get(id).and_then(|feature| feature.description.clone())
    };
    assert_eq!(description("measure_layer", &measured), None);
    assert_eq!(description("draw_layer", &drawn), Some("river".to_string()));
}

#[test]
fn test_failed_final_save_is_recovered() {
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    let id = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0)]);

    host.storage.set_failing(true);
    let registered = block_on(draw.deactivate(&mut host.map));
    assert_eq!(registered.as_ref().map(LayerId::as_str), Some("draw_unsaved"));

    host.storage.set_failing(false);
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    assert_eq!(host.map.layer_count(), 1);
    assert!(host.layer("draw_layer").features.contains(&id));
    assert!(draw.bridge().is_pending());

    let correlation = block_on(draw.tick(&mut host.map, Instant::now() + Duration::from_secs(2)));
    assert!(correlation.is_some());
    let registered = block_on(draw.deactivate(&mut host.map)).expect("layer registered");
    assert!(registered.as_str().starts_with("a_"));
}

#[test]
fn test_first_point_snap_follows_closing_rules() {
    let near_first = MapEvent::PointerMove { pixel: Point::new(103.0, 102.0) };

    // A line never closes.
    let mut host = Host::new();
    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    host.request(&mut draw, DrawKind::Line);
    for (x, y) in [(100.0, 100.0), (300.0, 100.0), (300.0, 300.0)] {
        host.click(&mut draw, x, y);
    }
    draw.handle_event(&mut host.map, &near_first);
    assert_eq!(draw.snap(), SnapType::None);

    // A ring closes once it reaches its configured minimum.
    let mut host = Host::new();
    let config = SessionConfig {
        min_points: MinPoints {
            polygon: 4,
            ..MinPoints::default()
        },
        ..SessionConfig::default()
    };
    let mut draw = host.drawing(config);
    block_on(draw.activate(&mut host.map));
    host.request(&mut draw, DrawKind::Polygon);
    for (x, y) in [(100.0, 100.0), (300.0, 100.0), (300.0, 300.0)] {
        host.click(&mut draw, x, y);
    }
    draw.handle_event(&mut host.map, &near_first);
    assert_eq!(draw.snap(), SnapType::None);

    host.click(&mut draw, 100.0, 300.0);
    draw.handle_event(&mut host.map, &near_first);
    assert_eq!(draw.snap(), SnapType::FirstPoint);
}

#[test]
fn test_new_ids_follow_imported_ones() {
    let mut host = Host::new();
    let imported_id = FeatureId::from("draw_line_4102444800000");
    let mut imported = Feature::new(
        imported_id.clone(),
        Geometry::LineString(vec![Point::new(0.0, 0.0), Point::new(1000.0, 0.0)]),
    );
    imported.kind = Some(DrawKind::Line);
    let content = write_kml(&[&imported]).expect("kml written");
    host.registry.add_or_replace(GeoResource {
        id: "a_import".to_string(),
        label: "Drawing".to_string(),
        format: FileFormat::Kml,
        data: GeoResourceData::Inline(content),
        hide_metadata: true,
    });
    host.map.add_layer(VectorLayer::new(LayerId::from("a_import"), "Drawing"));

    let mut draw = host.drawing(SessionConfig::default());
    block_on(draw.activate(&mut host.map));
    let id = host.sketch(&mut draw, DrawKind::Line, &[(100.0, 100.0), (300.0, 100.0)]);

    assert!(id.timestamp() > imported_id.timestamp(), "{id} not after {imported_id}");
    assert_eq!(host.layer("draw_layer").features.len(), 2);
}
