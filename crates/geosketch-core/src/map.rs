//! Map surface contract and an in-memory implementation.
//!
//! The map engine owns layers, interaction primitives, event listeners and
//! overlays. Sessions only hold keys into it and release them explicitly.

use crate::feature::{FeatureCollection, FeatureId};
use crate::geometry::{Geometry, distance_to_segment};
use crate::kind::DrawKind;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Pixel radius within which an overlay counts as hovered.
pub const OVERLAY_HIT_RADIUS: f64 = 8.0;

/// Layer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A vector layer and the features it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayer {
    pub id: LayerId,
    pub label: String,
    /// Registry id of the resource backing this layer.
    pub geo_resource_id: Option<String>,
    /// Hide the layer from metadata/catalog listings.
    pub hide_metadata: bool,
    pub features: FeatureCollection,
}

impl VectorLayer {
    pub fn new(id: LayerId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            geo_resource_id: None,
            hide_metadata: false,
            features: FeatureCollection::new(),
        }
    }
}

/// Interaction primitives provided by the map engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Draw(DrawKind),
    Modify,
    Select,
    Snap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InteractionKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub u64);

/// Map event families a session can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEventKind {
    Pointer,
    Click,
    DoubleClick,
    Key,
    ResolutionChange,
    FeatureChange,
}

/// Tooltip overlays added by measurement sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    /// Cumulative distance at a partition step along a line.
    Partition,
    /// Area of an unfinished polygon, placed at its centroid.
    Area,
}

/// A positioned tooltip.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub kind: OverlayKind,
    /// Position in map coordinates.
    pub position: Point,
    pub text: String,
    /// Feature the overlay annotates, `None` for the sketch.
    pub feature: Option<FeatureId>,
    pub visible: bool,
}

/// A feature found under the pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureHit {
    pub layer: LayerId,
    pub feature: FeatureId,
}

/// Everything a session needs from the host map engine.
pub trait MapSurface {
    /// Map coordinate under a pixel.
    fn coordinate_from_pixel(&self, pixel: Point) -> Point;

    /// Pixel of a map coordinate.
    fn pixel_from_coordinate(&self, coordinate: Point) -> Point;

    /// Current view resolution in map units per pixel.
    fn resolution(&self) -> f64;

    /// Layer ids, bottom to top.
    fn layer_ids(&self) -> Vec<LayerId>;

    fn layer(&self, id: &LayerId) -> Option<&VectorLayer>;

    fn layer_mut(&mut self, id: &LayerId) -> Option<&mut VectorLayer>;

    /// Add a layer on top, replacing any layer with the same id.
    fn add_layer(&mut self, layer: VectorLayer);

    fn remove_layer(&mut self, id: &LayerId) -> Option<VectorLayer>;

    fn add_interaction(&mut self, kind: InteractionKind) -> InteractionKey;

    fn remove_interaction(&mut self, key: InteractionKey);

    fn set_interaction_active(&mut self, key: InteractionKey, active: bool);

    fn listen(&mut self, kind: MapEventKind) -> ListenerKey;

    fn unlisten(&mut self, key: ListenerKey);

    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId;

    fn set_overlay_visible(&mut self, id: OverlayId, visible: bool);

    fn remove_overlay(&mut self, id: OverlayId);

    /// Visible overlay under a pixel.
    fn overlay_at_pixel(&self, pixel: Point) -> Option<OverlayId>;

    /// Features under a pixel, topmost first.
    fn features_at_pixel(&self, pixel: Point, tolerance: f64) -> Vec<FeatureHit> {
        let mut hits = Vec::new();
        for layer_id in self.layer_ids().into_iter().rev() {
            let Some(layer) = self.layer(&layer_id) else {
                continue;
            };
            let features: Vec<_> = layer.features.iter().collect();
            for feature in features.into_iter().rev() {
                let on_screen = feature
                    .geometry
                    .map_coordinates(|c| self.pixel_from_coordinate(c));
                if hit_test(&on_screen, pixel, tolerance) {
                    hits.push(FeatureHit {
                        layer: layer_id.clone(),
                        feature: feature.id.clone(),
                    });
                }
            }
        }
        hits
    }
}

/// Hit test a geometry given in pixel coordinates.
fn hit_test(geometry: &Geometry, pixel: Point, tolerance: f64) -> bool {
    match geometry {
        Geometry::Point(p) => p.distance(pixel) <= tolerance,
        Geometry::LineString(_) => geometry
            .segments()
            .iter()
            .any(|(a, b)| distance_to_segment(pixel, *a, *b) <= tolerance),
        Geometry::Polygon(ring) => {
            geometry
                .segments()
                .iter()
                .any(|(a, b)| distance_to_segment(pixel, *a, *b) <= tolerance)
                || ring_contains(ring, pixel)
        }
    }
}

/// Even-odd point in ring test.
fn ring_contains(ring: &[Point], point: Point) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Headless map surface with a simple north-up view.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    center: Point,
    resolution: f64,
    width: f64,
    height: f64,
    layers: Vec<VectorLayer>,
    interactions: HashMap<InteractionKey, (InteractionKind, bool)>,
    listeners: HashMap<ListenerKey, MapEventKind>,
    overlays: HashMap<OverlayId, Overlay>,
    next_key: u64,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new(Point::ZERO, 1.0, 800.0, 600.0)
    }
}

impl MemoryMap {
    pub fn new(center: Point, resolution: f64, width: f64, height: f64) -> Self {
        Self {
            center,
            resolution,
            width,
            height,
            layers: Vec::new(),
            interactions: HashMap::new(),
            listeners: HashMap::new(),
            overlays: HashMap::new(),
            next_key: 1,
        }
    }

    pub fn set_resolution(&mut self, resolution: f64) {
        self.resolution = resolution;
    }

    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// Attached interactions with their active flag.
    pub fn interactions(&self) -> Vec<(InteractionKind, bool)> {
        self.interactions.values().copied().collect()
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions.len()
    }

    /// Whether an interaction of `kind` is attached and active.
    pub fn is_active(&self, kind: InteractionKind) -> bool {
        self.interactions.values().any(|&(k, active)| k == kind && active)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn overlays(&self) -> impl Iterator<Item = (&OverlayId, &Overlay)> {
        self.overlays.iter()
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

impl MapSurface for MemoryMap {
    fn coordinate_from_pixel(&self, pixel: Point) -> Point {
        Point::new(
            self.center.x + (pixel.x - self.width / 2.0) * self.resolution,
            self.center.y - (pixel.y - self.height / 2.0) * self.resolution,
        )
    }

    fn pixel_from_coordinate(&self, coordinate: Point) -> Point {
        Point::new(
            (coordinate.x - self.center.x) / self.resolution + self.width / 2.0,
            (self.center.y - coordinate.y) / self.resolution + self.height / 2.0,
        )
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }

    fn layer(&self, id: &LayerId) -> Option<&VectorLayer> {
        self.layers.iter().find(|layer| &layer.id == id)
    }

    fn layer_mut(&mut self, id: &LayerId) -> Option<&mut VectorLayer> {
        self.layers.iter_mut().find(|layer| &layer.id == id)
    }

    fn add_layer(&mut self, layer: VectorLayer) {
        self.layers.retain(|existing| existing.id != layer.id);
        self.layers.push(layer);
    }

    fn remove_layer(&mut self, id: &LayerId) -> Option<VectorLayer> {
        let index = self.layers.iter().position(|layer| &layer.id == id)?;
        Some(self.layers.remove(index))
    }

    fn add_interaction(&mut self, kind: InteractionKind) -> InteractionKey {
        let key = InteractionKey(self.next_key());
        self.interactions.insert(key, (kind, true));
        key
    }

    fn remove_interaction(&mut self, key: InteractionKey) {
        self.interactions.remove(&key);
    }

    fn set_interaction_active(&mut self, key: InteractionKey, active: bool) {
        if let Some(entry) = self.interactions.get_mut(&key) {
            entry.1 = active;
        }
    }

    fn listen(&mut self, kind: MapEventKind) -> ListenerKey {
        let key = ListenerKey(self.next_key());
        self.listeners.insert(key, kind);
        key
    }

    fn unlisten(&mut self, key: ListenerKey) {
        self.listeners.remove(&key);
    }

    fn add_overlay(&mut self, overlay: Overlay) -> OverlayId {
        let id = OverlayId(self.next_key());
        self.overlays.insert(id, overlay);
        id
    }

    fn set_overlay_visible(&mut self, id: OverlayId, visible: bool) {
        if let Some(overlay) = self.overlays.get_mut(&id) {
            overlay.visible = visible;
        }
    }

    fn remove_overlay(&mut self, id: OverlayId) {
        self.overlays.remove(&id);
    }

    fn overlay_at_pixel(&self, pixel: Point) -> Option<OverlayId> {
        self.overlays
            .iter()
            .filter(|(_, overlay)| overlay.visible)
            .find(|(_, overlay)| {
                self.pixel_from_coordinate(overlay.position).distance(pixel) <= OVERLAY_HIT_RADIUS
            })
            .map(|(id, _)| *id)
    }
}
