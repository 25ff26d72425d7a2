//! Features, their ids and styles, and the working feature collection.

use crate::geometry::Geometry;
use crate::kind::{DrawKind, SessionKind};
use crate::measure::MeasureStatistic;
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[cfg(target_arch = "wasm32")]
use web_time::{SystemTime, UNIX_EPOCH};
#[cfg(not(target_arch = "wasm32"))]
use std::time::{SystemTime, UNIX_EPOCH};

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl FeatureColor {
    /// Default drawing color.
    pub const DEFAULT: FeatureColor = FeatureColor::new(0xff, 0x00, 0x00, 0xff);
    /// Fixed color of measurement geometries.
    pub const MEASURE: FeatureColor = FeatureColor::new(0xff, 0x00, 0x00, 0xff);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        let byte = |i: usize| digits.get(i..i + 2).and_then(|s| u8::from_str_radix(s, 16).ok());
        match digits.len() {
            6 => Some(Self::new(byte(0)?, byte(2)?, byte(4)?, 0xff)),
            8 => Some(Self::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    /// Format as `#rrggbb`.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// KML color notation `aabbggrr`.
    pub fn to_kml(&self) -> String {
        format!("{:02x}{:02x}{:02x}{:02x}", self.a, self.b, self.g, self.r)
    }

    /// Parse KML color notation `aabbggrr`.
    pub fn from_kml(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() != 8 {
            return None;
        }
        let byte = |i: usize| value.get(i..i + 2).and_then(|s| u8::from_str_radix(s, 16).ok());
        Some(Self::new(byte(6)?, byte(4)?, byte(2)?, byte(0)?))
    }

    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

impl Default for FeatureColor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Color> for FeatureColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self::new(rgba.r, rgba.g, rgba.b, rgba.a)
    }
}

impl From<FeatureColor> for Color {
    fn from(color: FeatureColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// The style currently being edited, shared by both tools through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleOption {
    /// Symbol used by markers.
    pub symbol_src: Option<String>,
    /// Symbol and label scale.
    pub scale: f64,
    pub color: FeatureColor,
    /// Label of text features.
    pub text: Option<String>,
}

impl Default for StyleOption {
    fn default() -> Self {
        Self {
            symbol_src: None,
            scale: 1.0,
            color: FeatureColor::DEFAULT,
            text: None,
        }
    }
}

/// Style attributes stored on a feature. Absent attributes fall back to the
/// session's current [`StyleOption`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStyle {
    pub symbol_src: Option<String>,
    pub scale: Option<f64>,
    pub color: Option<FeatureColor>,
    pub text: Option<String>,
}

impl FeatureStyle {
    /// Resolve every attribute, falling back per attribute to `default`.
    pub fn resolve(&self, default: &StyleOption) -> StyleOption {
        StyleOption {
            symbol_src: self.symbol_src.clone().or_else(|| default.symbol_src.clone()),
            scale: self.scale.unwrap_or(default.scale),
            color: self.color.unwrap_or(default.color),
            text: self.text.clone().or_else(|| default.text.clone()),
        }
    }

    /// Overwrite the attributes the feature kind uses with `style`.
    pub fn apply(&mut self, kind: Option<DrawKind>, style: &StyleOption) {
        match kind {
            Some(kind) => *self = kind.style_for(style),
            None => self.color = Some(style.color),
        }
    }
}

/// Feature id following the `{kind}_{type}_{timestamp}` convention.
///
/// Ids read from foreign documents are kept verbatim; they simply have no
/// recognizable provenance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(kind: SessionKind, draw_kind: DrawKind, timestamp: u64) -> Self {
        Self(format!("{}_{}_{}", kind.prefix(), draw_kind.as_str(), timestamp))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provenance prefix, if the id follows the convention.
    pub fn session_kind(&self) -> Option<SessionKind> {
        self.0.split('_').next().and_then(SessionKind::from_prefix)
    }

    /// Geometry kind segment, if the id follows the convention.
    pub fn draw_kind(&self) -> Option<DrawKind> {
        let mut parts = self.0.splitn(3, '_');
        parts.next().and_then(SessionKind::from_prefix)?;
        parts.next()?.parse().ok()
    }

    /// Timestamp segment, if the id follows the convention.
    pub fn timestamp(&self) -> Option<u64> {
        self.session_kind()?;
        self.0.rsplit('_').next()?.parse().ok()
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Mints feature ids. Timestamps are strictly increasing per generator so two
/// features created within the same millisecond still get distinct ids.
#[derive(Debug, Clone)]
pub struct FeatureIdGenerator {
    kind: SessionKind,
    last: u64,
}

impl FeatureIdGenerator {
    pub fn new(kind: SessionKind) -> Self {
        Self { kind, last: 0 }
    }

    /// Next id using the wall clock.
    pub fn next_id(&mut self, draw_kind: DrawKind) -> FeatureId {
        self.next_at(draw_kind, timestamp_millis())
    }

    /// Next id for a given clock reading in milliseconds.
    pub fn next_at(&mut self, draw_kind: DrawKind, now_ms: u64) -> FeatureId {
        let timestamp = now_ms.max(self.last + 1);
        self.last = timestamp;
        FeatureId::new(self.kind, draw_kind, timestamp)
    }

    /// Keep minting above the timestamp of an id that already exists.
    pub fn observe(&mut self, id: &FeatureId) {
        if id.session_kind() != Some(self.kind) {
            return;
        }
        if let Some(timestamp) = id.timestamp() {
            self.last = self.last.max(timestamp);
        }
    }
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A geometry with identity, style and tool metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Geometry,
    pub style: FeatureStyle,
    pub description: Option<String>,
    /// Geometry kind the feature was sketched as.
    pub kind: Option<DrawKind>,
    /// Persisted "ruler display" preference of measurement features.
    pub display_ruler: Option<bool>,
    /// Geodesic length and area of measurement features.
    #[serde(skip)]
    pub geodesic: Option<MeasureStatistic>,
}

impl Feature {
    pub fn new(id: FeatureId, geometry: Geometry) -> Self {
        let kind = id.draw_kind();
        Self {
            id,
            geometry,
            style: FeatureStyle::default(),
            description: None,
            kind,
            display_ruler: None,
            geodesic: None,
        }
    }

    /// Tool that created this feature.
    pub fn session_kind(&self) -> Option<SessionKind> {
        self.id.session_kind()
    }
}

/// Ordered arena of features keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    features: HashMap<FeatureId, Feature>,
    order: Vec<FeatureId>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature. Returns false and leaves the collection untouched if
    /// the id is already taken.
    pub fn add(&mut self, feature: Feature) -> bool {
        if self.features.contains_key(&feature.id) {
            return false;
        }
        self.order.push(feature.id.clone());
        self.features.insert(feature.id.clone(), feature);
        true
    }

    pub fn remove(&mut self, id: &FeatureId) -> Option<Feature> {
        self.order.retain(|existing| existing != id);
        self.features.remove(id)
    }

    pub fn get(&self, id: &FeatureId) -> Option<&Feature> {
        self.features.get(id)
    }

    pub fn get_mut(&mut self, id: &FeatureId) -> Option<&mut Feature> {
        self.features.get_mut(id)
    }

    pub fn contains(&self, id: &FeatureId) -> bool {
        self.features.contains_key(id)
    }

    /// Features in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.order.iter().filter_map(|id| self.features.get(id))
    }

    /// Mutable access to every feature (unordered).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Feature> {
        self.features.values_mut()
    }

    pub fn ids(&self) -> &[FeatureId] {
        &self.order
    }

    /// Most recently added feature created by `kind`.
    pub fn last_of(&self, kind: SessionKind) -> Option<&FeatureId> {
        self.order.iter().rev().find(|id| id.session_kind() == Some(kind))
    }

    pub fn clear(&mut self) {
        self.features.clear();
        self.order.clear();
    }

    /// Move every feature out, leaving the collection empty.
    pub fn drain(&mut self) -> Vec<Feature> {
        let order = std::mem::take(&mut self.order);
        let mut features = std::mem::take(&mut self.features);
        order.into_iter().filter_map(|id| features.remove(&id)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        let mut collection = Self::new();
        for feature in iter {
            collection.add(feature);
        }
        collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    #[test]
    fn test_id_convention() {
        let id = FeatureId::new(SessionKind::Draw, DrawKind::Line, 1_700_000_000_000);
        assert_eq!(id.as_str(), "draw_line_1700000000000");
        assert_eq!(id.session_kind(), Some(SessionKind::Draw));
        assert_eq!(id.draw_kind(), Some(DrawKind::Line));

        let foreign = FeatureId::from("placemark_42");
        assert_eq!(foreign.session_kind(), None);
        assert_eq!(foreign.draw_kind(), None);
    }

    #[test]
    fn test_generator_is_monotonic() {
        let mut ids = FeatureIdGenerator::new(SessionKind::Measure);
        let a = ids.next_at(DrawKind::Measure, 100);
        let b = ids.next_at(DrawKind::Measure, 100);
        let c = ids.next_at(DrawKind::Measure, 50);
        assert_eq!(a.as_str(), "measure_measure_100");
        assert_eq!(b.as_str(), "measure_measure_101");
        assert_eq!(c.as_str(), "measure_measure_102");
    }

    #[test]
    fn test_generator_skips_existing_ids() {
        let mut ids = FeatureIdGenerator::new(SessionKind::Draw);
        ids.observe(&FeatureId::from("draw_polygon_500"));
        ids.observe(&FeatureId::from("measure_measure_900"));
        ids.observe(&FeatureId::from("placemark_700"));
        assert_eq!(FeatureId::from("draw_polygon_500").timestamp(), Some(500));
        assert_eq!(ids.next_at(DrawKind::Line, 100).as_str(), "draw_line_501");
    }

    #[test]
    fn test_collection_rejects_duplicate_ids() {
        let mut collection = FeatureCollection::new();
        let id = FeatureId::from("draw_marker_1");
        assert!(collection.add(Feature::new(id.clone(), Geometry::Point(Point::ZERO))));
        assert!(!collection.add(Feature::new(id.clone(), Geometry::Point(Point::new(1.0, 1.0)))));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get(&id).map(|f| f.geometry.clone()), Some(Geometry::Point(Point::ZERO)));
    }

    #[test]
    fn test_collection_order_and_last_of() {
        let mut collection = FeatureCollection::new();
        for id in ["draw_line_1", "measure_measure_2", "draw_polygon_3"] {
            collection.add(Feature::new(FeatureId::from(id), Geometry::Point(Point::ZERO)));
        }
        let ids: Vec<&str> = collection.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["draw_line_1", "measure_measure_2", "draw_polygon_3"]);
        assert_eq!(collection.last_of(SessionKind::Measure).map(FeatureId::as_str), Some("measure_measure_2"));

        collection.remove(&FeatureId::from("draw_polygon_3"));
        assert_eq!(collection.last_of(SessionKind::Draw).map(FeatureId::as_str), Some("draw_line_1"));
    }

    #[test]
    fn test_colors() {
        let color = FeatureColor::from_hex("#ff8000").unwrap();
        assert_eq!(color, FeatureColor::new(255, 128, 0, 255));
        assert_eq!(color.to_hex(), "#ff8000");
        assert_eq!(color.to_kml(), "ff0080ff");
        assert_eq!(FeatureColor::from_kml("ff0080ff"), Some(color));
        assert_eq!(FeatureColor::from_hex("#12"), None);
    }

    #[test]
    fn test_style_resolution_falls_back_per_attribute() {
        let default = StyleOption {
            symbol_src: Some("default.svg".to_string()),
            scale: 1.5,
            color: FeatureColor::DEFAULT,
            text: Some("default".to_string()),
        };
        let own = FeatureStyle {
            color: Some(FeatureColor::new(0, 0, 255, 255)),
            ..FeatureStyle::default()
        };
        let resolved = own.resolve(&default);
        assert_eq!(resolved.color, FeatureColor::new(0, 0, 255, 255));
        assert_eq!(resolved.symbol_src.as_deref(), Some("default.svg"));
        assert_eq!(resolved.scale, 1.5);
        assert_eq!(resolved.text.as_deref(), Some("default"));
    }
}
