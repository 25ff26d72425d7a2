//! The in-progress geometry of a drawing session.

use crate::config::MinPoints;
use crate::geometry::{Geometry, GeometryType, distinct_count};
use crate::kind::DrawKind;
use crate::snap::SnapType;
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Derived pointer state published while sketching.
///
/// Tooltips and toolbar buttons bind to this value; it is republished only
/// when it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchInfo {
    pub kind: DrawKind,
    pub snap: SnapType,
    pub coordinate: Option<Point>,
    pub point_count: usize,
    pub geometry_type: GeometryType,
    pub dragging: bool,
}

/// Outcome of removing the last vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// No sketch was running.
    Nothing,
    Removed,
    /// The sketch would have become invalid and was started over.
    Restarted,
}

#[derive(Debug, Clone)]
struct Sketch {
    kind: DrawKind,
    points: Vec<Point>,
    pointer: Option<Point>,
}

/// Tracks the single live sketch and decides when it is a valid geometry.
#[derive(Debug, Clone)]
pub struct SketchLifecycleManager {
    min_points: MinPoints,
    sketch: Option<Sketch>,
    published: Option<SketchInfo>,
}

impl SketchLifecycleManager {
    pub fn new(min_points: MinPoints) -> Self {
        Self {
            min_points,
            sketch: None,
            published: None,
        }
    }

    /// Start a sketch, dropping any previous one.
    pub fn start(&mut self, kind: DrawKind) {
        if let Some(previous) = self.sketch.take() {
            log::debug!("aborting {} sketch for a new {} sketch", previous.kind, kind);
        }
        self.sketch = Some(Sketch {
            kind,
            points: Vec::new(),
            pointer: None,
        });
    }

    /// Drop the sketch. Returns its kind if one was running.
    pub fn abort(&mut self) -> Option<DrawKind> {
        self.published = None;
        self.sketch.take().map(|sketch| sketch.kind)
    }

    /// Start over with the same kind.
    pub fn restart(&mut self) -> Option<DrawKind> {
        let kind = self.abort()?;
        self.start(kind);
        Some(kind)
    }

    pub fn is_active(&self) -> bool {
        self.sketch.is_some()
    }

    pub fn kind(&self) -> Option<DrawKind> {
        self.sketch.as_ref().map(|sketch| sketch.kind)
    }

    pub fn points(&self) -> &[Point] {
        self.sketch.as_ref().map(|sketch| sketch.points.as_slice()).unwrap_or(&[])
    }

    pub fn point_count(&self) -> usize {
        self.points().len()
    }

    /// Append a vertex. Repeating the last vertex is ignored.
    pub fn add_point(&mut self, point: Point) -> usize {
        let Some(sketch) = self.sketch.as_mut() else {
            return 0;
        };
        if sketch.points.last() != Some(&point) {
            sketch.points.push(point);
        }
        sketch.points.len()
    }

    pub fn move_pointer(&mut self, point: Point) {
        if let Some(sketch) = self.sketch.as_mut() {
            sketch.pointer = Some(point);
        }
    }

    fn min_points_of(&self, kind: DrawKind) -> usize {
        kind.min_points(&self.min_points)
    }

    /// Whether finishing now would produce a valid geometry.
    pub fn is_valid(&self) -> bool {
        let Some(sketch) = &self.sketch else {
            return false;
        };
        if sketch.kind.is_single_point() {
            return sketch.points.len() == self.min_points_of(sketch.kind);
        }
        distinct_count(&sketch.points) >= self.min_points_of(sketch.kind)
    }

    /// Whether the sketch has enough vertices to be closed into a polygon.
    pub fn can_close(&self) -> bool {
        self.sketch.as_ref().is_some_and(|sketch| {
            sketch.kind.can_close() && distinct_count(&sketch.points) >= self.min_points.polygon
        })
    }

    /// Remove the most recent vertex, restarting if the sketch would fall
    /// below its minimum.
    pub fn remove_last_point(&mut self) -> RemoveOutcome {
        let min = match &self.sketch {
            Some(sketch) => self.min_points_of(sketch.kind),
            None => return RemoveOutcome::Nothing,
        };
        let count = self.point_count();
        if count == 0 || count - 1 < min {
            self.restart();
            return RemoveOutcome::Restarted;
        }
        if let Some(sketch) = self.sketch.as_mut() {
            sketch.points.pop();
        }
        RemoveOutcome::Removed
    }

    /// End the sketch. A valid sketch yields its geometry; an invalid one is
    /// restarted and yields nothing.
    pub fn finish(&mut self, close: bool) -> Option<(DrawKind, Geometry)> {
        if !self.is_valid() {
            self.restart();
            return None;
        }
        let closes = close && self.can_close();
        let sketch = self.sketch.take()?;
        self.published = None;
        let geometry = match sketch.kind.geometry_type() {
            GeometryType::Point => Geometry::Point(*sketch.points.first()?),
            GeometryType::Polygon => Geometry::Polygon(sketch.points),
            GeometryType::LineString if closes => Geometry::Polygon(sketch.points),
            GeometryType::LineString => Geometry::LineString(sketch.points),
        };
        Some((sketch.kind, geometry))
    }

    /// Geometry including the floating pointer vertex.
    pub fn preview_geometry(&self) -> Option<Geometry> {
        let sketch = self.sketch.as_ref()?;
        let mut points = sketch.points.clone();
        if let Some(pointer) = sketch.pointer {
            if points.last() != Some(&pointer) {
                points.push(pointer);
            }
        }
        if points.is_empty() {
            return None;
        }
        Some(match sketch.kind.geometry_type() {
            GeometryType::Point => Geometry::Point(points[0]),
            GeometryType::LineString => Geometry::LineString(points),
            GeometryType::Polygon => Geometry::Polygon(points),
        })
    }

    /// Derived pointer state for the current sketch.
    pub fn info(&self, snap: SnapType, dragging: bool) -> Option<SketchInfo> {
        let sketch = self.sketch.as_ref()?;
        Some(SketchInfo {
            kind: sketch.kind,
            snap,
            coordinate: sketch.pointer,
            point_count: sketch.points.len(),
            geometry_type: sketch.kind.geometry_type(),
            dragging,
        })
    }

    /// Remember `info` and report whether it differs from the last published value.
    pub fn publish_if_changed(&mut self, info: Option<SketchInfo>) -> bool {
        if self.published == info {
            return false;
        }
        self.published = info;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SketchLifecycleManager {
        SketchLifecycleManager::new(MinPoints::default())
    }

    #[test]
    fn test_line_needs_two_distinct_points() {
        let mut sketch = manager();
        sketch.start(DrawKind::Line);
        assert_eq!(sketch.add_point(Point::new(0.0, 0.0)), 1);
        assert_eq!(sketch.add_point(Point::new(0.0, 0.0)), 1);
        assert!(!sketch.is_valid());
        sketch.add_point(Point::new(1.0, 0.0));
        assert!(sketch.is_valid());
        let (kind, geometry) = sketch.finish(false).unwrap();
        assert_eq!(kind, DrawKind::Line);
        assert_eq!(geometry.geometry_type(), GeometryType::LineString);
        assert!(!sketch.is_active());
    }

    #[test]
    fn test_two_point_polygon_is_invalid() {
        let mut sketch = manager();
        sketch.start(DrawKind::Polygon);
        sketch.add_point(Point::new(0.0, 0.0));
        sketch.add_point(Point::new(1.0, 0.0));
        assert!(sketch.finish(true).is_none());
        // Restarted with the same kind and no vertices.
        assert_eq!(sketch.kind(), Some(DrawKind::Polygon));
        assert_eq!(sketch.point_count(), 0);
    }

    #[test]
    fn test_marker_needs_exactly_one_point() {
        let mut sketch = manager();
        sketch.start(DrawKind::Marker);
        assert!(!sketch.is_valid());
        sketch.add_point(Point::new(3.0, 4.0));
        assert!(sketch.is_valid());
        assert_eq!(
            sketch.finish(false),
            Some((DrawKind::Marker, Geometry::Point(Point::new(3.0, 4.0))))
        );
    }

    #[test]
    fn test_remove_last_point_restarts_below_minimum() {
        let mut sketch = manager();
        sketch.start(DrawKind::Line);
        for x in 0..3 {
            sketch.add_point(Point::new(x as f64, 0.0));
        }
        assert_eq!(sketch.remove_last_point(), RemoveOutcome::Removed);
        assert_eq!(sketch.point_count(), 2);
        assert_eq!(sketch.remove_last_point(), RemoveOutcome::Restarted);
        assert_eq!(sketch.point_count(), 0);
        assert_eq!(sketch.kind(), Some(DrawKind::Line));

        sketch.abort();
        assert_eq!(sketch.remove_last_point(), RemoveOutcome::Nothing);
    }

    #[test]
    fn test_measure_closes_into_polygon() {
        let mut sketch = manager();
        sketch.start(DrawKind::Measure);
        for p in [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)] {
            sketch.add_point(Point::new(p.0, p.1));
        }
        assert!(sketch.can_close());
        let (_, geometry) = sketch.finish(true).unwrap();
        assert_eq!(geometry.geometry_type(), GeometryType::Polygon);
    }

    #[test]
    fn test_preview_and_publish() {
        let mut sketch = manager();
        sketch.start(DrawKind::Line);
        sketch.add_point(Point::new(0.0, 0.0));
        sketch.move_pointer(Point::new(5.0, 0.0));
        assert_eq!(
            sketch.preview_geometry(),
            Some(Geometry::LineString(vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)]))
        );

        let info = sketch.info(SnapType::None, false);
        assert!(sketch.publish_if_changed(info.clone()));
        assert!(!sketch.publish_if_changed(info));
        let info = sketch.info(SnapType::LastPoint, false);
        assert!(sketch.publish_if_changed(info));
    }
}
