//! Snap classification of the pointer against sketches and features.
//!
//! All distances are in screen pixels. The result is display state only:
//! moving vertices onto the snap target is up to the map's modify primitive.

use crate::config::SessionConfig;
use crate::geometry::distance_to_segment;
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// What the pointer is snapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapType {
    #[default]
    None,
    /// A vertex of a feature being modified.
    Vertex,
    /// An edge of a feature being modified.
    Edge,
    /// First vertex of the sketch; clicking closes the ring.
    FirstPoint,
    /// Last vertex of the sketch; clicking continues from there.
    LastPoint,
}

/// Result of a snap operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapResult {
    /// The snapped pixel.
    pub point: Point,
    pub snap: SnapType,
}

impl SnapResult {
    /// Create a result with no snapping.
    pub fn none(point: Point) -> Self {
        Self {
            point,
            snap: SnapType::None,
        }
    }

    /// Check if any snapping occurred.
    pub fn is_snapped(&self) -> bool {
        self.snap != SnapType::None
    }
}

/// A point that can be snapped to.
#[derive(Debug, Clone, Copy)]
pub struct SnapTarget {
    pub point: Point,
    pub snap: SnapType,
}

/// Snap a point to the nearest target within `threshold`.
pub fn snap_to_targets(point: Point, targets: &[SnapTarget], threshold: f64) -> SnapResult {
    let mut best_target: Option<&SnapTarget> = None;
    let mut best_dist_sq = threshold * threshold;

    for target in targets {
        let dist_sq = (point - target.point).hypot2();
        if dist_sq <= best_dist_sq {
            best_dist_sq = dist_sq;
            best_target = Some(target);
        }
    }

    match best_target {
        Some(target) => SnapResult {
            point: target.point,
            snap: target.snap,
        },
        None => SnapResult::none(point),
    }
}

/// Snap a point onto the nearest edge of a vertex chain within `threshold`.
pub fn snap_to_edges(point: Point, vertices: &[Point], closed: bool, threshold: f64) -> SnapResult {
    let mut edges: Vec<(Point, Point)> = vertices.windows(2).map(|w| (w[0], w[1])).collect();
    if closed && vertices.len() > 2 {
        if let (Some(&first), Some(&last)) = (vertices.first(), vertices.last()) {
            edges.push((last, first));
        }
    }

    let mut best: Option<(f64, Point)> = None;
    for (a, b) in edges {
        let distance = distance_to_segment(point, a, b);
        if distance <= threshold && best.is_none_or(|(d, _)| distance < d) {
            let line_vec = b - a;
            let len_sq = line_vec.hypot2();
            let t = if len_sq < f64::EPSILON {
                0.0
            } else {
                ((point - a).dot(line_vec) / len_sq).clamp(0.0, 1.0)
            };
            best = Some((distance, a + line_vec * t));
        }
    }

    match best {
        Some((_, projected)) => SnapResult {
            point: projected,
            snap: SnapType::Edge,
        },
        None => SnapResult::none(point),
    }
}

/// Classifies pointer proximity with a per-device pixel tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapResolver {
    tolerance: f64,
}

impl SnapResolver {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.snap_tolerance())
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Snap against the endpoints of the sketch being drawn.
    ///
    /// The first vertex is only a target when `closable` says the sketch can
    /// be closed into a ring right now.
    pub fn resolve_sketch(&self, pointer: Point, sketch: &[Point], closable: bool) -> SnapResult {
        let mut targets = Vec::with_capacity(2);
        if let (true, Some(&first)) = (closable, sketch.first()) {
            targets.push(SnapTarget {
                point: first,
                snap: SnapType::FirstPoint,
            });
        }
        if let Some(&last) = sketch.last() {
            targets.push(SnapTarget {
                point: last,
                snap: SnapType::LastPoint,
            });
        }
        // The first point wins ties so a ring can always be closed.
        let first = snap_to_targets(pointer, &targets[..targets.len().min(1)], self.tolerance);
        if first.snap == SnapType::FirstPoint {
            return first;
        }
        snap_to_targets(pointer, &targets, self.tolerance)
    }

    /// Snap against a feature under modification. Vertices take precedence
    /// over edges.
    pub fn resolve_feature(&self, pointer: Point, vertices: &[Point], closed: bool) -> SnapResult {
        let targets: Vec<SnapTarget> = vertices
            .iter()
            .map(|&point| SnapTarget {
                point,
                snap: SnapType::Vertex,
            })
            .collect();
        let vertex = snap_to_targets(pointer, &targets, self.tolerance);
        if vertex.is_snapped() {
            return vertex;
        }
        snap_to_edges(pointer, vertices, closed, self.tolerance)
    }
}
