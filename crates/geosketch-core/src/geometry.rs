//! Vector geometries in map coordinates.

use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Geometry family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
        };
        f.write_str(name)
    }
}

/// A geometry in projected map coordinates.
///
/// Polygon rings are stored open: the closing segment back to the first
/// vertex is implicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point),
    LineString(Vec<Point>),
    Polygon(Vec<Point>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
        }
    }

    /// Vertices of the geometry (open ring for polygons).
    pub fn coordinates(&self) -> &[Point] {
        match self {
            Geometry::Point(p) => std::slice::from_ref(p),
            Geometry::LineString(points) | Geometry::Polygon(points) => points,
        }
    }

    /// Apply `f` to every vertex.
    pub fn map_coordinates(&self, f: impl Fn(Point) -> Point) -> Geometry {
        match self {
            Geometry::Point(p) => Geometry::Point(f(*p)),
            Geometry::LineString(points) => {
                Geometry::LineString(points.iter().copied().map(f).collect())
            }
            Geometry::Polygon(points) => Geometry::Polygon(points.iter().copied().map(f).collect()),
        }
    }

    /// Segments in drawing order; polygons include the closing segment.
    pub fn segments(&self) -> Vec<(Point, Point)> {
        let points = self.coordinates();
        let mut segments: Vec<(Point, Point)> = points.windows(2).map(|w| (w[0], w[1])).collect();
        if let Geometry::Polygon(ring) = self {
            if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
                if ring.len() > 2 && first != last {
                    segments.push((last, first));
                }
            }
        }
        segments
    }

    /// Length in map units (perimeter for polygons).
    pub fn planar_length(&self) -> f64 {
        self.segments().iter().map(|(a, b)| a.distance(*b)).sum()
    }

    /// Enclosed area in square map units. Zero for points and lines.
    pub fn planar_area(&self) -> f64 {
        match self {
            Geometry::Polygon(ring) => shoelace(ring).abs(),
            _ => 0.0,
        }
    }

    /// Area centroid of a polygon, vertex average otherwise.
    pub fn centroid(&self) -> Option<Point> {
        let points = self.coordinates();
        if points.is_empty() {
            return None;
        }
        if let Geometry::Polygon(ring) = self {
            let doubled_area = shoelace(ring) * 2.0;
            if doubled_area.abs() > f64::EPSILON && ring.len() > 2 {
                let mut cx = 0.0;
                let mut cy = 0.0;
                for i in 0..ring.len() {
                    let a = ring[i];
                    let b = ring[(i + 1) % ring.len()];
                    let cross = a.x * b.y - b.x * a.y;
                    cx += (a.x + b.x) * cross;
                    cy += (a.y + b.y) * cross;
                }
                return Some(Point::new(cx / (3.0 * doubled_area), cy / (3.0 * doubled_area)));
            }
        }
        let n = points.len() as f64;
        let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }

    /// Point at `distance` map units along the geometry, clamped to its end.
    pub fn point_along(&self, distance: f64) -> Option<Point> {
        let mut remaining = distance.max(0.0);
        let segments = self.segments();
        for (a, b) in &segments {
            let len = a.distance(*b);
            if remaining <= len {
                if len < f64::EPSILON {
                    return Some(*a);
                }
                return Some(a.lerp(*b, remaining / len));
            }
            remaining -= len;
        }
        segments.last().map(|(_, b)| *b).or_else(|| self.coordinates().first().copied())
    }
}

/// Signed shoelace area of an open ring.
fn shoelace(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Distance from `point` to the segment `a`-`b`.
pub fn distance_to_segment(point: Point, a: Point, b: Point) -> f64 {
    let line_vec = b - a;
    let point_vec = point - a;
    let len_sq = line_vec.hypot2();
    if len_sq < f64::EPSILON {
        return point_vec.hypot();
    }
    let t = (point_vec.dot(line_vec) / len_sq).clamp(0.0, 1.0);
    point.distance(a + line_vec * t)
}

/// Number of pairwise distinct vertices.
pub fn distinct_count(points: &[Point]) -> usize {
    let mut distinct: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !distinct.contains(p) {
            distinct.push(*p);
        }
    }
    distinct.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
    }

    #[test]
    fn test_polygon_metrics() {
        let polygon = square();
        assert_eq!(polygon.segments().len(), 4);
        assert!((polygon.planar_length() - 40.0).abs() < 1e-9);
        assert!((polygon.planar_area() - 100.0).abs() < 1e-9);
        assert_eq!(polygon.centroid(), Some(Point::new(5.0, 5.0)));
    }

    #[test]
    fn test_line_metrics() {
        let line = Geometry::LineString(vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)]);
        assert_eq!(line.segments().len(), 1);
        assert!((line.planar_length() - 5.0).abs() < 1e-9);
        assert_eq!(line.planar_area(), 0.0);
    }

    #[test]
    fn test_point_along() {
        let line = Geometry::LineString(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
        ]);
        assert_eq!(line.point_along(5.0), Some(Point::new(5.0, 0.0)));
        assert_eq!(line.point_along(15.0), Some(Point::new(10.0, 5.0)));
        assert_eq!(line.point_along(100.0), Some(Point::new(10.0, 10.0)));
    }

    #[test]
    fn test_distance_to_segment() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert!((distance_to_segment(Point::new(5.0, 3.0), a, b) - 3.0).abs() < 1e-9);
        assert!((distance_to_segment(Point::new(-4.0, 3.0), a, b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_count() {
        let p = Point::new(1.0, 1.0);
        assert_eq!(distinct_count(&[p, p, Point::new(2.0, 2.0)]), 2);
    }
}
