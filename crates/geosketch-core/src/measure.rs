//! Geodesic measurement of measurement features.
//!
//! Lengths and areas come from a [`GeodesicCalculator`]. Partition tooltips
//! mark cumulative distances along each geometry at a density that follows
//! the view resolution, and an area tooltip follows the centroid of the
//! unfinished sketch.

use crate::feature::FeatureId;
use crate::geometry::Geometry;
use crate::kind::SessionKind;
use crate::map::{LayerId, MapSurface, Overlay, OverlayId, OverlayKind};
use crate::projection::{EARTH_RADIUS, to_lon_lat};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Candidate partition steps as fractions of the total length.
const PARTITION_DELTAS: [f64; 3] = [0.01, 0.1, 1.0];

/// Cumulative statistic of a measurement geometry, in meters and square meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasureStatistic {
    pub length: f64,
    pub area: f64,
}

/// Length and area of a geometry given in map coordinates.
pub trait GeodesicCalculator {
    fn length(&self, geometry: &Geometry) -> f64;
    fn area(&self, geometry: &Geometry) -> f64;
}

/// Measures in the projected reference, straight from map units.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarCalculator;

impl GeodesicCalculator for PlanarCalculator {
    fn length(&self, geometry: &Geometry) -> f64 {
        geometry.planar_length()
    }

    fn area(&self, geometry: &Geometry) -> f64 {
        geometry.planar_area()
    }
}

/// Measures on the WGS84 sphere: great-circle lengths and spherical areas.
///
/// Input coordinates are Web Mercator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphericalCalculator;

impl SphericalCalculator {
    /// Haversine distance between two lon/lat points in degrees.
    fn haversine(a: Point, b: Point) -> f64 {
        let (lat1, lat2) = (a.y.to_radians(), b.y.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (b.x - a.x).to_radians();
        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * h.sqrt().atan2((1.0 - h).sqrt())
    }
}

impl GeodesicCalculator for SphericalCalculator {
    fn length(&self, geometry: &Geometry) -> f64 {
        geometry
            .segments()
            .iter()
            .map(|(a, b)| Self::haversine(to_lon_lat(*a), to_lon_lat(*b)))
            .sum()
    }

    fn area(&self, geometry: &Geometry) -> f64 {
        let Geometry::Polygon(ring) = geometry else {
            return 0.0;
        };
        if ring.len() < 3 {
            return 0.0;
        }
        let ring: Vec<Point> = ring.iter().map(|p| to_lon_lat(*p)).collect();
        let mut sum = 0.0;
        for i in 0..ring.len() {
            let a = ring[i];
            let b = ring[(i + 1) % ring.len()];
            sum += (b.x - a.x).to_radians()
                * (2.0 + a.y.to_radians().sin() + b.y.to_radians().sin());
        }
        (sum * EARTH_RADIUS * EARTH_RADIUS / 2.0).abs()
    }
}

/// Format a length, in meters below one kilometer.
pub fn format_length(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.1} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

/// Format an area, in square meters below one square kilometer.
pub fn format_area(square_meters: f64) -> String {
    if square_meters < 1_000_000.0 {
        format!("{:.0} m²", square_meters)
    } else {
        format!("{:.3} km²", square_meters / 1_000_000.0)
    }
}

/// Partition step as a fraction of the total length.
///
/// Picks the finest step that is still at least `min_pixels` long on screen.
/// A result of `1.0` means the geometry is too short for any partition.
pub fn partition_delta(planar_length: f64, resolution: f64, min_pixels: f64) -> f64 {
    if planar_length <= 0.0 || resolution <= 0.0 {
        return 1.0;
    }
    let on_screen = planar_length / resolution;
    PARTITION_DELTAS
        .into_iter()
        .find(|delta| on_screen * delta >= min_pixels)
        .unwrap_or(1.0)
}

/// Positions and labels of partition tooltips along a geometry.
pub fn partition_points(geometry: &Geometry, geodesic_length: f64, delta: f64) -> Vec<(Point, String)> {
    if delta >= 1.0 || delta <= 0.0 {
        return Vec::new();
    }
    let planar = geometry.planar_length();
    let steps = (1.0 / delta).round() as usize;
    (1..steps)
        .filter_map(|step| {
            let fraction = step as f64 * delta;
            geometry
                .point_along(planar * fraction)
                .map(|position| (position, format_length(geodesic_length * fraction)))
        })
        .collect()
}

/// Measurement state of one measurement session.
pub struct GeodesicMeasurement {
    calculator: Box<dyn GeodesicCalculator>,
    partition_min_pixels: f64,
    display_ruler: bool,
    partitions: HashMap<FeatureId, Vec<OverlayId>>,
    sketch_partitions: Vec<OverlayId>,
    area_overlay: Option<OverlayId>,
}

impl GeodesicMeasurement {
    pub fn new(calculator: Box<dyn GeodesicCalculator>, partition_min_pixels: f64) -> Self {
        Self {
            calculator,
            partition_min_pixels,
            display_ruler: true,
            partitions: HashMap::new(),
            sketch_partitions: Vec::new(),
            area_overlay: None,
        }
    }

    pub fn display_ruler(&self) -> bool {
        self.display_ruler
    }

    pub fn measure(&self, geometry: &Geometry) -> MeasureStatistic {
        MeasureStatistic {
            length: self.calculator.length(geometry),
            area: match geometry {
                Geometry::Polygon(_) => self.calculator.area(geometry),
                _ => 0.0,
            },
        }
    }

    /// Recompute the statistic and partitions of a stored feature.
    pub fn update_feature(
        &mut self,
        map: &mut dyn MapSurface,
        layer: &LayerId,
        id: &FeatureId,
    ) -> Option<MeasureStatistic> {
        let feature = map.layer_mut(layer)?.features.get_mut(id)?;
        let statistic = self.measure(&feature.geometry);
        feature.geodesic = Some(statistic);
        let geometry = feature.geometry.clone();

        let old = self.partitions.remove(id).unwrap_or_default();
        for overlay in old {
            map.remove_overlay(overlay);
        }
        let overlays = self.add_partitions(map, &geometry, statistic.length, Some(id));
        self.partitions.insert(id.clone(), overlays);
        Some(statistic)
    }

    /// Recompute sketch partitions and the area tooltip of the sketch preview.
    pub fn update_sketch(&mut self, map: &mut dyn MapSurface, preview: &Geometry) -> MeasureStatistic {
        let statistic = self.measure(preview);
        for overlay in std::mem::take(&mut self.sketch_partitions) {
            map.remove_overlay(overlay);
        }
        self.sketch_partitions = self.add_partitions(map, preview, statistic.length, None);

        match (preview, preview.centroid()) {
            (Geometry::Polygon(ring), Some(centroid)) if ring.len() >= 3 => {
                if let Some(old) = self.area_overlay.take() {
                    map.remove_overlay(old);
                }
                self.area_overlay = Some(map.add_overlay(Overlay {
                    kind: OverlayKind::Area,
                    position: centroid,
                    text: format_area(statistic.area),
                    feature: None,
                    visible: true,
                }));
            }
            _ => self.remove_area_overlay(map),
        }
        statistic
    }

    /// Drop every sketch decoration once the sketch ends.
    pub fn finish_sketch(&mut self, map: &mut dyn MapSurface) {
        for overlay in std::mem::take(&mut self.sketch_partitions) {
            map.remove_overlay(overlay);
        }
        self.remove_area_overlay(map);
    }

    fn remove_area_overlay(&mut self, map: &mut dyn MapSurface) {
        if let Some(overlay) = self.area_overlay.take() {
            map.remove_overlay(overlay);
        }
    }

    fn add_partitions(
        &self,
        map: &mut dyn MapSurface,
        geometry: &Geometry,
        geodesic_length: f64,
        feature: Option<&FeatureId>,
    ) -> Vec<OverlayId> {
        if !self.display_ruler {
            return Vec::new();
        }
        let delta = partition_delta(geometry.planar_length(), map.resolution(), self.partition_min_pixels);
        partition_points(geometry, geodesic_length, delta)
            .into_iter()
            .map(|(position, text)| {
                map.add_overlay(Overlay {
                    kind: OverlayKind::Partition,
                    position,
                    text,
                    feature: feature.cloned(),
                    visible: true,
                })
            })
            .collect()
    }

    /// Rebuild every partition after a zoom change.
    pub fn on_resolution_change(&mut self, map: &mut dyn MapSurface, layer: &LayerId) {
        let ids: Vec<FeatureId> = self.partitions.keys().cloned().collect();
        for id in ids {
            if self.update_feature(map, layer, &id).is_none() {
                self.remove_feature(map, &id);
            }
        }
    }

    /// Toggle partition tooltips and persist the preference on every
    /// measurement feature of `layer`. Hidden partitions are removed and
    /// rebuilt when shown again.
    pub fn set_display_ruler(&mut self, map: &mut dyn MapSurface, layer: &LayerId, display: bool) {
        self.display_ruler = display;
        if let Some(working) = map.layer_mut(layer) {
            for feature in working.features.iter_mut() {
                if feature.session_kind() == Some(SessionKind::Measure) {
                    feature.display_ruler = Some(display);
                }
            }
        }
        if display {
            self.on_resolution_change(map, layer);
            return;
        }
        for overlays in self.partitions.values_mut() {
            for overlay in overlays.drain(..) {
                map.remove_overlay(overlay);
            }
        }
        for overlay in std::mem::take(&mut self.sketch_partitions) {
            map.remove_overlay(overlay);
        }
    }

    /// Restore the preference without touching features.
    pub fn restore_display_ruler(&mut self, display: bool) {
        self.display_ruler = display;
    }

    pub fn remove_feature(&mut self, map: &mut dyn MapSurface, id: &FeatureId) {
        for overlay in self.partitions.remove(id).unwrap_or_default() {
            map.remove_overlay(overlay);
        }
    }

    /// Remove every overlay this measurement added.
    pub fn clear(&mut self, map: &mut dyn MapSurface) {
        for (_, overlays) in self.partitions.drain() {
            for overlay in overlays {
                map.remove_overlay(overlay);
            }
        }
        self.finish_sketch(map);
    }

    /// Partition overlays of a feature.
    pub fn partitions_of(&self, id: &FeatureId) -> &[OverlayId] {
        self.partitions.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}
