//! GeoSketch Core Library
//!
//! Platform-agnostic interaction sessions for drawing and measuring vector
//! geometries on a web map: the session state machine, sketch lifecycle,
//! snapping, selection with cross-tool handoff, debounced persistence and
//! geodesic measurement.

pub mod config;
pub mod controller;
pub mod feature;
pub mod geometry;
pub mod input;
pub mod kind;
pub mod kml;
pub mod map;
pub mod measure;
pub mod projection;
pub mod selection;
pub mod sketch;
pub mod snap;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::{InputDevice, MinPoints, SessionConfig};
pub use controller::{InteractionController, InteractionMode, Services};
pub use feature::{Feature, FeatureCollection, FeatureColor, FeatureId, FeatureStyle, StyleOption};
pub use geometry::{Geometry, GeometryType};
pub use input::{InputState, Key, MapEvent};
pub use kind::{DrawKind, DrawKindRequest, SessionKind};
pub use kml::{EMPTY_CONTENT, KmlError, read_kml, write_kml};
pub use map::{LayerId, MapSurface, MemoryMap, VectorLayer};
pub use measure::{
    GeodesicCalculator, GeodesicMeasurement, MeasureStatistic, PlanarCalculator,
    SphericalCalculator,
};
pub use selection::{Handoff, SelectOutcome, SelectionCoordinator};
pub use sketch::{SketchInfo, SketchLifecycleManager};
pub use snap::{SnapResolver, SnapResult, SnapType};
pub use storage::{
    GeoResource, GeoResourceData, GeoResourceRegistry, MemoryRegistry, MemoryStorage,
    PersistenceBridge, PersistenceCorrelation, StorageError, StorageResult, StorageService,
};
pub use store::{MemoryStore, ReactiveStore, StoreAction, StoreChange, StoreState};
