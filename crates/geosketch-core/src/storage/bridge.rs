//! Debounced persistence of a session's working layer.
//!
//! Edits only re-arm a deadline; the host drives time through
//! [`PersistenceBridge::is_due`] so bursts of edits collapse into one save.

use super::{
    FileFormat, GeoResource, GeoResourceData, GeoResourceRegistry, PersistenceCorrelation,
    StorageService, is_admin_id, is_file_id,
};
use crate::feature::{Feature, FeatureCollection};
use crate::kind::SessionKind;
use crate::kml::{KmlError, read_kml, write_kml};
use crate::map::{LayerId, MapSurface, VectorLayer};
use crate::store::{ReactiveStore, StoreAction};
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Serialize a collection in the transfer format.
pub fn serialize_features(features: &FeatureCollection) -> Result<String, KmlError> {
    let features: Vec<&Feature> = features.iter().collect();
    write_kml(&features)
}

/// Connects one session to the storage service and the resource registry.
pub struct PersistenceBridge {
    kind: SessionKind,
    storage: Arc<dyn StorageService>,
    registry: Arc<dyn GeoResourceRegistry>,
    /// Quiet period before a scheduled save runs.
    debounce: Duration,
    /// When the pending save becomes due.
    deadline: Option<Instant>,
    /// Content of the last successful save or import.
    last_content: Option<String>,
    correlation: Option<PersistenceCorrelation>,
    /// Id of the host layer this session's content was imported from.
    reused_layer: Option<LayerId>,
}

impl PersistenceBridge {
    pub fn new(
        kind: SessionKind,
        storage: Arc<dyn StorageService>,
        registry: Arc<dyn GeoResourceRegistry>,
        debounce: Duration,
    ) -> Self {
        Self {
            kind,
            storage,
            registry,
            debounce,
            deadline: None,
            last_content: None,
            correlation: None,
            reused_layer: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Arm (or re-arm) the pending save.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.debounce);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Check if the quiet period of the pending save has passed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Clear the pending save. Returns whether one was armed.
    pub fn take_pending(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn correlation(&self) -> Option<&PersistenceCorrelation> {
        self.correlation.as_ref()
    }

    pub fn reused_layer(&self) -> Option<&LayerId> {
        self.reused_layer.as_ref()
    }

    /// Save `content` unless it equals the last saved content.
    ///
    /// On success the correlation is written to the store. Failures are
    /// logged and leave the prior correlation untouched; the next edit
    /// retries.
    pub async fn store(&mut self, store: &dyn ReactiveStore, content: String) -> Option<PersistenceCorrelation> {
        if self.last_content.as_deref() == Some(content.as_str()) {
            log::debug!("{} content unchanged, skipping save", self.kind);
            return None;
        }
        let seed = self
            .correlation
            .clone()
            .or_else(|| store.state().slice(self.kind).file_save_result.clone())
            .map(|correlation| correlation.admin_id);

        match self.storage.save(seed.as_deref(), &content, FileFormat::Kml).await {
            Ok(correlation) => {
                log::info!("Saved {} content as {}", self.kind, correlation.file_id);
                self.last_content = Some(content);
                self.correlation = Some(correlation.clone());
                store.dispatch(StoreAction::SetFileSaveResult(correlation.clone()));
                Some(correlation)
            }
            Err(e) => {
                log::warn!("Failed to save {} content: {}", self.kind, e);
                None
            }
        }
    }

    /// Save now if the pending save is due.
    pub async fn maybe_save(
        &mut self,
        store: &dyn ReactiveStore,
        features: &FeatureCollection,
        now: Instant,
    ) -> Option<PersistenceCorrelation> {
        if !self.is_due(now) {
            return None;
        }
        self.deadline = None;
        self.save_features(store, features).await
    }

    /// Run the pending save right away, if any.
    pub async fn flush(&mut self, store: &dyn ReactiveStore, features: &FeatureCollection) -> Option<PersistenceCorrelation> {
        if !self.take_pending() {
            return None;
        }
        self.save_features(store, features).await
    }

    async fn save_features(
        &mut self,
        store: &dyn ReactiveStore,
        features: &FeatureCollection,
    ) -> Option<PersistenceCorrelation> {
        match serialize_features(features) {
            Ok(content) => self.store(store, content).await,
            Err(e) => {
                log::warn!("Failed to serialize {} features: {}", self.kind, e);
                None
            }
        }
    }

    /// First host layer whose id is a known admin or file id.
    pub fn find_reusable_layer(map: &dyn MapSurface) -> Option<LayerId> {
        map.layer_ids()
            .into_iter()
            .find(|id| is_admin_id(id.as_str()) || is_file_id(id.as_str()))
    }

    /// Layer a session hands back when it ended without a persisted resource.
    pub fn unsaved_layer_id(kind: SessionKind) -> LayerId {
        LayerId::new(format!("{}_unsaved", kind.prefix()))
    }

    /// Import the features of a previously persisted layer, plus those a
    /// failed save left behind, and remove both layers from the map.
    ///
    /// Anything that cannot be resolved is skipped and yields no features.
    /// Left-behind features arm a save.
    pub async fn import(&mut self, map: &mut dyn MapSurface) -> Vec<Feature> {
        let mut features = self.import_persisted(map).await;
        if let Some(mut unsaved) = map.remove_layer(&Self::unsaved_layer_id(self.kind)) {
            let recovered = unsaved.features.drain();
            log::info!("Recovered {} unsaved {} features", recovered.len(), self.kind);
            if !recovered.is_empty() {
                features.extend(recovered);
                self.schedule(Instant::now());
            }
        }
        features
    }

    async fn import_persisted(&mut self, map: &mut dyn MapSurface) -> Vec<Feature> {
        let Some(layer_id) = Self::find_reusable_layer(map) else {
            return Vec::new();
        };
        let Some(resource) = self.registry.by_id(layer_id.as_str()) else {
            log::debug!("No resource registered for layer {}", layer_id);
            return Vec::new();
        };
        let (content, file_id) = match resource.data {
            GeoResourceData::Inline(content) => (content, None),
            GeoResourceData::Stored { file_id } => match self.storage.load(&file_id).await {
                Ok(content) => (content, Some(file_id)),
                Err(e) => {
                    log::warn!("Failed to load {}: {}", file_id, e);
                    return Vec::new();
                }
            },
        };
        let features = match read_kml(&content) {
            Ok(features) => features,
            Err(e) => {
                log::warn!("Failed to read {}: {}", layer_id, e);
                return Vec::new();
            }
        };

        map.remove_layer(&layer_id);
        // Admin layers are edited in place; file layers are copied on first save.
        if let (true, Some(file_id)) = (is_admin_id(layer_id.as_str()), file_id) {
            self.correlation = Some(PersistenceCorrelation {
                admin_id: layer_id.to_string(),
                file_id,
            });
        }
        log::info!("Imported {} features from {}", features.len(), layer_id);
        self.last_content = Some(content);
        self.reused_layer = Some(layer_id);
        features
    }

    /// Hand the working layer back to the host when the session ends.
    ///
    /// A non-empty collection is registered as a metadata-suppressed layer
    /// named after its persisted resource; an empty one is simply removed.
    pub fn finalize(&mut self, map: &mut dyn MapSurface, working_layer: &LayerId) -> Option<LayerId> {
        let layer = map.remove_layer(working_layer)?;
        if layer.features.is_empty() {
            log::debug!("Removed empty {} layer", self.kind);
            return None;
        }

        let id = self
            .correlation
            .as_ref()
            .map(|correlation| LayerId::new(correlation.admin_id.clone()))
            .or_else(|| self.reused_layer.clone())
            .unwrap_or_else(|| Self::unsaved_layer_id(self.kind));
        let data = match &self.correlation {
            Some(correlation) => GeoResourceData::Stored {
                file_id: correlation.file_id.clone(),
            },
            // Nothing stored yet, so the resource carries the current features.
            None => match serialize_features(&layer.features) {
                Ok(content) => GeoResourceData::Inline(content),
                Err(e) => {
                    log::warn!("Failed to serialize {} features: {}", self.kind, e);
                    return None;
                }
            },
        };
        self.registry.add_or_replace(GeoResource {
            id: id.to_string(),
            label: self.kind.label().to_string(),
            format: FileFormat::Kml,
            data,
            hide_metadata: true,
        });

        let mut host = VectorLayer::new(id.clone(), self.kind.label());
        host.geo_resource_id = Some(id.to_string());
        host.hide_metadata = true;
        host.features = layer.features;
        map.add_layer(host);
        log::info!("Registered {} layer {}", self.kind, id);
        self.deadline = None;
        Some(id)
    }
}
