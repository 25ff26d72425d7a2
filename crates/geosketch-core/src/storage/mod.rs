//! Persistence contracts: the storage service, the geo resource registry and
//! the debounced bridge between a session and both.

mod bridge;
mod memory;

pub use bridge::{PersistenceBridge, serialize_features};
pub use memory::{MemoryRegistry, MemoryStorage, SaveCall};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Prefix of admin ids (edit rights).
pub const ADMIN_ID_PREFIX: &str = "a_";
/// Prefix of file ids (read-only access).
pub const FILE_ID_PREFIX: &str = "f_";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Save rejected: {0}")]
    Rejected(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Whether `id` is an admin id.
pub fn is_admin_id(id: &str) -> bool {
    id.starts_with(ADMIN_ID_PREFIX)
}

/// Whether `id` is a file id.
pub fn is_file_id(id: &str) -> bool {
    id.starts_with(FILE_ID_PREFIX)
}

/// Transfer formats understood by the storage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Kml,
}

impl FileFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            FileFormat::Kml => "application/vnd.google-earth.kml+xml",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Kml => f.write_str("kml"),
        }
    }
}

/// Identifies the persisted resource a session's content maps to. Both ids
/// come from the same save, so they are always set together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceCorrelation {
    pub admin_id: String,
    pub file_id: String,
}

/// Backend that stores serialized collections.
///
/// Note: On native platforms, implementations must be Send + Sync.
/// On WASM, these bounds are relaxed since it's single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub trait StorageService: Send + Sync {
    /// Save `content`. Without an admin id a new resource is created,
    /// otherwise the resource behind `admin_id` is updated.
    fn save(
        &self,
        admin_id: Option<&str>,
        content: &str,
        format: FileFormat,
    ) -> BoxFuture<'_, StorageResult<PersistenceCorrelation>>;

    /// Load the content behind a file id.
    fn load(&self, file_id: &str) -> BoxFuture<'_, StorageResult<String>>;
}

/// Backend that stores serialized collections (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait StorageService {
    /// Save `content`. Without an admin id a new resource is created,
    /// otherwise the resource behind `admin_id` is updated.
    fn save(
        &self,
        admin_id: Option<&str>,
        content: &str,
        format: FileFormat,
    ) -> BoxFuture<'_, StorageResult<PersistenceCorrelation>>;

    /// Load the content behind a file id.
    fn load(&self, file_id: &str) -> BoxFuture<'_, StorageResult<String>>;
}

/// Where the content of a registered resource lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoResourceData {
    /// Content kept in memory, e.g. because no save succeeded.
    Inline(String),
    /// Content persisted by the storage service.
    Stored { file_id: String },
}

/// An addressable resource that map layers can be built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoResource {
    pub id: String,
    pub label: String,
    pub format: FileFormat,
    pub data: GeoResourceData,
    /// Hide from catalog and metadata listings.
    pub hide_metadata: bool,
}

/// Host registry of geo resources.
#[cfg(not(target_arch = "wasm32"))]
pub trait GeoResourceRegistry: Send + Sync {
    fn by_id(&self, id: &str) -> Option<GeoResource>;
    fn add_or_replace(&self, resource: GeoResource);
}

/// Host registry of geo resources (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait GeoResourceRegistry {
    fn by_id(&self, id: &str) -> Option<GeoResource>;
    fn add_or_replace(&self, resource: GeoResource);
}
