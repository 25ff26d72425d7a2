//! In-memory storage service and resource registry.

use super::{
    ADMIN_ID_PREFIX, BoxFuture, FILE_ID_PREFIX, FileFormat, GeoResource, GeoResourceRegistry,
    PersistenceCorrelation, StorageError, StorageResult, StorageService,
};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// A recorded call to [`MemoryStorage::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCall {
    pub admin_id: Option<String>,
    pub content: String,
    pub format: FileFormat,
}

/// In-memory storage for testing and ephemeral use.
#[derive(Default)]
pub struct MemoryStorage {
    /// admin id -> file id
    admins: RwLock<HashMap<String, String>>,
    /// file id -> content
    files: RwLock<HashMap<String, String>>,
    calls: RwLock<Vec<SaveCall>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following save fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every save call so far, including rejected ones.
    pub fn calls(&self) -> Vec<SaveCall> {
        self.calls.read().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn save_count(&self) -> usize {
        self.calls.read().map(|calls| calls.len()).unwrap_or_default()
    }

    /// Store content directly under a new file id.
    pub fn insert_file(&self, content: &str) -> StorageResult<String> {
        let file_id = format!("{FILE_ID_PREFIX}{}", uuid::Uuid::new_v4().simple());
        self.files
            .write()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?
            .insert(file_id.clone(), content.to_string());
        Ok(file_id)
    }
}

impl StorageService for MemoryStorage {
    fn save(
        &self,
        admin_id: Option<&str>,
        content: &str,
        format: FileFormat,
    ) -> BoxFuture<'_, StorageResult<PersistenceCorrelation>> {
        let admin_id = admin_id.map(str::to_string);
        let content = content.to_string();
        Box::pin(async move {
            self.calls
                .write()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?
                .push(SaveCall {
                    admin_id: admin_id.clone(),
                    content: content.clone(),
                    format,
                });
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Rejected("storage unavailable".to_string()));
            }

            let mut admins = self
                .admins
                .write()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
            let (admin_id, file_id) = match admin_id {
                Some(admin_id) => {
                    let file_id = admins
                        .get(&admin_id)
                        .cloned()
                        .ok_or_else(|| StorageError::NotFound(admin_id.clone()))?;
                    (admin_id, file_id)
                }
                None => {
                    let admin_id = format!("{ADMIN_ID_PREFIX}{}", uuid::Uuid::new_v4().simple());
                    let file_id = format!("{FILE_ID_PREFIX}{}", uuid::Uuid::new_v4().simple());
                    admins.insert(admin_id.clone(), file_id.clone());
                    (admin_id, file_id)
                }
            };
            self.files
                .write()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?
                .insert(file_id.clone(), content);
            Ok(PersistenceCorrelation { admin_id, file_id })
        })
    }

    fn load(&self, file_id: &str) -> BoxFuture<'_, StorageResult<String>> {
        let file_id = file_id.to_string();
        Box::pin(async move {
            let files = self
                .files
                .read()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
            files.get(&file_id).cloned().ok_or(StorageError::NotFound(file_id))
        })
    }
}

/// In-memory geo resource registry.
#[derive(Default)]
pub struct MemoryRegistry {
    resources: RwLock<HashMap<String, GeoResource>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resources.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GeoResourceRegistry for MemoryRegistry {
    fn by_id(&self, id: &str) -> Option<GeoResource> {
        self.resources.read().ok()?.get(id).cloned()
    }

    fn add_or_replace(&self, resource: GeoResource) {
        match self.resources.write() {
            Ok(mut resources) => {
                resources.insert(resource.id.clone(), resource);
            }
            Err(e) => log::error!("Failed to register resource: {}", e),
        }
    }
}
