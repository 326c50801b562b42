//! Persistence of deployed services.
//!
//! Tasks look up and record the container backing each service through
//! the [`Storage`] trait. [`MemoryStorage`] keeps the records in memory
//! and can round-trip them through a JSON file.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Container id recorded after a service was cleaned
pub const CLEANED_CONTAINER_ID: &str = "-";

/// One deployed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub cluster_id: String,
    pub service_id: String,
    pub container_id: String,
}

impl ServiceRecord {
    /// True when a live container backs the service.
    pub fn has_container(&self) -> bool {
        is_live_container(&self.container_id)
    }
}

/// A stored container id names a live container unless it is empty or
/// the cleaned marker.
pub fn is_live_container(container_id: &str) -> bool {
    !container_id.is_empty() && container_id != CLEANED_CONTAINER_ID
}

/// Service lookup and update used by tasks.
#[cfg_attr(test, mockall::automock)]
pub trait Storage: Send + Sync {
    /// Container id recorded for `service_id`
    fn container_id(&self, service_id: &str) -> Result<Option<String>>;

    /// Overwrite the container id of an existing service
    fn set_container_id(&self, service_id: &str, container_id: &str) -> Result<()>;

    /// Insert or replace a service
    fn insert_service(&self, cluster_id: &str, service_id: &str, container_id: &str)
        -> Result<()>;

    /// Services of one cluster, in insertion order
    fn services(&self, cluster_id: &str) -> Result<Vec<ServiceRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageState {
    services: IndexMap<String, ServiceRecord>,
}

/// In-memory [`Storage`], optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<StorageState>,
    path: Option<PathBuf>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file yields an empty store bound to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| Error::ConfigParse {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            StorageState::default()
        };
        debug!(path = %path.display(), services = state.services.len(), "Opened storage");
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    /// Write the records back to the bound file, if any.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&*self.state.read())?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Storage for MemoryStorage {
    fn container_id(&self, service_id: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .services
            .get(service_id)
            .map(|s| s.container_id.clone()))
    }

    fn set_container_id(&self, service_id: &str, container_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let record = state
            .services
            .get_mut(service_id)
            .ok_or_else(|| Error::Storage(format!("service '{}' not found", service_id)))?;
        record.container_id = container_id.to_string();
        Ok(())
    }

    fn insert_service(
        &self,
        cluster_id: &str,
        service_id: &str,
        container_id: &str,
    ) -> Result<()> {
        self.state.write().services.insert(
            service_id.to_string(),
            ServiceRecord {
                cluster_id: cluster_id.to_string(),
                service_id: service_id.to_string(),
                container_id: container_id.to_string(),
            },
        );
        Ok(())
    }

    fn services(&self, cluster_id: &str) -> Result<Vec<ServiceRecord>> {
        Ok(self
            .state
            .read()
            .services
            .values()
            .filter(|s| s.cluster_id == cluster_id)
            .cloned()
            .collect())
    }
}
