//! Fleet service
//!
//! The workload catalog the poller checks images for. The real catalog
//! lives with the fleet manager; `InMemoryFleet` stands in for it and can be
//! seeded from a JSON file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use drydock_core::domain::image::RegistryCredentials;
use drydock_core::domain::workload::{Workload, WorkloadId, WorkloadPollingSettings};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use super::credentials::StaticCredentials;
use super::settings::InMemorySettings;

/// Source of workloads and the images they run
#[async_trait]
pub trait WorkloadCatalog: Send + Sync {
    /// All tracked workloads, in a stable order
    async fn list_workloads(&self) -> Result<Vec<Workload>>;

    async fn get_workload(&self, id: &WorkloadId) -> Result<Option<Workload>>;
}

/// Process-local workload catalog
#[derive(Default)]
pub struct InMemoryFleet {
    workloads: RwLock<IndexMap<WorkloadId, Workload>>,
}

impl InMemoryFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a workload
    pub fn upsert(&self, workload: Workload) {
        debug!(workload = %workload.id, images = workload.images.len(), "Workload tracked");
        self.workloads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workload.id.clone(), workload);
    }

    /// Stops tracking a workload
    pub fn remove(&self, id: &WorkloadId) -> Option<Workload> {
        self.workloads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(id)
    }

    /// Records the digest a workload now runs for `reference`
    ///
    /// Returns false if the workload or the image is unknown.
    pub fn set_current_digest(&self, id: &WorkloadId, reference: &str, digest: &str) -> bool {
        let mut workloads = self.workloads.write().unwrap_or_else(PoisonError::into_inner);
        let Some(workload) = workloads.get_mut(id) else {
            return false;
        };
        match workload.images.iter_mut().find(|i| i.reference == reference) {
            Some(image) => {
                image.current_digest = Some(digest.to_string());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkloadCatalog for InMemoryFleet {
    async fn list_workloads(&self) -> Result<Vec<Workload>> {
        Ok(self
            .workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn get_workload(&self, id: &WorkloadId) -> Result<Option<Workload>> {
        Ok(self
            .workloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }
}

/// Initial fleet state loaded from a JSON file
///
/// ```json
/// {
///   "settings": { "pollingInterval": 30 },
///   "registries": [{ "registry": "ghcr.io", "username": "bot", "password": "..." }],
///   "workloads": [
///     {
///       "id": "web",
///       "name": "web",
///       "images": [{ "reference": "nginx:1.25", "current_digest": "sha256:..." }],
///       "polling": { "polling_enabled": true, "polling_interval": 10 }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct FleetSeed {
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub registries: Vec<SeedRegistry>,

    #[serde(default)]
    pub workloads: Vec<SeedWorkload>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRegistry {
    pub registry: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedWorkload {
    #[serde(flatten)]
    pub workload: Workload,

    #[serde(default)]
    pub polling: Option<WorkloadPollingSettings>,
}

impl FleetSeed {
    /// Reads a seed file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid fleet file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Loads the seed into the in-memory collaborators
    pub fn apply(
        self,
        fleet: &InMemoryFleet,
        settings: &InMemorySettings,
        credentials: &mut StaticCredentials,
    ) -> Result<()> {
        for (key, value) in self.settings {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            settings
                .set(&key, value)
                .with_context(|| format!("Invalid setting '{}' in fleet file", key))?;
        }

        for registry in self.registries {
            credentials.insert(
                registry.registry,
                RegistryCredentials::new(registry.username, registry.password),
            );
        }

        let count = self.workloads.len();
        for seed in self.workloads {
            if let Some(polling) = seed.polling {
                settings
                    .set_workload_settings(seed.workload.id.clone(), polling)
                    .with_context(|| {
                        format!("Invalid polling override for workload {}", seed.workload.id)
                    })?;
            }
            fleet.upsert(seed.workload);
        }

        info!(workloads = count, "Fleet seed loaded");
        Ok(())
    }
}
