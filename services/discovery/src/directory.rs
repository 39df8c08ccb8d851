//! Partition directory
//!
//! Deterministically maps a `mesh_id` (or the reserved name `global`) to its
//! partition owner and spawns owners on first reference. At most one live
//! owner exists per id. Registry partitions get a clone of the metrics
//! handle at spawn time, so cleanup reporting flows through the directory's
//! lifecycle rather than a back-reference between partitions.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{OnceCell, RwLock};

use coral::CoralError;

use crate::metrics::{self, MetricsHandle};
use crate::partition::{self, RegistryHandle};
use crate::store::{MetricsStore, RegistryStore};

/// Stable id for a partition name: the first 16 hex characters of its
/// SHA-256. Equal names produce equal ids across process lifetimes, and the
/// result is filesystem-safe for database file names.
pub fn partition_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct PartitionDirectory {
    data_dir: PathBuf,
    default_ttl_seconds: u32,
    cleanup_interval_ms: u64,
    registries: RwLock<HashMap<String, RegistryHandle>>,
    metrics: OnceCell<MetricsHandle>,
}

impl PartitionDirectory {
    pub fn new(
        data_dir: PathBuf,
        default_ttl_seconds: u32,
        cleanup_interval_ms: u64,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            default_ttl_seconds,
            cleanup_interval_ms,
            registries: RwLock::new(HashMap::new()),
            metrics: OnceCell::new(),
        })
    }

    /// The singleton metrics partition, spawned on first reference. Its
    /// database file is named by the reserved literal, which can never
    /// collide with the hex ids of registry partitions.
    pub async fn metrics(&self) -> Result<MetricsHandle, CoralError> {
        self.metrics
            .get_or_try_init(|| async {
                let store = MetricsStore::open(&self.data_dir.join("global.db"))
                    .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;
                Ok(metrics::spawn(store))
            })
            .await
            .cloned()
    }

    /// The registry partition owning `mesh_id`, spawned on first reference.
    pub async fn registry(&self, mesh_id: &str) -> Result<RegistryHandle, CoralError> {
        let id = partition_id(mesh_id);

        if let Some(handle) = self.registries.read().await.get(&id) {
            return Ok(handle.clone());
        }

        let metrics = match self.metrics().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("metrics partition unavailable, cleanup goes unreported: {}", e);
                None
            }
        };

        let mut registries = self.registries.write().await;
        if let Some(handle) = registries.get(&id) {
            return Ok(handle.clone());
        }

        let store = RegistryStore::open(&self.data_dir.join(format!("{}.db", id)))
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;
        let handle = partition::spawn(
            id.clone(),
            store,
            self.default_ttl_seconds,
            self.cleanup_interval_ms,
            metrics,
        );
        registries.insert(id, handle.clone());
        Ok(handle)
    }

    /// Every registry partition live in this process, for health aggregation.
    pub async fn live_registries(&self) -> Vec<RegistryHandle> {
        self.registries.read().await.values().cloned().collect()
    }
}
