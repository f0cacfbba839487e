//! Shared read-only values
//!
//! A [`SharedValue`] is serialized once into the driver-side registry. Each
//! node fetches it at most once into its replica cache, and every handle
//! decodes it at most once.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use moka::sync::Cache;
use serde::{Serialize, de::DeserializeOwned};
use shards_common::CommonError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec::{decode_value, encode_value};
use crate::config::NodeInfo;
use crate::error::Result;

/// Unique identifier for a shared value
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct BroadcastId(pub String);

impl BroadcastId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for BroadcastId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Driver registry of serialized shared values plus one replica cache per
/// node.
pub struct BroadcastManager {
    broadcasts: RwLock<HashMap<BroadcastId, Arc<Vec<u8>>>>,
    replicas: HashMap<String, Cache<BroadcastId, Arc<Vec<u8>>>>,
    registry_fetches: AtomicU64,
}

impl fmt::Debug for BroadcastManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastManager")
            .field("nodes", &self.replicas.len())
            .field("registry_fetches", &self.registry_fetches())
            .finish()
    }
}

impl BroadcastManager {
    pub fn new(nodes: &[NodeInfo], replica_capacity: u64) -> Self {
        let replicas = nodes
            .iter()
            .map(|node| {
                (
                    node.ip.clone(),
                    Cache::builder().max_capacity(replica_capacity).build(),
                )
            })
            .collect();
        Self {
            broadcasts: RwLock::new(HashMap::new()),
            replicas,
            registry_fetches: AtomicU64::new(0),
        }
    }

    pub fn register(&self, id: BroadcastId, data: Vec<u8>) {
        let mut broadcasts = self
            .broadcasts
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        broadcasts.insert(id, Arc::new(data));
    }

    /// Read the serialized value from the registry.
    pub fn fetch(&self, id: &BroadcastId) -> Result<Arc<Vec<u8>>> {
        self.registry_fetches.fetch_add(1, Ordering::Relaxed);
        let broadcasts = self
            .broadcasts
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        broadcasts.get(id).cloned().ok_or_else(|| {
            CommonError::not_found_error(format!("shared value {} has been released", id)).into()
        })
    }

    /// Read the serialized value through `node`'s replica cache.
    pub fn fetch_on(&self, node: &str, id: &BroadcastId) -> Result<Arc<Vec<u8>>> {
        let replicas = self.replicas.get(node).ok_or_else(|| {
            CommonError::not_found_error(format!("unknown node {}", node))
        })?;
        if let Some(data) = replicas.get(id) {
            return Ok(data);
        }
        let data = self.fetch(id)?;
        debug!(%id, node, "replicated shared value");
        replicas.insert(id.clone(), data.clone());
        Ok(data)
    }

    /// Drop the value from the registry and from every replica.
    pub fn remove(&self, id: &BroadcastId) -> Result<()> {
        let removed = self
            .broadcasts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        for replicas in self.replicas.values() {
            replicas.invalidate(id);
        }
        match removed {
            Some(_) => Ok(()),
            None => Err(CommonError::not_found_error(format!(
                "shared value {} was already released",
                id
            ))
            .into()),
        }
    }

    pub fn list_broadcasts(&self) -> Vec<BroadcastId> {
        self.broadcasts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of reads served by the registry itself.
    pub fn registry_fetches(&self) -> u64 {
        self.registry_fetches.load(Ordering::Relaxed)
    }
}

/// A read-only value available to every worker.
pub struct SharedValue<T> {
    id: BroadcastId,
    manager: Arc<BroadcastManager>,
    local: Arc<OnceLock<Arc<T>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            manager: self.manager.clone(),
            local: self.local.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SharedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedValue")
            .field("id", &self.id)
            .field("fetched", &self.local.get().is_some())
            .finish()
    }
}

impl<T> SharedValue<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub(crate) fn new(value: &T, manager: Arc<BroadcastManager>) -> Result<Self> {
        let id = BroadcastId::new();
        let data = encode_value(value)?;
        info!(%id, bytes = data.len(), "registered shared value");
        manager.register(id.clone(), data);
        Ok(Self {
            id,
            manager,
            local: Arc::new(OnceLock::new()),
            _marker: PhantomData,
        })
    }

    pub fn id(&self) -> &BroadcastId {
        &self.id
    }

    /// The value, fetched and decoded on first access.
    pub fn get(&self) -> Result<Arc<T>> {
        if let Some(value) = self.local.get() {
            return Ok(value.clone());
        }
        let data = self.manager.fetch(&self.id)?;
        let value = Arc::new(decode_value::<T>(&data)?);
        Ok(self.local.get_or_init(|| value).clone())
    }

    /// The value as seen from `node`, going through its replica cache.
    pub fn get_on(&self, node: &str) -> Result<T> {
        let data = self.manager.fetch_on(node, &self.id)?;
        decode_value(&data)
    }

    /// Release the value from the registry and all replicas. Releasing twice
    /// fails with a not-found error.
    pub fn release(&self) -> Result<()> {
        self.manager.remove(&self.id)?;
        info!(id = %self.id, "released shared value");
        Ok(())
    }
}
