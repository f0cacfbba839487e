//! The main context for a shards application.
//!
//! `ShardContext` owns everything collections share: the topology, the
//! worker pool, the block cache and the shared-value registry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

use crate::cache::BlockManager;
use crate::config::ShardsConfig;
use crate::error::{Result, ShardError};
use crate::record::RecordCollection;
use crate::scheduler::LocalScheduler;
use crate::shard::Shard;
use crate::shared::{BroadcastManager, SharedValue};

const SUPPORTED_PARTITION_INPUTS: &str = "supported inputs are an array, or a list, tuple or \
     map (possibly nested) whose leaves are arrays";

pub struct ShardContext {
    app_name: String,
    config: ShardsConfig,
    scheduler: LocalScheduler,
    block_manager: BlockManager,
    broadcasts: Arc<BroadcastManager>,
    next_collection_id: AtomicUsize,
}

impl fmt::Debug for ShardContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardContext")
            .field("app_name", &self.app_name)
            .field("nodes", &self.config.node_count())
            .field("total_cores", &self.config.total_cores())
            .finish()
    }
}

impl ShardContext {
    pub fn new(app_name: impl Into<String>, config: ShardsConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let app_name = app_name.into();
        let scheduler = LocalScheduler::new(config.total_cores())?;
        let block_manager = BlockManager::new(config.block_cache_capacity);
        let broadcasts = Arc::new(BroadcastManager::new(
            &config.nodes,
            config.replica_cache_capacity,
        ));
        info!(
            app_name = %app_name,
            nodes = config.node_count(),
            total_cores = config.total_cores(),
            eager = config.eager,
            "created shard context"
        );
        Ok(Arc::new(Self {
            app_name,
            config,
            scheduler,
            block_manager,
            broadcasts,
            next_collection_id: AtomicUsize::new(0),
        }))
    }

    /// A context for the local machine with the default configuration.
    pub fn local(app_name: impl Into<String>) -> Result<Arc<Self>> {
        Self::new(app_name, ShardsConfig::default())
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn config(&self) -> &ShardsConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &LocalScheduler {
        &self.scheduler
    }

    pub fn block_manager(&self) -> &BlockManager {
        &self.block_manager
    }

    pub fn broadcast_manager(&self) -> &Arc<BroadcastManager> {
        &self.broadcasts
    }

    pub(crate) fn new_collection_id(&self) -> usize {
        self.next_collection_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Wrap explicit partitions as a collection.
    pub fn parallelize(self: &Arc<Self>, partitions: Vec<Vec<Shard>>) -> Result<RecordCollection> {
        RecordCollection::from_partitions(self.clone(), partitions)
    }

    /// One partition per element.
    pub fn parallelize_elements(self: &Arc<Self>, elements: Vec<Shard>) -> Result<RecordCollection> {
        self.parallelize(elements.into_iter().map(|e| vec![e]).collect())
    }

    /// Split in-memory data along its leading axis into one partition per
    /// cluster core.
    ///
    /// `data` is either an array with at least one dimension, or a list,
    /// tuple or map whose leaves are such arrays of equal length. Containers
    /// keep their structure in every partition.
    pub fn partition(self: &Arc<Self>, data: Shard) -> Result<RecordCollection> {
        let parts = self.config.total_cores();
        let partitions = match &data {
            Shard::Array(array) if array.ndim() >= 1 => array
                .array_split(parts)
                .into_iter()
                .map(|piece| vec![Shard::Array(piece)])
                .collect(),
            Shard::List(_) | Shard::Tuple(_) | Shard::Map(_) => {
                split_structure(&data, parts)?.into_iter().map(|e| vec![e]).collect()
            }
            other => {
                return Err(ShardError::UnsupportedType(format!(
                    "cannot partition a {}; {}",
                    other.kind(),
                    SUPPORTED_PARTITION_INPUTS
                )));
            }
        };
        info!(partitions = parts, "partitioned local data");
        self.parallelize(partitions)
    }

    /// Register a read-only value for all workers.
    pub fn broadcast<T>(&self, value: &T) -> Result<SharedValue<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        SharedValue::new(value, self.broadcasts.clone())
    }
}

fn split_structure(data: &Shard, parts: usize) -> Result<Vec<Shard>> {
    let leaves = data.leaves();
    let mut arrays = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        match leaf {
            Shard::Array(array) if array.ndim() >= 1 => arrays.push(array),
            other => {
                return Err(ShardError::UnsupportedType(format!(
                    "found a {} leaf; {}",
                    other.kind(),
                    SUPPORTED_PARTITION_INPUTS
                )));
            }
        }
    }
    let first_len = match arrays.first().and_then(|a| a.len()) {
        Some(len) => len,
        None => {
            return Err(ShardError::UnsupportedType(format!(
                "the structure holds no arrays; {}",
                SUPPORTED_PARTITION_INPUTS
            )));
        }
    };
    if let Some(other) = arrays.iter().find(|a| a.len() != Some(first_len)) {
        return Err(ShardError::InconsistentShape(format!(
            "the arrays in data must all have the same size in the first dimension, \
             got first array of size {} and another {}",
            first_len,
            other.len().unwrap_or(0)
        )));
    }

    let split: Vec<_> = arrays.iter().map(|a| a.array_split(parts)).collect();
    (0..parts)
        .map(|idx| {
            let mut pieces = split.iter().map(|pieces| Shard::Array(pieces[idx].clone()));
            data.pack_leaves(&mut pieces).ok_or_else(|| {
                ShardError::InconsistentShape("structure changed while splitting".to_string())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{ArrayData, NdArray};
    use std::collections::BTreeMap;

    fn ctx(cores: usize) -> Arc<ShardContext> {
        ShardContext::new("test", ShardsConfig::default().with_topology(1, cores)).unwrap()
    }

    #[test]
    fn test_partition_array() {
        let ctx = ctx(2);
        let data = Shard::Array(NdArray::from_vec(vec![1i64, 2, 3, 4]));
        let rc = ctx.partition(data).unwrap();
        assert_eq!(rc.num_partitions(), 2);
        let parts = rc.partitions().unwrap();
        assert_eq!(parts[0], vec![Shard::Array(NdArray::from_vec(vec![1i64, 2]))]);
        assert_eq!(parts[1], vec![Shard::Array(NdArray::from_vec(vec![3i64, 4]))]);
    }

    #[test]
    fn test_partition_nested_structure() {
        let ctx = ctx(3);
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Shard::Array(NdArray::from_vec(vec![1.0, 2.0, 3.0])));
        map.insert(
            "y".to_string(),
            Shard::Array(NdArray::from_vec(vec![10i64, 20, 30])),
        );
        let rc = ctx.partition(Shard::Map(map)).unwrap();
        let parts = rc.partitions().unwrap();
        assert_eq!(parts.len(), 3);
        let Shard::Map(first) = &parts[0][0] else {
            panic!("expected a map");
        };
        assert_eq!(
            first["y"].as_array().unwrap().data(),
            &ArrayData::Int64(vec![10])
        );
    }

    #[test]
    fn test_partition_rejects_bad_input() {
        let ctx = ctx(2);
        assert!(matches!(
            ctx.partition(Shard::int(1)),
            Err(ShardError::UnsupportedType(_))
        ));
        let uneven = Shard::Tuple(vec![
            Shard::Array(NdArray::from_vec(vec![1i64, 2])),
            Shard::Array(NdArray::from_vec(vec![1i64, 2, 3])),
        ]);
        assert!(matches!(
            ctx.partition(uneven),
            Err(ShardError::InconsistentShape(_))
        ));
        assert!(matches!(
            ctx.partition(Shard::List(vec![])),
            Err(ShardError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_collection_ids_are_unique() {
        let ctx = ctx(1);
        let a = ctx.new_collection_id();
        let b = ctx.new_collection_id();
        assert_ne!(a, b);
    }
}
