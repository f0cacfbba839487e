//! Block manager for collection caching

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use tracing::debug;

use crate::shard::Shard;

/// How a collection's partitions are retained between actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uncached,
    /// Cached because the collection was produced by an operation; released
    /// when a derived collection takes over.
    SystemCached,
    /// Pinned by the user; only released by an explicit uncache.
    UserCached,
}

impl CacheState {
    pub fn is_cached(self) -> bool {
        !matches!(self, CacheState::Uncached)
    }
}

/// Unique identifier for a cached block
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct BlockId {
    pub collection_id: usize,
    pub partition_index: usize,
}

impl BlockId {
    pub fn new(collection_id: usize, partition_index: usize) -> Self {
        Self {
            collection_id,
            partition_index,
        }
    }
}

/// Snapshot of block cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub cached_partitions: u64,
    pub evicted_partitions: u64,
}

impl CacheStats {
    /// Calculate cache hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    cached_partitions: AtomicU64,
    evicted_partitions: AtomicU64,
}

/// Holds materialized partitions of cached collections, bounded by a
/// partition count.
pub struct BlockManager {
    blocks: Cache<BlockId, Arc<Vec<Shard>>>,
    counters: Counters,
}

impl fmt::Debug for BlockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockManager")
            .field("stats", &self.stats())
            .finish()
    }
}

impl BlockManager {
    pub fn new(max_partitions: u64) -> Self {
        Self {
            blocks: Cache::builder().max_capacity(max_partitions).build(),
            counters: Counters::default(),
        }
    }

    pub fn put_block(&self, block_id: BlockId, data: Arc<Vec<Shard>>) {
        self.blocks.insert(block_id, data);
        self.counters.cached_partitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_block(&self, block_id: &BlockId) -> Option<Arc<Vec<Shard>>> {
        let block = self.blocks.get(block_id);
        let counter = if block.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        block
    }

    pub fn contains_block(&self, block_id: &BlockId) -> bool {
        self.blocks.contains_key(block_id)
    }

    /// Drop every block of a collection; returns how many were present.
    pub fn remove_collection(&self, collection_id: usize, num_partitions: usize) -> usize {
        let mut removed = 0;
        for partition_index in 0..num_partitions {
            let id = BlockId::new(collection_id, partition_index);
            if self.blocks.remove(&id).is_some() {
                removed += 1;
            }
        }
        self.counters
            .evicted_partitions
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(collection_id, removed, "removed cached blocks");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            cached_partitions: self.counters.cached_partitions.load(Ordering::Relaxed),
            evicted_partitions: self.counters.evicted_partitions.load(Ordering::Relaxed),
        }
    }
}
