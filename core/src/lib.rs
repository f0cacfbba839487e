//! Shards Core - sharded collections over a record engine and an actor
//! object store.
//!
//! A [`RecordCollection`] is a lazily evaluated, cacheable set of partitions
//! that can be transformed, repartitioned, split and zipped. It can be handed
//! off to an [`ObjectStore`] as a [`StoreCollection`], whose partitions are
//! processed by long-lived actors.

pub mod actor;
pub mod cache;
pub mod codec;
pub mod collection;
pub mod config;
pub mod context;
pub mod error;
pub mod handoff;
pub mod logging;
pub mod partitioner;
pub mod persist;
pub mod record;
pub mod scheduler;
pub mod shard;
pub mod shared;
pub mod store;
pub mod store_collection;
pub mod table;

pub use actor::StoreActor;
pub use cache::{BlockManager, CacheState, CacheStats};
pub use collection::{ElementFn, ShardCollection};
pub use config::{NodeInfo, ShardsConfig};
pub use context::ShardContext;
pub use error::{Result, ShardError};
pub use handoff::generate_object_ids;
pub use persist::DEFAULT_BATCH_SIZE;
pub use record::{CacheScope, RecordCollection};
pub use shard::{ArrayData, DType, ElementKind, NdArray, Series, Shard, ShardKey, Value};
pub use shared::SharedValue;
pub use store::{InMemoryObjectStore, ObjectId, ObjectStore, PartitionRef};
pub use store_collection::StoreCollection;
