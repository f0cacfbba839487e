//! The interface shared by record-engine and object-store collections.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::shard::Shard;

/// A function applied to every element by [`ShardCollection::transform`].
pub type ElementFn = Arc<dyn Fn(Shard) -> Result<Shard> + Send + Sync>;

/// An ordered sequence of partitions.
#[async_trait]
pub trait ShardCollection: Send + Sync + Debug {
    fn num_partitions(&self) -> usize;

    /// All elements, in partition order.
    async fn collect(&self) -> Result<Vec<Shard>>;

    /// Apply `f` to every element, producing a collection with the same
    /// partition count. Extra arguments are captured by the closure.
    async fn transform(&self, f: ElementFn) -> Result<Arc<dyn ShardCollection>>;
}
