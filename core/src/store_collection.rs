//! Collections whose partitions live in an object store.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use shards_common::CommonError;
use tracing::info;

use crate::actor::{StoreActor, assign_actors, dispatch};
use crate::codec::decode_partition;
use crate::collection::{ElementFn, ShardCollection};
use crate::context::ShardContext;
use crate::error::{Result, ShardError};
use crate::record::RecordCollection;
use crate::shard::Shard;
use crate::store::{ObjectStore, PartitionRef};

/// An ordered sequence of store-resident partitions, processed by actors.
#[derive(Debug, Clone)]
pub struct StoreCollection {
    ctx: Arc<ShardContext>,
    store: Arc<dyn ObjectStore>,
    partitions: Vec<PartitionRef>,
}

impl StoreCollection {
    pub fn new(
        ctx: Arc<ShardContext>,
        store: Arc<dyn ObjectStore>,
        partitions: Vec<PartitionRef>,
    ) -> Self {
        Self {
            ctx,
            store,
            partitions,
        }
    }

    /// Move a record collection into `store`.
    pub async fn from_record_collection(
        collection: &RecordCollection,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        collection.to_store(store).await
    }

    pub fn partition_refs(&self) -> &[PartitionRef] {
        &self.partitions
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Process every partition with `f` on an assigned actor. `f` returns the
    /// ref of the partition it produced.
    pub async fn transform_with_actors<A, F, Fut>(
        &self,
        actors: &[Arc<A>],
        f: F,
        gang_scheduling: bool,
    ) -> Result<StoreCollection>
    where
        A: StoreActor,
        F: Fn(Arc<A>, PartitionRef) -> Fut,
        Fut: Future<Output = Result<PartitionRef>> + Send + 'static,
    {
        let assignment = assign_actors(&self.partitions, &actor_nodes(actors))?;
        info!(
            partitions = self.partitions.len(),
            actors = actors.len(),
            "transforming with actors"
        );
        let items = assignment
            .into_iter()
            .zip(self.partitions.iter().cloned())
            .collect();
        let partitions = dispatch(actors, items, f, gang_scheduling).await?;
        Ok(self.with_partitions(partitions))
    }

    /// Like [`Self::transform_with_actors`], over pairs of refs at matching
    /// indices of `self` and `other`.
    pub async fn zip_with_actors<A, F, Fut>(
        &self,
        other: &StoreCollection,
        actors: &[Arc<A>],
        f: F,
        gang_scheduling: bool,
    ) -> Result<StoreCollection>
    where
        A: StoreActor,
        F: Fn(Arc<A>, (PartitionRef, PartitionRef)) -> Fut,
        Fut: Future<Output = Result<PartitionRef>> + Send + 'static,
    {
        if self.num_partitions() != other.num_partitions() {
            return Err(ShardError::ShapeMismatch(format!(
                "The two collections should have the same number of partitions, got {} and {}",
                self.num_partitions(),
                other.num_partitions()
            )));
        }
        let assignment = assign_actors(&self.partitions, &actor_nodes(actors))?;
        info!(
            partitions = self.partitions.len(),
            actors = actors.len(),
            "zipping with actors"
        );
        let items = assignment
            .into_iter()
            .zip(
                self.partitions
                    .iter()
                    .cloned()
                    .zip(other.partitions.iter().cloned()),
            )
            .collect();
        let partitions = dispatch(actors, items, f, gang_scheduling).await?;
        Ok(self.with_partitions(partitions))
    }

    fn with_partitions(&self, partitions: Vec<PartitionRef>) -> StoreCollection {
        StoreCollection::new(self.ctx.clone(), self.store.clone(), partitions)
    }

    /// Fetch and decode the blob behind `partition`.
    pub async fn fetch_partition(&self, partition: &PartitionRef) -> Result<Vec<Shard>> {
        let blob = self.store.get(&partition.object_id).await?.ok_or_else(|| {
            CommonError::not_found_error(format!(
                "object {} is not in store {}",
                partition.object_id, partition.store_address
            ))
        })?;
        decode_partition(&blob)
    }

    async fn fetch_all(&self) -> Result<Vec<Vec<Shard>>> {
        try_join_all(self.partitions.iter().map(|p| self.fetch_partition(p))).await
    }

    pub async fn collect(&self) -> Result<Vec<Shard>> {
        Ok(self.fetch_all().await?.into_iter().flatten().collect())
    }

    /// Bring the partitions back to the record engine, one blob per
    /// partition.
    pub async fn to_record_collection(&self) -> Result<RecordCollection> {
        let partitions = self.fetch_all().await?;
        self.ctx.parallelize(partitions)
    }
}

fn actor_nodes<A: StoreActor>(actors: &[Arc<A>]) -> Vec<String> {
    actors.iter().map(|a| a.node_ip()).collect()
}

#[async_trait]
impl ShardCollection for StoreCollection {
    fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    async fn collect(&self) -> Result<Vec<Shard>> {
        StoreCollection::collect(self).await
    }

    async fn transform(&self, _f: ElementFn) -> Result<Arc<dyn ShardCollection>> {
        Err(ShardError::UnsupportedOperation(
            "store collections are transformed with actors, see transform_with_actors"
                .to_string(),
        ))
    }
}
