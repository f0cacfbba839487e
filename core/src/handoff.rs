//! Moving a record collection into an object store.
//!
//! Object ids are fixed before any data moves, so a partition write can be
//! retried (or a whole handoff repeated with the same ids) without creating
//! duplicates: an id already present in the store is skipped.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::codec::encode_partition;
use crate::error::{Result, ShardError};
use crate::record::RecordCollection;
use crate::store::{ObjectId, ObjectStore, PartitionRef};
use crate::store_collection::StoreCollection;

/// One fresh id per partition.
pub fn generate_object_ids(num_partitions: usize) -> Vec<ObjectId> {
    (0..num_partitions).map(|_| ObjectId::random()).collect()
}

impl RecordCollection {
    /// Write every partition to `store` under freshly generated ids.
    pub async fn to_store(&self, store: Arc<dyn ObjectStore>) -> Result<StoreCollection> {
        let ids = generate_object_ids(self.num_partitions());
        self.to_store_with_ids(store, ids).await
    }

    /// Write every partition to `store` under the given ids, one per
    /// partition. Partitions whose id is already stored are not rewritten.
    ///
    /// The collection's cache is released whether or not the handoff
    /// succeeds. The returned refs are ordered by node address.
    pub async fn to_store_with_ids(
        &self,
        store: Arc<dyn ObjectStore>,
        ids: Vec<ObjectId>,
    ) -> Result<StoreCollection> {
        if ids.len() != self.num_partitions() {
            self.release_cache();
            return Err(ShardError::InvalidArgument(format!(
                "{} object ids were given for {} partitions",
                ids.len(),
                self.num_partitions()
            )));
        }
        info!(
            collection_id = self.id(),
            partitions = ids.len(),
            store = store.address(),
            "handing off collection"
        );

        let max_retries = self.context().config().task_max_retries;
        let tasks: Vec<_> = ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                tokio::spawn(write_partition(
                    self.clone(),
                    store.clone(),
                    index,
                    id,
                    max_retries,
                ))
            })
            .collect();
        let results = join_all(tasks).await;
        self.release_cache();

        let mut written = Vec::with_capacity(results.len());
        for result in results {
            written.push(result??);
        }
        written.sort_by(|a: &(ObjectId, String), b| a.1.cmp(&b.1));

        let refs = written
            .into_iter()
            .map(|(id, node_ip)| PartitionRef::new(id, node_ip, store.address()))
            .collect();
        Ok(StoreCollection::new(self.context().clone(), store, refs))
    }
}

async fn write_partition(
    source: RecordCollection,
    store: Arc<dyn ObjectStore>,
    index: usize,
    id: ObjectId,
    max_retries: u32,
) -> Result<(ObjectId, String)> {
    let node_ip = source.context().config().node_for_partition(index).ip.clone();
    let mut attempt = 0;
    loop {
        match try_write(&source, store.as_ref(), index, id).await {
            Ok(()) => return Ok((id, node_ip)),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    partition = index,
                    object_id = %id,
                    attempt,
                    error = %e,
                    "retrying partition write"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_write(
    source: &RecordCollection,
    store: &dyn ObjectStore,
    index: usize,
    id: ObjectId,
) -> Result<()> {
    if store.contains(&id).await? {
        debug!(partition = index, object_id = %id, "already stored, skipping");
        return Ok(());
    }
    let source = source.clone();
    let blob = tokio::task::spawn_blocking(move || {
        let elements = source.compute_partition(index)?;
        encode_partition(&elements)
    })
    .await??;
    let stored = store.put(id, blob).await?;
    if stored != id {
        return Err(ShardError::StoreWrite(format!(
            "partition {} was written as {} instead of {}",
            index, stored, id
        )));
    }
    debug!(partition = index, object_id = %id, "stored partition");
    Ok(())
}
