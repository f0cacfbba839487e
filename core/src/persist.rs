//! Durable persistence of record collections.
//!
//! A saved collection is a directory of part objects, one per partition,
//! followed by a `_SUCCESS` marker. Each part is a sequence of chunks, every
//! chunk a little-endian `u32` length followed by an encoded batch of up to
//! `batch_size` elements.

use std::sync::Arc;

use shards_common::{CommonError, Storage};
use tracing::info;

use crate::codec::{decode_partition, encode_partition};
use crate::context::ShardContext;
use crate::error::{Result, ShardError};
use crate::partitioner::even_split_ranges;
use crate::record::RecordCollection;
use crate::shard::Shard;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const SUCCESS_MARKER: &str = "_SUCCESS";

fn part_path(path: &str, index: usize) -> String {
    format!("{}/part-{:05}", path.trim_end_matches('/'), index)
}

/// Index of a `part-N` object, from its file name.
fn part_index(object: &str) -> Option<usize> {
    object
        .rsplit('/')
        .next()?
        .strip_prefix("part-")?
        .parse()
        .ok()
}

/// Part objects among `listed`, in partition order.
fn ordered_parts(listed: Vec<String>) -> Vec<String> {
    let mut parts: Vec<(usize, String)> = listed
        .into_iter()
        .filter_map(|object| part_index(&object).map(|index| (index, object)))
        .collect();
    parts.sort_by_key(|(index, _)| *index);
    parts.into_iter().map(|(_, object)| object).collect()
}

fn marker_path(path: &str) -> String {
    format!("{}/{}", path.trim_end_matches('/'), SUCCESS_MARKER)
}

fn encode_part(elements: &[Shard], batch_size: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for chunk in elements.chunks(batch_size) {
        let bytes = encode_partition(chunk)?;
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CommonError::serialization_error(format!("chunk of {} bytes is too large", bytes.len()))
        })?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

fn decode_part(path: &str, mut bytes: &[u8]) -> Result<Vec<Shard>> {
    let mut elements = Vec::new();
    while !bytes.is_empty() {
        let truncated = || -> ShardError {
            CommonError::deserialization_error(format!("part {} is truncated", path)).into()
        };
        let (len, rest) = bytes.split_first_chunk::<4>().ok_or_else(truncated)?;
        let len = u32::from_le_bytes(*len) as usize;
        if rest.len() < len {
            return Err(truncated());
        }
        let (chunk, rest) = rest.split_at(len);
        elements.extend(decode_partition(chunk)?);
        bytes = rest;
    }
    Ok(elements)
}

impl RecordCollection {
    /// Write the collection under `path`, one part object per partition.
    pub async fn save_durable(
        &self,
        storage: &Arc<dyn Storage>,
        path: &str,
        batch_size: usize,
    ) -> Result<()> {
        if batch_size == 0 {
            return Err(ShardError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        let this = self.clone();
        let partitions = tokio::task::spawn_blocking(move || this.partitions()).await??;
        for (index, elements) in partitions.iter().enumerate() {
            storage
                .put(&part_path(path, index), encode_part(elements, batch_size)?)
                .await?;
        }
        storage.put(&marker_path(path), Vec::new()).await?;
        info!(
            collection_id = self.id(),
            path,
            parts = partitions.len(),
            "saved collection"
        );
        Ok(())
    }
}

impl ShardContext {
    /// Load a collection written by [`RecordCollection::save_durable`].
    ///
    /// Each part becomes one partition. When fewer than `min_partitions`
    /// parts exist, the elements are re-split into `min_partitions`
    /// contiguous partitions.
    pub async fn load_durable(
        self: &Arc<Self>,
        storage: &Arc<dyn Storage>,
        path: &str,
        min_partitions: Option<usize>,
    ) -> Result<RecordCollection> {
        if !storage.exists(&marker_path(path)).await? {
            return Err(CommonError::not_found_error(format!(
                "{} has no {} marker",
                path, SUCCESS_MARKER
            ))
            .into());
        }
        let mut partitions = Vec::new();
        for part in ordered_parts(storage.list(path).await?) {
            let bytes = storage.get(&part).await?.ok_or_else(|| {
                CommonError::not_found_error(format!("part {} disappeared", part))
            })?;
            partitions.push(decode_part(&part, &bytes)?);
        }

        if let Some(min) = min_partitions {
            if min > partitions.len() {
                let elements: Vec<Shard> = partitions.into_iter().flatten().collect();
                partitions = even_split_ranges(elements.len(), min)
                    .into_iter()
                    .map(|range| elements[range].to_vec())
                    .collect();
            }
        }
        info!(path, partitions = partitions.len(), "loaded collection");
        self.parallelize(partitions)
    }
}
