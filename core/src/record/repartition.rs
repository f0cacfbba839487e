//! Kind-aware repartitioning.
//!
//! Increasing the partition count is an exchange: every source partition is
//! materialized, routed into buckets, and the buckets become the new
//! partitions. Decreasing it coalesces adjacent partitions without a shuffle.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use tracing::info;

use super::RecordCollection;
use crate::error::{Result, ShardError};
use crate::partitioner::{
    HashPartitioner, Partitioner, RoundRobinPartitioner, coalesce_groups, even_split_ranges,
};
use crate::scheduler::ComputeFn;
use crate::shard::{ElementKind, NdArray, Shard};
use crate::table::{concat_tables, row_buckets, split_by_bucket};

impl RecordCollection {
    /// Return a collection with exactly `num_partitions` partitions and the
    /// same contents.
    ///
    /// Tables are hashed on their first column when growing and concatenated
    /// when shrinking. Arrays and lists are split into contiguous runs or
    /// concatenated, preserving order. Other kinds are dealt out round-robin.
    pub fn repartition(&self, num_partitions: usize) -> Result<RecordCollection> {
        if num_partitions == 0 {
            return Err(ShardError::InvalidArgument(
                "the number of partitions must be positive".to_string(),
            ));
        }
        let kind = self.element_kind()?;
        let schema = self.schema()?;
        let current = self.num_partitions();
        let increase = num_partitions > current;
        info!(
            collection_id = self.id(),
            %kind,
            from = current,
            to = num_partitions,
            "repartitioning"
        );

        let array_ndim = match kind {
            ElementKind::Array => self
                .first()?
                .as_ref()
                .and_then(Shard::as_array)
                .map_or(0, NdArray::ndim),
            _ => 0,
        };

        let compute = match (kind, &schema) {
            (ElementKind::Table, Some(schema)) if !increase => {
                let schema = schema.clone();
                self.coalesce(num_partitions, move |elements| merge_tables(&schema, elements))
            }
            (ElementKind::Table, Some(schema)) if !schema.fields().is_empty() => {
                buckets_compute(self.hash_tables(schema, 0, num_partitions)?)
            }
            (ElementKind::Array, _) if array_ndim >= 1 => {
                if increase {
                    buckets_compute(self.split_arrays(num_partitions)?)
                } else {
                    self.coalesce(num_partitions, merge_arrays)
                }
            }
            (ElementKind::List, _) => {
                if increase {
                    buckets_compute(self.split_lists(num_partitions)?)
                } else {
                    self.coalesce(num_partitions, merge_lists)
                }
            }
            _ => buckets_compute(self.deal_round_robin(num_partitions)?),
        };

        let result = self.derive_with_kind(num_partitions, compute, kind, schema)?;
        self.release_system_cache();
        Ok(result)
    }

    /// Hash the rows of a table collection on `column` into
    /// `num_partitions` tables. Defaults to the current partition count.
    pub fn partition_by(
        &self,
        column: &str,
        num_partitions: Option<usize>,
    ) -> Result<RecordCollection> {
        let kind = self.element_kind()?;
        if kind != ElementKind::Table {
            return Err(ShardError::UnsupportedOperation(format!(
                "partition_by is only applicable to table collections, got {}",
                kind
            )));
        }
        let schema = self.schema()?.ok_or_else(|| {
            ShardError::UnsupportedOperation("table collection has no schema".to_string())
        })?;
        let column_index = schema.index_of(column).map_err(|_| {
            ShardError::UnsupportedOperation(format!(
                "The partition column {} is not in the table",
                column
            ))
        })?;
        let num_partitions = num_partitions.unwrap_or_else(|| self.num_partitions());
        if num_partitions == 0 {
            return Err(ShardError::InvalidArgument(
                "the number of partitions must be positive".to_string(),
            ));
        }
        info!(
            collection_id = self.id(),
            column,
            to = num_partitions,
            "partitioning by column"
        );

        let buckets = self.hash_tables(&schema, column_index, num_partitions)?;
        let result = self.derive_with_kind(
            num_partitions,
            buckets_compute(buckets),
            ElementKind::Table,
            Some(schema),
        )?;
        self.release_system_cache();
        Ok(result)
    }

    fn coalesce<M>(&self, num_partitions: usize, merge: M) -> ComputeFn
    where
        M: Fn(Vec<Shard>) -> Result<Shard> + Send + Sync + 'static,
    {
        let parent = self.clone();
        let groups = coalesce_groups(self.num_partitions(), num_partitions);
        Arc::new(move |index| {
            let mut elements = Vec::new();
            for source in groups.get(index).cloned().unwrap_or_default() {
                elements.extend(parent.compute_partition(source)?);
            }
            if elements.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![merge(elements)?])
        })
    }

    /// Route every row to a bucket by the hash of `column`. Each bucket
    /// becomes one table, empty when no row hashed to it.
    fn hash_tables(
        &self,
        schema: &SchemaRef,
        column: usize,
        num_partitions: usize,
    ) -> Result<Vec<Vec<Shard>>> {
        let partitioner = HashPartitioner::new(num_partitions);
        let scheduler = self.context().scheduler();
        let pieces: Vec<Vec<Vec<RecordBatch>>> =
            scheduler.execute_indexed(self.num_partitions(), |index| {
                let mut buckets: Vec<Vec<RecordBatch>> = vec![Vec::new(); num_partitions];
                for element in self.compute_partition(index)? {
                    let table = expect_table(element)?;
                    if table.num_rows() == 0 {
                        continue;
                    }
                    let assignment = row_buckets(&table, column, &partitioner)?;
                    let split = split_by_bucket(&table, &assignment, num_partitions)?;
                    for (bucket, piece) in split.into_iter().enumerate() {
                        if let Some(piece) = piece {
                            buckets[bucket].push(piece);
                        }
                    }
                }
                Ok(buckets)
            })?;
        scheduler.execute_indexed(num_partitions, |bucket| {
            let batches: Vec<RecordBatch> = pieces
                .iter()
                .flat_map(|source| source[bucket].iter().cloned())
                .collect();
            Ok(vec![Shard::Table(concat_tables(schema, &batches)?)])
        })
    }

    fn split_arrays(&self, num_partitions: usize) -> Result<Vec<Vec<Shard>>> {
        let arrays = self
            .collect()?
            .into_iter()
            .map(|element| match element {
                Shard::Array(array) => Ok(array),
                other => Err(unexpected(ElementKind::Array, &other)),
            })
            .collect::<Result<Vec<_>>>()?;
        let merged = NdArray::concat(&arrays)?;
        Ok(merged
            .array_split(num_partitions)
            .into_iter()
            .map(|piece| vec![Shard::Array(piece)])
            .collect())
    }

    fn split_lists(&self, num_partitions: usize) -> Result<Vec<Vec<Shard>>> {
        let mut items = Vec::new();
        for element in self.collect()? {
            match element {
                Shard::List(list) => items.extend(list),
                other => return Err(unexpected(ElementKind::List, &other)),
            }
        }
        Ok(even_split_ranges(items.len(), num_partitions)
            .into_iter()
            .map(|range| vec![Shard::List(items[range].to_vec())])
            .collect())
    }

    fn deal_round_robin(&self, num_partitions: usize) -> Result<Vec<Vec<Shard>>> {
        let partitioner = RoundRobinPartitioner::new(num_partitions);
        let mut buckets = vec![Vec::new(); num_partitions];
        for (position, element) in self.collect()?.into_iter().enumerate() {
            buckets[partitioner.get_partition(&position)].push(element);
        }
        Ok(buckets)
    }
}

fn buckets_compute(buckets: Vec<Vec<Shard>>) -> ComputeFn {
    let buckets = Arc::new(buckets);
    Arc::new(move |index| Ok(buckets.get(index).cloned().unwrap_or_default()))
}

fn unexpected(expected: ElementKind, found: &Shard) -> ShardError {
    ShardError::UnsupportedType(format!(
        "expected every element to be a {}, found a {}",
        expected,
        found.kind()
    ))
}

fn expect_table(element: Shard) -> Result<RecordBatch> {
    match element {
        Shard::Table(table) => Ok(table),
        other => Err(unexpected(ElementKind::Table, &other)),
    }
}

fn merge_tables(schema: &SchemaRef, elements: Vec<Shard>) -> Result<Shard> {
    let tables = elements
        .into_iter()
        .map(expect_table)
        .collect::<Result<Vec<_>>>()?;
    Ok(Shard::Table(concat_tables(schema, &tables)?))
}

fn merge_arrays(elements: Vec<Shard>) -> Result<Shard> {
    let arrays = elements
        .into_iter()
        .map(|element| match element {
            Shard::Array(array) => Ok(array),
            other => Err(unexpected(ElementKind::Array, &other)),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Shard::Array(NdArray::concat(&arrays)?))
}

fn merge_lists(elements: Vec<Shard>) -> Result<Shard> {
    let mut items = Vec::new();
    for element in elements {
        match element {
            Shard::List(list) => items.extend(list),
            other => return Err(unexpected(ElementKind::List, &other)),
        }
    }
    Ok(Shard::List(items))
}
