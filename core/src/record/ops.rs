//! Element-level operations on record collections.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::RecordCollection;
use crate::error::{Result, ShardError};
use crate::scheduler::ComputeFn;
use crate::shard::{ElementKind, Shard, ShardKey, Value};
use crate::table::distinct_values;

impl RecordCollection {
    /// Distinct values of a series collection or a single-column table
    /// collection, in first-seen order.
    pub fn unique(&self) -> Result<Vec<Value>> {
        let single_column = match self.element_kind()? {
            ElementKind::Series => true,
            ElementKind::Table => self
                .schema()?
                .is_some_and(|schema| schema.fields().len() == 1),
            _ => false,
        };
        if !single_column {
            return Err(ShardError::UnsupportedOperation(
                "unique() is only supported for series or single-column table collections"
                    .to_string(),
            ));
        }

        let per_partition = self
            .context()
            .scheduler()
            .execute_indexed(self.num_partitions(), |index| {
                let mut values = Vec::new();
                for element in self.compute_partition(index)? {
                    let distinct = match &element {
                        Shard::Series(series) => distinct_values(series.values().as_ref())?,
                        Shard::Table(table) if table.num_columns() == 1 => {
                            distinct_values(table.column(0).as_ref())?
                        }
                        other => {
                            return Err(ShardError::UnsupportedType(format!(
                                "cannot take unique values of a {}",
                                other.kind()
                            )));
                        }
                    };
                    values.extend(distinct);
                }
                Ok(values)
            })?;

        let mut seen = HashSet::new();
        Ok(per_partition
            .into_iter()
            .flatten()
            .filter(|value| seen.insert(value.clone()))
            .collect())
    }

    /// Split a collection of equal-length tuples or lists into one
    /// collection per position. Elements that are not sequences count as
    /// length 1; a collection of length-1 elements is returned as is.
    pub fn split(&self) -> Result<Vec<RecordCollection>> {
        let lengths = self
            .context()
            .scheduler()
            .execute_indexed(self.num_partitions(), |index| {
                Ok(self
                    .compute_partition(index)?
                    .iter()
                    .map(sequence_len)
                    .collect::<Vec<_>>())
            })?;
        let mut lengths = lengths.into_iter().flatten();
        let Some(width) = lengths.next() else {
            return Ok(vec![self.clone()]);
        };
        if lengths.any(|len| len != width) {
            return Err(ShardError::InconsistentShape(
                "the elements of the collection must have the same length to split".to_string(),
            ));
        }
        if width <= 1 {
            return Ok(vec![self.clone()]);
        }

        debug!(collection_id = self.id(), width, "splitting collection");
        let split = (0..width)
            .map(|position| {
                let parent = self.clone();
                let compute: ComputeFn = Arc::new(move |index| {
                    parent
                        .compute_partition(index)?
                        .into_iter()
                        .map(|element| take_position(element, position))
                        .collect()
                });
                self.derive(self.num_partitions(), compute, false)
            })
            .collect::<Result<Vec<_>>>()?;
        self.release_system_cache();
        Ok(split)
    }

    /// Pair this collection's elements with `other`'s, partition by
    /// partition, into two-element tuples.
    pub fn zip(&self, other: &RecordCollection) -> Result<RecordCollection> {
        if self.num_partitions() != other.num_partitions() {
            return Err(ShardError::ShapeMismatch(format!(
                "The two collections should have the same number of partitions, got {} and {}",
                self.num_partitions(),
                other.num_partitions()
            )));
        }
        let left = self.clone();
        let right = other.clone();
        let compute: ComputeFn = Arc::new(move |index| {
            let a = left.compute_partition(index)?;
            let b = right.compute_partition(index)?;
            if a.len() != b.len() {
                return Err(ShardError::ShapeMismatch(format!(
                    "The two collections should have the same number of elements in each \
                     partition, partition {} has {} and {}",
                    index,
                    a.len(),
                    b.len()
                )));
            }
            Ok(a.into_iter()
                .zip(b)
                .map(|(x, y)| Shard::Tuple(vec![x, y]))
                .collect())
        });
        let zipped = self.derive(self.num_partitions(), compute, false)?;
        self.release_system_cache();
        other.release_system_cache();
        Ok(zipped)
    }

    /// Total length of all elements: rows for tables, the leading dimension
    /// for arrays, item counts for containers, and 1 for anything else.
    pub fn size(&self) -> Result<usize> {
        self.context().scheduler().execute_and_reduce(
            self.tasks(),
            0usize,
            |acc, element| acc + element.len().unwrap_or(1),
            |a, b| a + b,
        )
    }

    /// Select `key` from every element. Failures are reported per element
    /// when the result is materialized.
    pub fn get_item(&self, key: impl Into<ShardKey>) -> Result<RecordCollection> {
        let key = key.into();
        let parent = self.clone();
        let compute: ComputeFn = Arc::new(move |partition| {
            parent
                .compute_partition(partition)?
                .iter()
                .enumerate()
                .map(|(element, shard)| {
                    shard.get(&key).map_err(|message| ShardError::PerElement {
                        partition,
                        element,
                        message,
                    })
                })
                .collect()
        });
        self.derive(self.num_partitions(), compute, true)
    }

    /// Apply `f` to every element and keep each outcome. Only a failure to
    /// materialize a partition fails the whole call.
    pub fn for_each<T, F>(&self, f: F) -> Result<Vec<Result<T>>>
    where
        T: Send,
        F: Fn(&Shard) -> Result<T> + Send + Sync,
    {
        let per_partition = self
            .context()
            .scheduler()
            .execute_indexed(self.num_partitions(), |partition| {
                Ok(self
                    .compute_partition(partition)?
                    .iter()
                    .enumerate()
                    .map(|(element, shard)| {
                        f(shard).map_err(|e| match e {
                            ShardError::PerElement { .. } => e,
                            other => ShardError::PerElement {
                                partition,
                                element,
                                message: other.to_string(),
                            },
                        })
                    })
                    .collect::<Vec<_>>())
            })?;
        Ok(per_partition.into_iter().flatten().collect())
    }
}

fn sequence_len(element: &Shard) -> usize {
    match element {
        Shard::Tuple(items) | Shard::List(items) => items.len(),
        _ => 1,
    }
}

fn take_position(element: Shard, position: usize) -> Result<Shard> {
    match element {
        Shard::Tuple(items) | Shard::List(items) => {
            items.into_iter().nth(position).ok_or_else(|| {
                ShardError::InconsistentShape(format!("element has no position {}", position))
            })
        }
        other => Err(ShardError::InconsistentShape(format!(
            "cannot split a {}",
            other.kind()
        ))),
    }
}
