//! Local Task Scheduler
//!
//! Partition tasks run on a dedicated Rayon thread pool sized to the
//! configured cluster cores.

use std::fmt::Debug;
use std::sync::Arc;

use rayon::prelude::*;
use shards_common::CommonError;

use crate::error::{Result, ShardError};
use crate::shard::Shard;

/// Computes the elements of one partition by index.
pub type ComputeFn = Arc<dyn Fn(usize) -> Result<Vec<Shard>> + Send + Sync>;

/// Task represents a unit of work to be executed
pub struct Task {
    pub partition_index: usize,
    pub compute_fn: ComputeFn,
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("partition_index", &self.partition_index)
            .field("compute_fn", &"<function>")
            .finish()
    }
}

impl Task {
    pub fn new(partition_index: usize, compute_fn: ComputeFn) -> Self {
        Self {
            partition_index,
            compute_fn,
        }
    }

    pub fn execute(&self) -> Result<Vec<Shard>> {
        (self.compute_fn)(self.partition_index)
    }
}

/// LocalScheduler manages parallel execution of tasks using Rayon
#[derive(Debug)]
pub struct LocalScheduler {
    pool: rayon::ThreadPool,
}

impl LocalScheduler {
    /// Create a new LocalScheduler with the specified number of threads
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("shards-worker-{}", i))
            .build()
            .map_err(|e| {
                ShardError::Store(CommonError::internal_error_with_source(
                    "failed to build worker pool",
                    e,
                ))
            })?;
        Ok(Self { pool })
    }

    /// Get the number of threads
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Execute a collection of tasks in parallel, keeping task order
    pub fn execute_tasks(&self, tasks: Vec<Task>) -> Result<Vec<Vec<Shard>>> {
        self.pool
            .install(|| tasks.into_par_iter().map(|task| task.execute()).collect())
    }

    /// Run `f` over every partition index in parallel.
    pub fn execute_indexed<R, F>(&self, num_partitions: usize, f: F) -> Result<Vec<R>>
    where
        R: Send,
        F: Fn(usize) -> Result<R> + Send + Sync,
    {
        self.pool
            .install(|| (0..num_partitions).into_par_iter().map(&f).collect())
    }

    /// Execute tasks and reduce the per-partition results
    pub fn execute_and_reduce<R, F, G>(
        &self,
        tasks: Vec<Task>,
        identity: R,
        fold_fn: F,
        reduce_fn: G,
    ) -> Result<R>
    where
        R: Send + Sync + Clone,
        F: Fn(R, &Shard) -> R + Send + Sync,
        G: Fn(R, R) -> R + Send + Sync,
    {
        self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let partition_data = task.execute()?;
                    Ok(partition_data.iter().fold(identity.clone(), &fold_fn))
                })
                .reduce(
                    || Ok(identity.clone()),
                    |acc, item| match (acc, item) {
                        (Ok(a), Ok(b)) => Ok(reduce_fn(a, b)),
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    },
                )
        })
    }
}
