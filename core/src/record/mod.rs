//! Record collections
//!
//! A `RecordCollection` is a lazily evaluated partition graph: each
//! collection holds a compute function from partition index to elements,
//! usually closing over its parent. Partitions run on the context's worker
//! pool and are kept in the block cache while the collection is cached.

mod ops;
mod repartition;

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::{BlockId, CacheState};
use crate::collection::{ElementFn, ShardCollection};
use crate::context::ShardContext;
use crate::error::{Result, ShardError};
use crate::scheduler::{ComputeFn, Task};
use crate::shard::{ElementKind, Shard};

struct Inner {
    ctx: Arc<ShardContext>,
    id: usize,
    num_partitions: usize,
    compute: ComputeFn,
    state: Mutex<CacheState>,
    kind: OnceLock<ElementKind>,
    schema: OnceLock<Option<SchemaRef>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.is_cached() {
            self.ctx
                .block_manager()
                .remove_collection(self.id, self.num_partitions);
        }
    }
}

/// A partitioned collection on the record engine. Cloning is cheap and
/// clones share cache state.
#[derive(Clone)]
pub struct RecordCollection {
    inner: Arc<Inner>,
}

impl fmt::Debug for RecordCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCollection")
            .field("id", &self.inner.id)
            .field("num_partitions", &self.inner.num_partitions)
            .field("cache_state", &self.cache_state())
            .field("kind", &self.inner.kind.get())
            .finish()
    }
}

impl RecordCollection {
    fn new(
        ctx: Arc<ShardContext>,
        num_partitions: usize,
        compute: ComputeFn,
        state: CacheState,
    ) -> Self {
        let id = ctx.new_collection_id();
        Self {
            inner: Arc::new(Inner {
                ctx,
                id,
                num_partitions,
                compute,
                state: Mutex::new(state),
                kind: OnceLock::new(),
                schema: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn from_partitions(
        ctx: Arc<ShardContext>,
        partitions: Vec<Vec<Shard>>,
    ) -> Result<Self> {
        let num_partitions = partitions.len();
        let data = Arc::new(partitions);
        let compute: ComputeFn = Arc::new(move |index| {
            data.get(index).cloned().ok_or_else(|| {
                ShardError::InvalidArgument(format!("partition {} does not exist", index))
            })
        });
        let collection = Self::new(ctx, num_partitions, compute, CacheState::SystemCached);
        collection.maybe_compute()?;
        Ok(collection)
    }

    /// A collection computed from this one. Transient collections are never
    /// cached or eagerly evaluated.
    pub(crate) fn derive(
        &self,
        num_partitions: usize,
        compute: ComputeFn,
        transient: bool,
    ) -> Result<RecordCollection> {
        let state = if transient {
            CacheState::Uncached
        } else {
            CacheState::SystemCached
        };
        let derived = Self::new(self.inner.ctx.clone(), num_partitions, compute, state);
        if !transient {
            derived.maybe_compute()?;
        }
        Ok(derived)
    }

    /// Like [`Self::derive`] for kind-preserving operations.
    pub(crate) fn derive_with_kind(
        &self,
        num_partitions: usize,
        compute: ComputeFn,
        kind: ElementKind,
        schema: Option<SchemaRef>,
    ) -> Result<RecordCollection> {
        let derived = Self::new(
            self.inner.ctx.clone(),
            num_partitions,
            compute,
            CacheState::SystemCached,
        );
        let _ = derived.inner.kind.set(kind);
        let _ = derived.inner.schema.set(schema);
        derived.maybe_compute()?;
        Ok(derived)
    }

    fn maybe_compute(&self) -> Result<()> {
        if self.inner.ctx.config().eager {
            self.compute()?;
        }
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn context(&self) -> &Arc<ShardContext> {
        &self.inner.ctx
    }

    pub fn num_partitions(&self) -> usize {
        self.inner.num_partitions
    }

    /// Elements of partition `index`, served from the block cache when the
    /// collection is cached.
    pub fn compute_partition(&self, index: usize) -> Result<Vec<Shard>> {
        let cached = self.cache_state().is_cached();
        let block_id = BlockId::new(self.inner.id, index);
        let blocks = self.inner.ctx.block_manager();
        if cached {
            if let Some(block) = blocks.get_block(&block_id) {
                return Ok(block.as_ref().clone());
            }
        }
        let data = (self.inner.compute)(index)?;
        if cached {
            blocks.put_block(block_id, Arc::new(data.clone()));
        }
        Ok(data)
    }

    fn partition_task(&self) -> ComputeFn {
        let this = self.clone();
        Arc::new(move |index| this.compute_partition(index))
    }

    fn tasks(&self) -> Vec<Task> {
        let compute = self.partition_task();
        (0..self.num_partitions())
            .map(|index| Task::new(index, compute.clone()))
            .collect()
    }

    /// Materialize every partition in parallel.
    pub fn partitions(&self) -> Result<Vec<Vec<Shard>>> {
        self.inner.ctx.scheduler().execute_tasks(self.tasks())
    }

    pub fn collect(&self) -> Result<Vec<Shard>> {
        Ok(self.partitions()?.into_iter().flatten().collect())
    }

    /// Number of elements across all partitions.
    pub fn count(&self) -> Result<usize> {
        self.inner
            .ctx
            .scheduler()
            .execute_and_reduce(self.tasks(), 0usize, |acc, _| acc + 1, |a, b| a + b)
    }

    /// Materialize every partition, filling the cache.
    pub fn compute(&self) -> Result<()> {
        self.partitions().map(|_| ())
    }

    /// The first element of the first non-empty partition.
    pub fn first(&self) -> Result<Option<Shard>> {
        for index in 0..self.num_partitions() {
            if let Some(element) = self.compute_partition(index)?.into_iter().next() {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// The kind of this collection's elements, detected once. An empty
    /// collection reports [`ElementKind::Scalar`].
    pub fn element_kind(&self) -> Result<ElementKind> {
        if let Some(kind) = self.inner.kind.get() {
            return Ok(*kind);
        }
        let first = self.first()?;
        let kind = first.as_ref().map_or(ElementKind::Scalar, Shard::kind);
        let schema = first.as_ref().and_then(Shard::as_table).map(|t| t.schema());
        let _ = self.inner.schema.set(schema);
        Ok(*self.inner.kind.get_or_init(|| kind))
    }

    /// Schema of the first table, for table collections.
    pub fn schema(&self) -> Result<Option<SchemaRef>> {
        self.element_kind()?;
        Ok(self.inner.schema.get().cloned().flatten())
    }

    /// Apply `f` to every element.
    pub fn transform<F>(&self, f: F) -> Result<RecordCollection>
    where
        F: Fn(Shard) -> Result<Shard> + Send + Sync + 'static,
    {
        let parent = self.clone();
        let compute: ComputeFn = Arc::new(move |index| {
            parent
                .compute_partition(index)?
                .into_iter()
                .map(&f)
                .collect()
        });
        let derived = self.derive(self.num_partitions(), compute, false)?;
        self.release_system_cache();
        Ok(derived)
    }

    pub fn cache_state(&self) -> CacheState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cached(&self) -> bool {
        self.cache_state().is_cached()
    }

    /// Pin the collection's partitions in the block cache.
    pub fn cache(&self) -> &Self {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = CacheState::UserCached;
        self
    }

    /// Drop the pin and any cached partitions. Uncaching a collection that
    /// holds no cache only logs a warning.
    pub fn uncache(&self) -> &Self {
        if !self.release_cache() {
            warn!(
                collection_id = self.inner.id,
                "Try to unpersist an uncached collection"
            );
        }
        self
    }

    /// Returns whether anything was cached.
    pub(crate) fn release_cache(&self) -> bool {
        let previous = std::mem::replace(
            &mut *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner),
            CacheState::Uncached,
        );
        if previous.is_cached() {
            self.inner
                .ctx
                .block_manager()
                .remove_collection(self.inner.id, self.inner.num_partitions);
            debug!(collection_id = self.inner.id, ?previous, "released cache");
        }
        previous.is_cached()
    }

    /// Demote a collection cached by an operation once a derived collection
    /// takes over. User pins are kept.
    pub(crate) fn release_system_cache(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == CacheState::SystemCached {
            *state = CacheState::Uncached;
            drop(state);
            self.inner
                .ctx
                .block_manager()
                .remove_collection(self.inner.id, self.inner.num_partitions);
        }
    }

    /// Pin the collection until the returned guard is dropped.
    pub fn cache_scope(&self) -> CacheScope {
        let previous = self.cache_state();
        self.cache();
        CacheScope {
            collection: self.clone(),
            previous,
        }
    }
}

/// Keeps a collection pinned while in scope; see
/// [`RecordCollection::cache_scope`].
pub struct CacheScope {
    collection: RecordCollection,
    previous: CacheState,
}

impl Deref for CacheScope {
    type Target = RecordCollection;

    fn deref(&self) -> &RecordCollection {
        &self.collection
    }
}

impl Drop for CacheScope {
    /// Put back the state the scope found. Blocks stay when the collection
    /// was cached before the scope began.
    fn drop(&mut self) {
        match self.previous {
            CacheState::Uncached => {
                self.collection.release_cache();
            }
            previous => {
                *self
                    .collection
                    .inner
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = previous;
            }
        }
    }
}

#[async_trait]
impl ShardCollection for RecordCollection {
    fn num_partitions(&self) -> usize {
        RecordCollection::num_partitions(self)
    }

    async fn collect(&self) -> Result<Vec<Shard>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.collect()).await?
    }

    async fn transform(&self, f: ElementFn) -> Result<Arc<dyn ShardCollection>> {
        let this = self.clone();
        let derived = tokio::task::spawn_blocking(move || this.transform(move |e| f(e))).await??;
        Ok(Arc::new(derived))
    }
}
