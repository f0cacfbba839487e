//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use shards_common::CommonError;
use shards_core::codec::{decode_partition, encode_partition};
use shards_core::store::{InMemoryObjectStore, ObjectId, ObjectStore, PartitionRef};
use shards_core::{Shard, ShardContext, ShardsConfig, StoreActor, Value};

/// Create a test context with `nodes` nodes of `cores` cores each
pub fn create_test_context(name: &str, nodes: usize, cores: usize) -> Arc<ShardContext> {
    ShardContext::new(name, ShardsConfig::default().with_topology(nodes, cores)).unwrap()
}

/// A two-column `(a, b)` table of integers
pub fn int_table(a: &[i64], b: &[i64]) -> Shard {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, false),
        Field::new("b", DataType::Int64, false),
    ]));
    Shard::Table(
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(a.to_vec())),
                Arc::new(Int64Array::from(b.to_vec())),
            ],
        )
        .unwrap(),
    )
}

/// All `(a, b)` rows of a set of two-column integer tables
pub fn table_rows(elements: &[Shard]) -> Vec<(i64, i64)> {
    let mut rows = Vec::new();
    for element in elements {
        let table = element.as_table().expect("expected a table");
        let a = table.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        let b = table.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        for i in 0..a.len() {
            rows.push((a.value(i), b.value(i)));
        }
    }
    rows
}

/// Integer payloads of scalar elements
pub fn ints(elements: &[Shard]) -> Vec<i64> {
    elements
        .iter()
        .map(|e| match e {
            Shard::Scalar(Value::Int(v)) => *v,
            other => panic!("expected an integer, got {:?}", other),
        })
        .collect()
}

/// Assert that two vectors contain the same elements (order-independent)
pub fn assert_same_elements<T: Ord + Clone + std::fmt::Debug>(
    mut actual: Vec<T>,
    mut expected: Vec<T>,
) {
    actual.sort();
    expected.sort();
    assert_eq!(actual, expected);
}

/// An actor that owns a handle to the shared object store
#[derive(Debug)]
pub struct TestActor {
    pub node: String,
    pub store: Arc<InMemoryObjectStore>,
}

impl TestActor {
    pub fn new(node: &str, store: Arc<InMemoryObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            node: node.to_string(),
            store,
        })
    }

    /// Read a partition, apply `f` to every element and store the result.
    pub async fn map_partition(
        &self,
        partition: &PartitionRef,
        f: impl Fn(Shard) -> Shard,
    ) -> shards_core::Result<PartitionRef> {
        let elements = self.read(partition).await?;
        let out: Vec<Shard> = elements.into_iter().map(f).collect();
        self.write(&out).await
    }

    pub async fn read(&self, partition: &PartitionRef) -> shards_core::Result<Vec<Shard>> {
        let blob = self
            .store
            .get(&partition.object_id)
            .await?
            .ok_or_else(|| CommonError::not_found_error(partition.object_id.to_hex()))?;
        decode_partition(&blob)
    }

    pub async fn write(&self, elements: &[Shard]) -> shards_core::Result<PartitionRef> {
        let id = self.store.put_new(encode_partition(elements)?).await?;
        Ok(PartitionRef::new(id, self.node.clone(), self.store.address()))
    }
}

impl StoreActor for TestActor {
    fn node_ip(&self) -> String {
        self.node.clone()
    }
}

/// How a [`FaultyStore`] misbehaves on `put`.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Store the object, then report a transient failure.
    LandThenFail,
    /// Report a transient failure without storing.
    FailBeforeWrite,
    /// Store the object but acknowledge a different id.
    WrongId,
}

/// Wraps an in-memory store and injects faults into the first `failures`
/// writes.
#[derive(Debug)]
pub struct FaultyStore {
    pub inner: InMemoryObjectStore,
    fault: Fault,
    remaining: AtomicU32,
    pub put_attempts: AtomicU32,
}

impl FaultyStore {
    pub fn new(fault: Fault, failures: u32) -> Self {
        Self {
            inner: InMemoryObjectStore::new("memory://faulty"),
            fault,
            remaining: AtomicU32::new(failures),
            put_attempts: AtomicU32::new(0),
        }
    }

    fn take_failure(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn contains(&self, id: &ObjectId) -> shards_common::Result<bool> {
        self.inner.contains(id).await
    }

    async fn put(&self, id: ObjectId, data: Vec<u8>) -> shards_common::Result<ObjectId> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.take_failure() {
            return self.inner.put(id, data).await;
        }
        match self.fault {
            Fault::LandThenFail => {
                self.inner.put(id, data).await?;
                Err(CommonError::storage_error("connection reset after write"))
            }
            Fault::FailBeforeWrite => Err(CommonError::storage_error("connection refused")),
            Fault::WrongId => {
                self.inner.put(id, data).await?;
                Ok(ObjectId::random())
            }
        }
    }

    async fn get(&self, id: &ObjectId) -> shards_common::Result<Option<Arc<Vec<u8>>>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &ObjectId) -> shards_common::Result<bool> {
        self.inner.delete(id).await
    }

    async fn len(&self) -> usize {
        self.inner.len().await
    }
}
