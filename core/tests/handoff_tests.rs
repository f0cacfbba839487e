//! Integration tests for handing record collections off to an object store

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{Fault, FaultyStore, create_test_context, int_table, ints, table_rows};
use shards_core::{
    InMemoryObjectStore, ObjectStore, Shard, ShardContext, ShardError, ShardsConfig,
    generate_object_ids,
};

fn single_partition(retries: u32) -> Arc<ShardContext> {
    ShardContext::new(
        "handoff-retry",
        ShardsConfig::default()
            .with_topology(1, 1)
            .with_task_max_retries(retries),
    )
    .unwrap()
}

#[tokio::test]
async fn test_repeated_handoff_with_same_ids_stores_once() {
    let ctx = create_test_context("repeat", 2, 2);
    let rc = ctx
        .parallelize_elements((0..4).map(Shard::int).collect())
        .unwrap();
    let store = Arc::new(InMemoryObjectStore::default());
    let ids = generate_object_ids(rc.num_partitions());

    let first = rc.to_store_with_ids(store.clone(), ids.clone()).await.unwrap();
    let second = rc.to_store_with_ids(store.clone(), ids).await.unwrap();

    assert_eq!(store.len().await, 4);
    assert_eq!(store.put_count(), 4);
    assert_eq!(first.partition_refs(), second.partition_refs());
    assert_eq!(
        ints(&first.collect().await.unwrap()),
        ints(&second.collect().await.unwrap())
    );
}

#[tokio::test]
async fn test_handoff_round_trip_of_tables() {
    let ctx = create_test_context("round-trip", 2, 1);
    let rc = ctx
        .parallelize_elements(vec![
            int_table(&[1, 2], &[10, 20]),
            int_table(&[3], &[30]),
            int_table(&[], &[]),
        ])
        .unwrap();
    let expected = table_rows(&rc.collect().unwrap());
    let store = Arc::new(InMemoryObjectStore::default());

    let stored = rc.to_store(store).await.unwrap();
    assert_eq!(stored.num_partitions(), 3);
    assert!(!rc.is_cached());

    let back = stored.to_record_collection().await.unwrap();
    assert_eq!(back.num_partitions(), 3);
    let mut rows = table_rows(&back.collect().unwrap());
    rows.sort();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_write_that_landed_is_not_repeated() {
    let ctx = single_partition(3);
    let rc = ctx.parallelize_elements(vec![Shard::int(7)]).unwrap();
    let store = Arc::new(FaultyStore::new(Fault::LandThenFail, 1));

    let stored = rc.to_store(store.clone()).await.unwrap();
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(store.len().await, 1);
    assert_eq!(ints(&stored.collect().await.unwrap()), vec![7]);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let ctx = single_partition(1);
    let rc = ctx.parallelize_elements(vec![Shard::int(1)]).unwrap();
    let store = Arc::new(FaultyStore::new(Fault::FailBeforeWrite, 1));

    rc.to_store(store.clone()).await.unwrap();
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let ctx = single_partition(1);
    let rc = ctx.parallelize_elements(vec![Shard::int(1)]).unwrap();
    rc.cache();
    let store = Arc::new(FaultyStore::new(Fault::FailBeforeWrite, 5));

    let err = rc.to_store(store.clone()).await.unwrap_err();
    assert!(matches!(err, ShardError::Store(_)));
    assert!(err.is_retryable());
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(store.len().await, 0);
    assert!(!rc.is_cached());
}

#[tokio::test]
async fn test_acknowledged_id_must_match() {
    let ctx = single_partition(3);
    let rc = ctx.parallelize_elements(vec![Shard::int(1)]).unwrap();
    let store = Arc::new(FaultyStore::new(Fault::WrongId, 1));

    let err = rc.to_store(store.clone()).await.unwrap_err();
    assert!(matches!(err, ShardError::StoreWrite(_)));
    assert_eq!(store.put_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_object_surfaces_not_found() {
    let ctx = create_test_context("missing", 1, 2);
    let rc = ctx
        .parallelize_elements(vec![Shard::int(1), Shard::int(2)])
        .unwrap();
    let store = Arc::new(InMemoryObjectStore::default());
    let stored = rc.to_store(store.clone()).await.unwrap();

    let victim = stored.partition_refs()[1].object_id;
    assert!(store.delete(&victim).await.unwrap());
    match stored.collect().await {
        Err(ShardError::Store(e)) => assert!(e.is_not_found()),
        other => panic!("expected a not-found error, got {:?}", other),
    }
}
