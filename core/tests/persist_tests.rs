//! Integration tests for durable save and load

mod common;

use std::sync::Arc;

use common::{create_test_context, int_table, ints, table_rows};
use shards_common::{Storage, StorageBackend, StorageBuilder};
use shards_core::{DEFAULT_BATCH_SIZE, Shard, ShardError};
use tempfile::TempDir;

fn memory_storage() -> Arc<dyn Storage> {
    StorageBuilder::new()
        .backend(StorageBackend::Memory)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_save_and_load_in_memory() {
    let ctx = create_test_context("persist-memory", 1, 2);
    let storage = memory_storage();
    let rc = ctx
        .parallelize(vec![
            (0..23).map(Shard::int).collect(),
            vec![],
            (100..103).map(Shard::int).collect(),
        ])
        .unwrap();

    rc.save_durable(&storage, "saved/ints", 4).await.unwrap();
    let listed = storage.list("saved/ints").await.unwrap();
    assert_eq!(
        listed,
        vec![
            "saved/ints/_SUCCESS",
            "saved/ints/part-00000",
            "saved/ints/part-00001",
            "saved/ints/part-00002"
        ]
    );

    let loaded = ctx.load_durable(&storage, "saved/ints", None).await.unwrap();
    assert_eq!(loaded.num_partitions(), 3);
    assert_eq!(loaded.partitions().unwrap(), rc.partitions().unwrap());
}

#[tokio::test]
async fn test_save_and_load_on_local_filesystem() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageBuilder::new()
        .backend(StorageBackend::LocalFileSystem {
            root_path: temp_dir.path().to_string_lossy().to_string(),
        })
        .build()
        .unwrap();
    let ctx = create_test_context("persist-local", 2, 1);
    let rc = ctx
        .parallelize_elements(vec![int_table(&[1, 2], &[3, 4]), int_table(&[5], &[6])])
        .unwrap();

    rc.save_durable(&storage, "tables", DEFAULT_BATCH_SIZE)
        .await
        .unwrap();
    assert!(temp_dir.path().join("tables").join("_SUCCESS").exists());

    let loaded = ctx.load_durable(&storage, "tables", None).await.unwrap();
    assert_eq!(
        table_rows(&loaded.collect().unwrap()),
        vec![(1, 3), (2, 4), (5, 6)]
    );
}

#[tokio::test]
async fn test_load_resplits_to_min_partitions() {
    let ctx = create_test_context("persist-resplit", 1, 2);
    let storage = memory_storage();
    let rc = ctx
        .parallelize(vec![(0..5).map(Shard::int).collect()])
        .unwrap();
    rc.save_durable(&storage, "one-part", DEFAULT_BATCH_SIZE)
        .await
        .unwrap();

    let loaded = ctx
        .load_durable(&storage, "one-part", Some(3))
        .await
        .unwrap();
    let sizes: Vec<usize> = loaded
        .partitions()
        .unwrap()
        .iter()
        .map(|p| p.len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(ints(&loaded.collect().unwrap()), vec![0, 1, 2, 3, 4]);

    let unchanged = ctx
        .load_durable(&storage, "one-part", Some(1))
        .await
        .unwrap();
    assert_eq!(unchanged.num_partitions(), 1);
}

#[tokio::test]
async fn test_load_requires_success_marker() {
    let ctx = create_test_context("persist-marker", 1, 2);
    let storage = memory_storage();
    storage
        .put("partial/part-00000", Vec::new())
        .await
        .unwrap();

    match ctx.load_durable(&storage, "partial", None).await {
        Err(ShardError::Store(e)) => assert!(e.is_not_found()),
        other => panic!("expected a not-found error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let ctx = create_test_context("persist-batch", 1, 2);
    let storage = memory_storage();
    let rc = ctx.parallelize_elements(vec![Shard::int(1)]).unwrap();
    assert!(matches!(
        rc.save_durable(&storage, "x", 0).await,
        Err(ShardError::InvalidArgument(_))
    ));
    assert!(!storage.exists("x/_SUCCESS").await.unwrap());
}
