//! Durable storage abstraction using trait-based design.
//!
//! Collections are persisted as plain objects addressed by `/`-separated
//! paths. The backends are provided by the object_store crate.

use async_trait::async_trait;
use futures::StreamExt;
use object_store::{
    ObjectStore, PutPayload, local::LocalFileSystem, memory::InMemory, path::Path as ObjectPath,
};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::{CommonError, Result};

/// Generic storage trait for async path-addressed objects.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
    /// Read an object. Returns `None` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object, replacing any previous content.
    async fn put(&self, path: &str, value: Vec<u8>) -> Result<()>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if an object exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List every object below `prefix`, sorted by path.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get storage statistics.
    async fn stats(&self) -> StorageStats;
}

/// Storage statistics.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub read_count: u64,
    pub write_count: u64,
    pub delete_count: u64,
    pub error_count: u64,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default)]
pub enum StorageBackend {
    /// In-memory storage for testing and development.
    #[default]
    Memory,
    /// Local filesystem storage rooted at an existing directory.
    LocalFileSystem { root_path: String },
}

/// Builder for creating storage instances.
#[derive(Debug, Default)]
pub struct StorageBuilder {
    backend: StorageBackend,
}

impl StorageBuilder {
    /// Create a new storage builder with the in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage backend.
    pub fn backend(mut self, backend: StorageBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Build a storage instance with the specified configuration.
    pub fn build(self) -> Result<Arc<dyn Storage>> {
        let storage = ObjectStoreStorage::new(self.backend)?;
        Ok(Arc::new(storage))
    }
}

/// Internal statistics tracker for storage operations.
#[derive(Debug, Default)]
struct InternalStorageStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl InternalStorageStats {
    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn get_stats(&self) -> StorageStats {
        StorageStats {
            read_count: self.reads.load(Ordering::Acquire),
            write_count: self.writes.load(Ordering::Acquire),
            delete_count: self.deletes.load(Ordering::Acquire),
            error_count: self.errors.load(Ordering::Acquire),
        }
    }
}

/// Object store-based storage implementation.
struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    backend: StorageBackend,
    stats: InternalStorageStats,
}

impl Debug for ObjectStoreStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreStorage")
            .field("backend", &self.backend)
            .field("stats", &self.stats)
            .finish()
    }
}

impl ObjectStoreStorage {
    fn new(backend: StorageBackend) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &backend {
            StorageBackend::Memory => Arc::new(InMemory::new()),
            StorageBackend::LocalFileSystem { root_path } => {
                let fs = LocalFileSystem::new_with_prefix(root_path).map_err(|e| {
                    CommonError::storage_error_with_source(
                        format!("Failed to create local filesystem storage at {}", root_path),
                        e,
                    )
                })?;
                Arc::new(fs)
            }
        };
        debug!("Created storage with backend {:?}", backend);

        Ok(Self {
            store,
            backend,
            stats: InternalStorageStats::default(),
        })
    }

    fn convert_error(&self, path: &str, error: object_store::Error) -> CommonError {
        self.stats.record_error();
        CommonError::storage_error_with_source(
            format!("Object store operation on '{}' failed", path),
            error,
        )
    }
}

#[async_trait]
impl Storage for ObjectStoreStorage {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let location = ObjectPath::from(path);

        match self.store.get(&location).await {
            Ok(get_result) => {
                self.stats.record_read();
                let bytes = get_result
                    .bytes()
                    .await
                    .map_err(|e| self.convert_error(path, e))?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => {
                self.stats.record_read();
                Ok(None)
            }
            Err(e) => Err(self.convert_error(path, e)),
        }
    }

    async fn put(&self, path: &str, value: Vec<u8>) -> Result<()> {
        let location = ObjectPath::from(path);

        self.store
            .put(&location, PutPayload::from(value))
            .await
            .map_err(|e| self.convert_error(path, e))?;
        self.stats.record_write();
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = ObjectPath::from(path);

        match self.store.delete(&location).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => {
                self.stats.record_delete();
                Ok(())
            }
            Err(e) => Err(self.convert_error(path, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let location = ObjectPath::from(path);

        match self.store.head(&location).await {
            Ok(_) => {
                self.stats.record_read();
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => {
                self.stats.record_read();
                Ok(false)
            }
            Err(e) => Err(self.convert_error(path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = ObjectPath::from(prefix);
        let mut paths = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(result) = stream.next().await {
            let meta = result.map_err(|e| self.convert_error(prefix, e))?;
            paths.push(meta.location.to_string());
        }

        self.stats.record_read();
        paths.sort();
        Ok(paths)
    }

    async fn stats(&self) -> StorageStats {
        self.stats.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = StorageBuilder::new()
            .backend(StorageBackend::Memory)
            .build()
            .expect("Failed to create memory storage");

        storage
            .put("data/test_key", b"test_value".to_vec())
            .await
            .expect("Failed to put");

        let value = storage.get("data/test_key").await.expect("Failed to get");
        assert_eq!(value, Some(b"test_value".to_vec()));

        assert!(storage.exists("data/test_key").await.unwrap());
        assert!(!storage.exists("data/nonexistent").await.unwrap());

        storage.delete("data/test_key").await.expect("Failed to delete");
        assert_eq!(storage.get("data/test_key").await.unwrap(), None);

        // deleting twice is fine
        storage.delete("data/test_key").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_filesystem_storage() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root_path = temp_dir.path().to_string_lossy().to_string();

        let storage = StorageBuilder::new()
            .backend(StorageBackend::LocalFileSystem { root_path })
            .build()
            .expect("Failed to create local filesystem storage");

        storage
            .put("out/part-00000", b"fs_test_value".to_vec())
            .await
            .expect("Failed to put");

        let value = storage.get("out/part-00000").await.expect("Failed to get");
        assert_eq!(value, Some(b"fs_test_value".to_vec()));
        assert!(temp_dir.path().join("out").join("part-00000").exists());
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_scoped() {
        let storage = StorageBuilder::new().build().unwrap();
        storage.put("a/part-00001", vec![1]).await.unwrap();
        storage.put("a/part-00000", vec![0]).await.unwrap();
        storage.put("b/part-00000", vec![2]).await.unwrap();

        let listed = storage.list("a").await.unwrap();
        assert_eq!(listed, vec!["a/part-00000", "a/part-00001"]);
    }

    #[tokio::test]
    async fn test_storage_stats() {
        let storage = StorageBuilder::new().build().unwrap();
        storage.put("stats_key", b"v".to_vec()).await.unwrap();
        storage.get("stats_key").await.unwrap();
        storage.delete("stats_key").await.unwrap();

        let stats = storage.stats().await;
        assert!(stats.read_count > 0);
        assert!(stats.write_count > 0);
        assert!(stats.delete_count > 0);
        assert_eq!(stats.error_count, 0);
    }
}
