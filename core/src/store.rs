//! Actor object store: immutable blobs addressed by 20-byte object ids.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use shards_common::{CommonError, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identifier of a blob in an [`ObjectStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; ObjectId::LEN]);

impl ObjectId {
    pub const LEN: usize = 20;

    pub fn random() -> Self {
        let mut bytes = [0u8; Self::LEN];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(&Uuid::new_v4().as_bytes()[..4]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text).map_err(|e| {
            CommonError::deserialization_error_with_source(
                format!("invalid object id {:?}", text),
                e,
            )
        })?;
        let bytes: [u8; Self::LEN] = bytes.try_into().map_err(|_| {
            CommonError::deserialization_error(format!(
                "object id {:?} is not {} bytes",
                text,
                Self::LEN
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ObjectId::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Where one partition of a store collection lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionRef {
    pub object_id: ObjectId,
    /// Address of the node that holds the partition.
    pub node_ip: String,
    pub store_address: String,
}

impl PartitionRef {
    pub fn new(object_id: ObjectId, node_ip: impl Into<String>, store_address: impl Into<String>) -> Self {
        Self {
            object_id,
            node_ip: node_ip.into(),
            store_address: store_address.into(),
        }
    }
}

/// A store of immutable blobs shared by actors.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Address that identifies this store in partition refs.
    fn address(&self) -> &str;

    async fn contains(&self, id: &ObjectId) -> Result<bool>;

    /// Store `data` under `id`, returning the id the store recorded.
    async fn put(&self, id: ObjectId, data: Vec<u8>) -> Result<ObjectId>;

    async fn get(&self, id: &ObjectId) -> Result<Option<Arc<Vec<u8>>>>;

    /// Returns whether the object existed.
    async fn delete(&self, id: &ObjectId) -> Result<bool>;

    async fn len(&self) -> usize;

    /// Store `data` under a fresh id.
    async fn put_new(&self, data: Vec<u8>) -> Result<ObjectId> {
        self.put(ObjectId::random(), data).await
    }
}

/// A process-local [`ObjectStore`].
#[derive(Debug)]
pub struct InMemoryObjectStore {
    address: String,
    objects: RwLock<HashMap<ObjectId, Arc<Vec<u8>>>>,
    puts: AtomicU64,
}

impl InMemoryObjectStore {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            objects: RwLock::new(HashMap::new()),
            puts: AtomicU64::new(0),
        }
    }

    /// Number of successful writes.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://local")
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn address(&self) -> &str {
        &self.address
    }

    async fn contains(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(id))
    }

    async fn put(&self, id: ObjectId, data: Vec<u8>) -> Result<ObjectId> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(&id) {
            return Err(CommonError::storage_error(format!(
                "object {} already exists",
                id
            )));
        }
        objects.insert(id, Arc::new(data));
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> Result<Option<Arc<Vec<u8>>>> {
        Ok(self.objects.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.objects.write().await.remove(id).is_some())
    }

    async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex() {
        let id = ObjectId::random();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(ObjectId::from_hex(&hex).unwrap(), id);
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_hex("zz").is_err());
        assert_ne!(ObjectId::random(), ObjectId::random());
    }

    #[test]
    fn test_partition_ref_wire_shape() {
        let id = ObjectId::from_bytes([7u8; 20]);
        let r = PartitionRef::new(id, "10.0.0.1", "memory://a");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["object_id"], "07".repeat(20));
        assert_eq!(json["node_ip"], "10.0.0.1");
        let back: PartitionRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryObjectStore::default();
        let id = ObjectId::random();
        assert!(!store.contains(&id).await.unwrap());
        assert_eq!(store.put(id, vec![1, 2]).await.unwrap(), id);
        assert!(store.contains(&id).await.unwrap());
        assert!(store.put(id, vec![3]).await.is_err());
        assert_eq!(store.get(&id).await.unwrap().unwrap().as_ref(), &vec![1, 2]);

        let other = store.put_new(vec![9]).await.unwrap();
        assert_ne!(other, id);
        assert_eq!(store.len().await, 2);
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert_eq!(store.put_count(), 2);
    }
}
