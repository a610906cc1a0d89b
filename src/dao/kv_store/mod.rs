#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::dao::storage::{StorageError, StorageResult};

pub use memory::MemoryStore;

/// Durable key-value storage shared by the credential cache and the tracker snapshots.
///
/// Entries written with a TTL disappear once it elapses; backends may purge them lazily but
/// never return an expired value.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// Live keys starting with `prefix`, in lexicographic order.
    fn list_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Read `key` and decode it into `T`.
pub async fn get_json<T>(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StorageError::corrupted(key, source)),
        None => Ok(None),
    }
}

/// Encode `value` as JSON and store it under `key`.
pub async fn put_json<T>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|source| StorageError::corrupted(key, source))?;
    store.put(key, value, ttl).await
}
