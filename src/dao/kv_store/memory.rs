use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;

use super::KeyValueStore;
use crate::dao::storage::StorageResult;

/// Process-local store used when no database is configured, and by tests.
///
/// Nothing survives a restart, so tokens and snapshots are only shared within one process.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

#[derive(Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()))?;
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        live
    }

    fn write(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_owned(), MemoryEntry { value, expires_at });
    }

    fn keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let value = self.read(key);
        Box::pin(async move { Ok(value) })
    }

    fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(key, value, ttl);
        Box::pin(async { Ok(()) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        self.entries.remove(key);
        Box::pin(async { Ok(()) })
    }

    fn list_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let keys = self.keys(prefix);
        Box::pin(async move { Ok(keys) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
