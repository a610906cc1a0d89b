use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{Client, Collection, Database, IndexModel, bson::doc, options::IndexOptions};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::{PingSchedule, open_database},
    error::{MongoDaoError, MongoResult},
    models::{MongoKvDocument, key_filter, live_prefix_filter},
};
use crate::dao::{kv_store::KeyValueStore, storage::StorageResult};

const KV_COLLECTION_NAME: &str = "kv";

#[derive(Clone)]
pub struct MongoKvStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            open_database(&self.config.options, &self.config.database_name, PingSchedule::SINGLE)
                .await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoKvStore {
    /// Establish a connection to MongoDB and ensure the expiry index is present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            open_database(&config.options, &config.database_name, PingSchedule::STARTUP).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("kv_expiry_idx".to_owned()))
                    .expire_after(Some(Duration::ZERO))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: KV_COLLECTION_NAME,
                index: "expires_at",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoKvDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoKvDocument>(KV_COLLECTION_NAME)
    }

    async fn get_value(&self, key: String) -> MongoResult<Option<Value>> {
        let collection = self.collection().await;
        let document = collection
            .find_one(key_filter(&key))
            .await
            .map_err(|source| MongoDaoError::Read {
                key: key.clone(),
                source,
            })?;

        let Some(document) = document.filter(|doc| doc.is_live(SystemTime::now())) else {
            return Ok(None);
        };

        serde_json::from_str(&document.value)
            .map(Some)
            .map_err(|source| MongoDaoError::Decode { key, source })
    }

    async fn put_value(&self, key: String, value: Value, ttl: Option<Duration>) -> MongoResult<()> {
        let document = MongoKvDocument::new(key.clone(), value.to_string(), ttl, SystemTime::now());
        let collection = self.collection().await;
        collection
            .replace_one(key_filter(&key), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write { key, source })?;

        Ok(())
    }

    async fn delete_value(&self, key: String) -> MongoResult<()> {
        let collection = self.collection().await;
        collection
            .delete_one(key_filter(&key))
            .await
            .map_err(|source| MongoDaoError::Delete { key, source })?;
        Ok(())
    }

    async fn list_live_keys(&self, prefix: String) -> MongoResult<Vec<String>> {
        let collection = self.collection().await;
        let documents: Vec<MongoKvDocument> = collection
            .find(live_prefix_filter(&prefix, SystemTime::now()))
            .sort(doc! { "_id": 1 })
            .await
            .map_err(|source| MongoDaoError::List {
                prefix: prefix.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::List { prefix, source })?;

        Ok(documents.into_iter().map(|doc| doc.key).collect())
    }
}

impl KeyValueStore for MongoKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.get_value(key).await.map_err(Into::into) })
    }

    fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.put_value(key, value, ttl).await.map_err(Into::into) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.delete_value(key).await.map_err(Into::into) })
    }

    fn list_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        let prefix = prefix.to_owned();
        Box::pin(async move { store.list_live_keys(prefix).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
