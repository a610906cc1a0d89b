use std::{sync::Arc, time::Duration, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dao::{kv_store::KeyValueStore, storage::StorageResult};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult, DatabaseStep},
    models::{AllDocsResponse, END_SUFFIX, KvDocument, RevisionOnly, doc_path},
};

/// Key-value store keeping one CouchDB document per key.
///
/// CouchDB has no native expiry, so TTLs are stored on the document and enforced on read.
#[derive(Clone)]
pub struct CouchKvStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchKvStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|c| (Arc::<str>::from(c.username), Arc::<str>::from(c.password)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorized(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: database.clone(),
                step: DatabaseStep::Lookup,
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorized(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Database {
                        database: database.clone(),
                        step: DatabaseStep::Create,
                        source,
                    })?;
                // 412 means a sibling process created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, path: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::Decode {
                        path: path.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::Status {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    async fn get_value(&self, key: &str) -> CouchResult<Option<Value>> {
        let path = doc_path(key);
        let document = self.get_document::<KvDocument>(&path).await?;
        let now = SystemTime::now();
        Ok(document
            .filter(|doc| doc.is_live(now))
            .map(|doc| doc.value))
    }

    async fn put_value(&self, key: &str, value: Value, ttl: Option<Duration>) -> CouchResult<()> {
        let path = doc_path(key);
        let mut document = KvDocument::new(key.to_owned(), value, ttl, SystemTime::now());
        document.rev = self
            .get_document::<RevisionOnly>(&path)
            .await?
            .map(|existing| existing.rev);

        let response = self
            .request(Method::PUT, &path)
            .json(&document)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                path: path.clone(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict { path }),
            status => Err(CouchDaoError::Status { path, status }),
        }
    }

    async fn delete_value(&self, key: &str) -> CouchResult<()> {
        let path = doc_path(key);
        let Some(existing) = self.get_document::<RevisionOnly>(&path).await? else {
            return Ok(());
        };

        let response = self
            .request(Method::DELETE, &path)
            .query(&[("rev", existing.rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                path: path.clone(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict { path }),
            status => Err(CouchDaoError::Status { path, status }),
        }
    }

    async fn list_live_keys(&self, prefix: &str) -> CouchResult<Vec<String>> {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::Status {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::Decode {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let now = SystemTime::now();
        Ok(payload
            .rows
            .into_iter()
            .filter(|row| row.doc.as_ref().is_some_and(|doc| doc.is_live(now)))
            .map(|row| row.id)
            .collect())
    }
}

impl KeyValueStore for CouchKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.get_value(&key).await.map_err(Into::into) })
    }

    fn put(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.put_value(&key, value, ttl).await.map_err(Into::into) })
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_owned();
        Box::pin(async move { store.delete_value(&key).await.map_err(Into::into) })
    }

    fn list_keys(&self, prefix: &str) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let store = self.clone();
        let prefix = prefix.to_owned();
        Box::pin(async move { store.list_live_keys(&prefix).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorized(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::Transport {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::Status {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
