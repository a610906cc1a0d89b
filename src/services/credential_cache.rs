//! Process-wide cache of the stats-provider credential with single-flight refresh.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    clients::identity::{AccessToken, IdentityError, IdentityProvider},
    config::CredentialConfig,
    dao::{
        kv_store::{KeyValueStore, get_json, put_json},
        models::TokenEntity,
    },
};

/// Key under which the current token is shared with sibling processes.
pub const CREDENTIAL_KEY: &str = "credentials:stats-provider";

/// Failure to obtain a credential. Cloned to every caller waiting on the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential exchange rejected: {0}")]
    Rejected(String),
    #[error("credential exchange failed: {0}")]
    Unavailable(String),
}

impl From<IdentityError> for CredentialError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected(message) => CredentialError::Rejected(message),
            IdentityError::Unavailable(message) => CredentialError::Unavailable(message),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, CredentialError>>>;

struct InFlight {
    generation: u64,
    future: RefreshFuture,
}

/// Serves a valid bearer token, refreshing it at most once per expiry window.
///
/// Cached reads only take a shared lock. When a refresh is needed the first caller installs a
/// shared future and every concurrent caller awaits that same future.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<Inner>,
}

struct Inner {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn KeyValueStore>,
    safety_margin: Duration,
    cached: RwLock<Option<AccessToken>>,
    in_flight: Mutex<Option<InFlight>>,
    generations: AtomicU64,
}

impl CredentialCache {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn KeyValueStore>,
        config: &CredentialConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity,
                store,
                safety_margin: config.safety_margin,
                cached: RwLock::new(None),
                in_flight: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Return a token that stays valid for at least the safety margin.
    pub async fn get_token(&self) -> Result<String, CredentialError> {
        if let Some(token) = self.fresh_cached().await {
            return Ok(token);
        }

        let refresh = {
            let mut slot = self.inner.in_flight.lock().await;
            // A refresh may have completed while we waited for the slot.
            if let Some(token) = self.fresh_cached().await {
                return Ok(token);
            }
            match slot.as_ref() {
                Some(in_flight) => in_flight.future.clone(),
                None => {
                    let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
                    let future = self.clone().refresh(generation).boxed().shared();
                    *slot = Some(InFlight {
                        generation,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        refresh.await.map(|token| token.token)
    }

    /// Drop the cached token and its shared copy so the next caller refreshes.
    pub async fn clear(&self) {
        self.inner.cached.write().await.take();
        if let Err(err) = self.inner.store.delete(CREDENTIAL_KEY).await {
            warn!(error = %err, "failed to delete persisted credential");
        }
    }

    /// Clear the token only if it is still `rejected`.
    ///
    /// Concurrent callers that all saw the same rejection therefore trigger one refresh, not one
    /// each.
    pub async fn invalidate(&self, rejected: &str) {
        {
            let mut cached = self.inner.cached.write().await;
            if cached.as_ref().is_some_and(|token| token.token == rejected) {
                cached.take();
                info!("stats provider rejected the cached credential; dropping it");
            }
        }

        match get_json::<TokenEntity>(self.inner.store.as_ref(), CREDENTIAL_KEY).await {
            Ok(Some(persisted)) if persisted.token == rejected => {
                if let Err(err) = self.inner.store.delete(CREDENTIAL_KEY).await {
                    warn!(error = %err, "failed to delete rejected credential");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to read persisted credential"),
        }
    }

    async fn fresh_cached(&self) -> Option<String> {
        let cached = self.inner.cached.read().await;
        cached
            .as_ref()
            .filter(|token| self.is_fresh(token, SystemTime::now()))
            .map(|token| token.token.clone())
    }

    fn is_fresh(&self, token: &AccessToken, now: SystemTime) -> bool {
        token.remaining(now) > self.inner.safety_margin
    }

    async fn refresh(self, generation: u64) -> Result<AccessToken, CredentialError> {
        let result = self.load_or_exchange().await;

        if let Ok(token) = &result {
            *self.inner.cached.write().await = Some(token.clone());
        }

        let mut slot = self.inner.in_flight.lock().await;
        if slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
        {
            slot.take();
        }

        result
    }

    async fn load_or_exchange(&self) -> Result<AccessToken, CredentialError> {
        match get_json::<TokenEntity>(self.inner.store.as_ref(), CREDENTIAL_KEY).await {
            Ok(Some(persisted)) => {
                let token = AccessToken {
                    token: persisted.token,
                    expires_at: persisted.expires_at,
                };
                if self.is_fresh(&token, SystemTime::now()) {
                    debug!("reusing credential persisted by a sibling process");
                    return Ok(token);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read persisted credential; exchanging"),
        }

        let token = self.inner.identity.exchange_for_token().await.map_err(|err| {
            warn!(error = %err, "credential exchange failed");
            CredentialError::from(err)
        })?;
        info!("obtained a new stats provider credential");
        self.persist(&token).await;
        Ok(token)
    }

    async fn persist(&self, token: &AccessToken) {
        let ttl = token.remaining(SystemTime::now());
        if ttl.is_zero() {
            return;
        }
        let entity = TokenEntity {
            token: token.token.clone(),
            expires_at: token.expires_at,
        };
        if let Err(err) = put_json(
            self.inner.store.as_ref(),
            CREDENTIAL_KEY,
            &entity,
            Some(ttl),
        )
        .await
        {
            warn!(error = %err, "failed to persist credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::{dao::kv_store::MemoryStore, services::test_support::FakeIdentity};

    fn cache(identity: Arc<FakeIdentity>) -> (CredentialCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(identity, store.clone(), &CredentialConfig::default());
        (cache, store)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_exchange() {
        let identity = FakeIdentity::new();
        let (cache, _) = cache(identity.clone());

        let tokens = join_all((0..20).map(|_| cache.get_token())).await;

        assert_eq!(identity.calls(), 1);
        assert!(tokens.iter().all(|token| token.as_deref() == Ok("token-1")));
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_from_separate_tasks_share_one_exchange() {
        let identity = FakeIdentity::new();
        let (cache, _) = cache(identity.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let identity = FakeIdentity::new();
        identity.push(Err(IdentityError::Rejected("bad secret".into())));
        let (cache, _) = cache(identity.clone());

        let results = join_all((0..5).map(|_| cache.get_token())).await;
        assert_eq!(identity.calls(), 1);
        assert!(results.iter().all(|result| {
            matches!(result, Err(CredentialError::Rejected(message)) if message == "bad secret")
        }));

        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(identity.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn new_token_is_persisted_with_remaining_lifetime() {
        let identity = FakeIdentity::with_lifetime(Duration::from_secs(600));
        let (cache, store) = cache(identity);

        cache.get_token().await.unwrap();
        let persisted = get_json::<TokenEntity>(store.as_ref(), CREDENTIAL_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.token, "token-1");

        tokio::time::advance(Duration::from_secs(601)).await;
        assert!(store.get(CREDENTIAL_KEY).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_token_from_sibling_is_reused() {
        let identity = FakeIdentity::new();
        let (cache, store) = cache(identity.clone());
        let entity = TokenEntity {
            token: "shared".into(),
            expires_at: SystemTime::now() + Duration::from_secs(3600),
        };
        put_json(store.as_ref(), CREDENTIAL_KEY, &entity, None)
            .await
            .unwrap();

        assert_eq!(cache.get_token().await.unwrap(), "shared");
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn token_inside_safety_margin_is_refreshed() {
        let identity = FakeIdentity::with_lifetime(Duration::from_secs(30));
        let (cache, _) = cache(identity.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(identity.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_only_drops_the_rejected_token() {
        let identity = FakeIdentity::new();
        let (cache, store) = cache(identity.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        cache.invalidate("token-1").await;
        assert!(store.get(CREDENTIAL_KEY).await.unwrap().is_none());
        assert_eq!(cache.get_token().await.unwrap(), "token-2");

        cache.invalidate("token-1").await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(identity.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forces_refresh() {
        let identity = FakeIdentity::new();
        let (cache, _) = cache(identity.clone());

        cache.get_token().await.unwrap();
        cache.clear().await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
    }
}
