use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

use crate::{
    clients::stats_provider::{ProviderError, StatsProvider},
    services::{
        credential_cache::{CredentialCache, CredentialError},
        rate_limiter::CallRateLimiter,
    },
    state::series::{MatchSummary, PlayerId},
};

/// How a tracker should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential rejected even after a refresh.
    Auth,
    /// Worth retrying later with backoff.
    Transient,
    /// The referenced resource does not exist; retrying will not help.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Provider(ProviderError::Auth)
            | GatewayError::Credential(CredentialError::Rejected(_)) => FailureKind::Auth,
            GatewayError::Provider(ProviderError::NotFound(_)) => FailureKind::NotFound,
            GatewayError::Provider(ProviderError::RateLimited | ProviderError::Transient(_))
            | GatewayError::Credential(CredentialError::Unavailable(_)) => FailureKind::Transient,
        }
    }
}

/// The two stats-provider reads trackers need, behind the shared credential and rate limit.
#[derive(Clone)]
pub struct StatsGateway {
    provider: Arc<dyn StatsProvider>,
    credentials: CredentialCache,
    limiter: Arc<CallRateLimiter>,
}

impl StatsGateway {
    pub fn new(
        provider: Arc<dyn StatsProvider>,
        credentials: CredentialCache,
        limiter: Arc<CallRateLimiter>,
    ) -> Self {
        Self {
            provider,
            credentials,
            limiter,
        }
    }

    pub async fn fetch_match(&self, match_id: &str) -> Result<MatchSummary, GatewayError> {
        self.call(|provider, token| provider.fetch_match(token, match_id))
            .await
    }

    pub async fn fetch_recent_matches(
        &self,
        players: &[PlayerId],
        since: SystemTime,
    ) -> Result<Vec<MatchSummary>, GatewayError> {
        self.call(|provider, token| provider.fetch_matches_for_players(token, players, since))
            .await
    }

    /// Run `request` with a token and a rate-limit slot. An auth rejection invalidates the
    /// token and retries once; anything else is returned as is.
    async fn call<T, F>(&self, request: F) -> Result<T, GatewayError>
    where
        F: Fn(&dyn StatsProvider, &str) -> BoxFuture<'static, Result<T, ProviderError>>,
    {
        let token = self.credentials.get_token().await?;
        match self.attempt(&request, &token).await {
            Err(ProviderError::Auth) => {
                warn!("stats provider rejected the credential; refreshing and retrying once");
                self.credentials.invalidate(&token).await;
                let token = self.credentials.get_token().await?;
                Ok(self.attempt(&request, &token).await?)
            }
            other => Ok(other?),
        }
    }

    async fn attempt<T, F>(&self, request: &F, token: &str) -> Result<T, ProviderError>
    where
        F: Fn(&dyn StatsProvider, &str) -> BoxFuture<'static, Result<T, ProviderError>>,
    {
        self.limiter
            .execute(|| request(self.provider.as_ref(), token))
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::{
        clients::identity::IdentityError,
        config::{CredentialConfig, RateLimitConfig},
        dao::kv_store::MemoryStore,
        services::test_support::{FakeIdentity, FakeStats, StatsCall},
        state::series::fixtures::{at, series_match},
    };

    pub(crate) fn gateway_with(
        stats: Arc<FakeStats>,
        identity: Arc<FakeIdentity>,
        rate: RateLimitConfig,
    ) -> StatsGateway {
        let credentials = CredentialCache::new(
            identity,
            Arc::new(MemoryStore::new()),
            &CredentialConfig::default(),
        );
        StatsGateway::new(stats, credentials, Arc::new(CallRateLimiter::new(&rate)))
    }

    fn tokens(stats: &FakeStats) -> Vec<String> {
        stats
            .calls()
            .into_iter()
            .map(|call| match call {
                StatsCall::Match { token, .. } | StatsCall::Players { token, .. } => token,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_refreshes_and_retries_once() {
        let stats = FakeStats::new();
        let identity = FakeIdentity::new();
        stats.push(Err(ProviderError::Auth));
        stats.push_matches(vec![series_match("m1", 10, 0)]);
        let gateway = gateway_with(stats.clone(), identity.clone(), RateLimitConfig::default());

        let matches = gateway
            .fetch_recent_matches(&["alice".into()], at(0))
            .await
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(identity.calls(), 2);
        assert_eq!(tokens(&stats), vec!["token-1", "token-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_auth_rejection_is_surfaced() {
        let stats = FakeStats::new();
        let identity = FakeIdentity::new();
        stats.push_failures(ProviderError::Auth, 3);
        let gateway = gateway_with(stats.clone(), identity.clone(), RateLimitConfig::default());

        let err = gateway.fetch_match("m1").await.unwrap_err();

        assert_eq!(err, GatewayError::Provider(ProviderError::Auth));
        assert_eq!(err.kind(), FailureKind::Auth);
        assert_eq!(stats.call_count(), 2);
        assert_eq!(identity.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_pass_through_without_retry() {
        let stats = FakeStats::new();
        let identity = FakeIdentity::new();
        stats.push(Err(ProviderError::Transient("502".into())));
        stats.push(Err(ProviderError::RateLimited));
        stats.push(Err(ProviderError::NotFound("match m9".into())));
        let gateway = gateway_with(stats.clone(), identity.clone(), RateLimitConfig::default());

        let first = gateway.fetch_match("m1").await.unwrap_err();
        assert_eq!(first, GatewayError::Provider(ProviderError::Transient("502".into())));
        assert_eq!(first.kind(), FailureKind::Transient);
        assert_eq!(
            gateway.fetch_match("m1").await.unwrap_err().kind(),
            FailureKind::Transient
        );
        assert_eq!(
            gateway.fetch_match("m9").await.unwrap_err().kind(),
            FailureKind::NotFound
        );
        assert_eq!(stats.call_count(), 3);
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_failure_skips_provider() {
        let stats = FakeStats::new();
        let identity = FakeIdentity::new();
        identity.push(Err(IdentityError::Unavailable("timeout".into())));
        let gateway = gateway_with(stats.clone(), identity, RateLimitConfig::default());

        let err = gateway.fetch_match("m1").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(stats.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_takes_a_rate_limit_slot() {
        let stats = FakeStats::new();
        stats.push(Err(ProviderError::Auth));
        let gateway = gateway_with(
            stats.clone(),
            FakeIdentity::new(),
            RateLimitConfig {
                max_calls: 1,
                window: Duration::from_secs(10),
            },
        );

        let origin = Instant::now();
        gateway.fetch_match("m1").await.ok();
        assert!(Instant::now() - origin >= Duration::from_secs(10));
    }
}
