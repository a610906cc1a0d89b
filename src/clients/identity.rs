use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use super::{ClientConfigError, http_client, require_env};

/// Bearer token together with the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    /// Lifetime left at `now`; zero once expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.expires_at
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }
}

/// Failure of the identity exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The client credentials were refused.
    #[error("identity provider rejected the client credentials: {0}")]
    Rejected(String),
    /// The identity provider could not be reached or answered garbage.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Issues stats-provider credentials. Used only by the credential cache.
pub trait IdentityProvider: Send + Sync {
    fn exchange_for_token(&self) -> BoxFuture<'static, Result<AccessToken, IdentityError>>;
}

/// OAuth2 client-credentials exchange.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    token_url: Arc<str>,
    client_id: Arc<str>,
    client_secret: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl HttpIdentityProvider {
    pub fn new(
        client: Client,
        token_url: impl Into<Arc<str>>,
        client_id: impl Into<Arc<str>>,
        client_secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Build the client from `STATS_TOKEN_URL`, `STATS_CLIENT_ID` and `STATS_CLIENT_SECRET`.
    pub fn from_env() -> Result<Self, ClientConfigError> {
        Ok(Self::new(
            http_client()?,
            require_env("STATS_TOKEN_URL")?,
            require_env("STATS_CLIENT_ID")?,
            require_env("STATS_CLIENT_SECRET")?,
        ))
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn exchange_for_token(&self) -> BoxFuture<'static, Result<AccessToken, IdentityError>> {
        let request = self
            .client
            .post(self.token_url.as_ref())
            .basic_auth(self.client_id.as_ref(), Some(self.client_secret.as_ref()))
            .form(&[("grant_type", "client_credentials")]);

        Box::pin(async move {
            let issued_at = SystemTime::now();
            let response = request
                .send()
                .await
                .map_err(|err| IdentityError::Unavailable(err.to_string()))?;

            match response.status() {
                status if status.is_success() => {}
                status @ (StatusCode::BAD_REQUEST
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN) => {
                    return Err(IdentityError::Rejected(format!("status {status}")));
                }
                status => return Err(IdentityError::Unavailable(format!("status {status}"))),
            }

            let body = response
                .json::<TokenResponse>()
                .await
                .map_err(|err| IdentityError::Unavailable(err.to_string()))?;

            Ok(AccessToken {
                token: body.access_token,
                expires_at: issued_at + Duration::from_secs(body.expires_in),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_lifetime_saturates_at_zero() {
        let now = SystemTime::now();
        let token = AccessToken {
            token: "t".into(),
            expires_at: now + Duration::from_secs(90),
        };
        assert_eq!(token.remaining(now), Duration::from_secs(90));
        assert_eq!(token.remaining(now + Duration::from_secs(120)), Duration::ZERO);
    }
}
