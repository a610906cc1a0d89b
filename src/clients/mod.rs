//! Contracts of the external collaborators the tracking engine talks to, with their HTTP
//! implementations.

/// Identity provider issuing stats-provider credentials.
pub mod identity;
/// Destinations for rendered series messages.
pub mod message_sink;
/// Game statistics provider.
pub mod stats_provider;

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

/// Timeout applied to every outbound HTTP call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Failure while building an HTTP client from the environment.
#[derive(Debug, Error)]
pub enum ClientConfigError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
}

pub(crate) fn require_env(var: &'static str) -> Result<String, ClientConfigError> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ClientConfigError::MissingEnvVar { var })
}

pub(crate) fn http_client() -> Result<Client, ClientConfigError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("series-tracker/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ClientConfigError::ClientBuilder { source })
}
