use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::future::BoxFuture;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_with::{TimestampSeconds, serde_as};
use thiserror::Error;

use super::{ClientConfigError, http_client, require_env};
use crate::state::series::{MatchSummary, MatchTeam, PlayerId};

/// Failure taxonomy of the stats provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The credential was rejected.
    #[error("stats provider rejected the credential")]
    Auth,
    /// The provider throttled the call.
    #[error("stats provider rate limit exceeded")]
    RateLimited,
    /// The referenced match or player does not exist.
    #[error("not found on stats provider: {0}")]
    NotFound(String),
    /// Network failure or upstream hiccup.
    #[error("stats provider unavailable: {0}")]
    Transient(String),
}

/// Read access to match results. Every call carries the bearer token to use.
pub trait StatsProvider: Send + Sync {
    fn fetch_match(
        &self,
        token: &str,
        match_id: &str,
    ) -> BoxFuture<'static, Result<MatchSummary, ProviderError>>;

    /// Matches involving any of `players` that started at or after `since`.
    fn fetch_matches_for_players(
        &self,
        token: &str,
        players: &[PlayerId],
        since: SystemTime,
    ) -> BoxFuture<'static, Result<Vec<MatchSummary>, ProviderError>>;
}

/// [`StatsProvider`] talking to the provider's REST API.
#[derive(Clone)]
pub struct HttpStatsProvider {
    client: Client,
    base_url: Arc<str>,
}

impl HttpStatsProvider {
    pub fn new(client: Client, base_url: impl AsRef<str>) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.as_ref().trim_end_matches('/')),
        }
    }

    /// Build the client from `STATS_API_URL`.
    pub fn from_env() -> Result<Self, ClientConfigError> {
        Ok(Self::new(http_client()?, require_env("STATS_API_URL")?))
    }
}

impl StatsProvider for HttpStatsProvider {
    fn fetch_match(
        &self,
        token: &str,
        match_id: &str,
    ) -> BoxFuture<'static, Result<MatchSummary, ProviderError>> {
        let request = self
            .client
            .get(format!("{}/matches/{}", self.base_url, match_id))
            .bearer_auth(token);
        let what = format!("match {match_id}");
        Box::pin(async move {
            let response = request.send().await.map_err(network_error)?;
            let wire: WireMatch = decode(response, &what).await?;
            Ok(wire.into())
        })
    }

    fn fetch_matches_for_players(
        &self,
        token: &str,
        players: &[PlayerId],
        since: SystemTime,
    ) -> BoxFuture<'static, Result<Vec<MatchSummary>, ProviderError>> {
        let since = since
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        let request = self
            .client
            .get(format!("{}/players/matches", self.base_url))
            .bearer_auth(token)
            .query(&[("players", players.join(",")), ("since", since.to_string())]);
        Box::pin(async move {
            let response = request.send().await.map_err(network_error)?;
            let page: WireMatchPage = decode(response, "player matches").await?;
            Ok(page.items.into_iter().map(Into::into).collect())
        })
    }
}

/// Map a non-success status onto the provider taxonomy.
fn classify(status: StatusCode, what: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth,
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::NOT_FOUND => ProviderError::NotFound(what.to_owned()),
        other => ProviderError::Transient(format!("unexpected status {other} for {what}")),
    }
}

fn network_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transient(err.to_string())
}

async fn decode<T>(response: Response, what: &str) -> Result<T, ProviderError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        return Err(classify(status, what));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| ProviderError::Transient(format!("undecodable {what}: {err}")))
}

#[derive(Debug, Deserialize)]
struct WireMatchPage {
    #[serde(default)]
    items: Vec<WireMatch>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMatch {
    id: String,
    #[serde_as(as = "TimestampSeconds<i64>")]
    started_at: SystemTime,
    teams: Vec<WireTeam>,
    #[serde(default)]
    map: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireTeam {
    players: Vec<String>,
    #[serde(default)]
    won: bool,
}

impl From<WireMatch> for MatchSummary {
    fn from(value: WireMatch) -> Self {
        Self {
            id: value.id,
            started_at: value.started_at,
            teams: value
                .teams
                .into_iter()
                .map(|team| MatchTeam {
                    players: team.players,
                    won: team.won,
                })
                .collect(),
            map: value.map,
            mode: value.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn statuses_map_onto_taxonomy() {
        assert_eq!(classify(StatusCode::UNAUTHORIZED, "m"), ProviderError::Auth);
        assert_eq!(classify(StatusCode::FORBIDDEN, "m"), ProviderError::Auth);
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, "m"),
            ProviderError::RateLimited
        );
        assert_eq!(
            classify(StatusCode::NOT_FOUND, "match 9"),
            ProviderError::NotFound("match 9".into())
        );
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, "m"),
            ProviderError::Transient(_)
        ));
    }

    #[test]
    fn wire_page_decodes_into_summaries() {
        let page: WireMatchPage = serde_json::from_str(
            r#"{"items":[{"id":"m1","startedAt":1700000000,"teams":[
                {"players":["alice","bob"],"won":true},
                {"players":["carol","dave"]}
            ],"map":"Hard Rock Mine"}]}"#,
        )
        .unwrap();

        let summary: MatchSummary = page.items.into_iter().next().unwrap().into();
        assert_eq!(summary.id, "m1");
        assert_eq!(
            summary.started_at,
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
        assert!(summary.teams[0].won);
        assert!(!summary.teams[1].won);
        assert_eq!(summary.mode, None);
    }
}
