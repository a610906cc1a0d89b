use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use utoipa::ToSchema;

use super::{ClientConfigError, http_client};
use crate::{
    dto::{
        sse::{SERIES_MESSAGE_EVENT, SeriesFeedEvent, ServerEvent},
        tracker::SeriesIdentityDto,
    },
    state::{SseHub, series::SeriesIdentity},
};

/// Purpose of a rendered series message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// New standing of the series; replaces the persistent series message.
    Update,
    /// Tracking paused after repeated failures.
    Paused,
    /// The series cannot be tracked until an operator fixes it.
    ConfigurationError,
    /// Final summary; replaces the persistent series message.
    Completed,
}

impl MessageKind {
    /// Whether the message replaces the persistent scoreboard rather than posting a notice.
    pub fn updates_scoreboard(self) -> bool {
        matches!(self, MessageKind::Update | MessageKind::Completed)
    }
}

/// Message emitted by a tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesMessage {
    pub kind: MessageKind,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode series message")]
    Encode(#[source] serde_json::Error),
    #[error("message relay request failed")]
    Request(#[source] reqwest::Error),
    #[error("message relay answered with status {0}")]
    Status(StatusCode),
}

/// Destination of series messages. Delivery is fire-and-forget for trackers.
pub trait MessageSink: Send + Sync {
    fn post_or_update_series_message(
        &self,
        identity: &SeriesIdentity,
        message: SeriesMessage,
    ) -> BoxFuture<'static, Result<(), SinkError>>;
}

/// Publishes messages on the series SSE feed.
#[derive(Clone)]
pub struct FeedSink {
    hub: SseHub,
}

impl FeedSink {
    pub fn new(hub: SseHub) -> Self {
        Self { hub }
    }
}

fn feed_event(identity: &SeriesIdentity, message: SeriesMessage) -> SeriesFeedEvent {
    SeriesFeedEvent {
        series: SeriesIdentityDto::from(identity),
        kind: message.kind,
        updates_scoreboard: message.kind.updates_scoreboard(),
        content: message.content,
    }
}

impl MessageSink for FeedSink {
    fn post_or_update_series_message(
        &self,
        identity: &SeriesIdentity,
        message: SeriesMessage,
    ) -> BoxFuture<'static, Result<(), SinkError>> {
        let result = ServerEvent::json(
            Some(SERIES_MESSAGE_EVENT.to_string()),
            &feed_event(identity, message),
        )
        .map(|event| self.hub.broadcast(event))
        .map_err(SinkError::Encode);
        Box::pin(async move { result })
    }
}

/// Forwards messages to the chat bot over HTTP.
#[derive(Clone)]
pub struct HttpRelaySink {
    client: Client,
    url: Arc<str>,
}

impl HttpRelaySink {
    pub fn new(client: Client, url: impl Into<Arc<str>>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Build the relay from `MESSAGE_RELAY_URL`, if set.
    pub fn from_env() -> Result<Option<Self>, ClientConfigError> {
        let Some(url) = std::env::var("MESSAGE_RELAY_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
        else {
            return Ok(None);
        };
        Ok(Some(Self::new(http_client()?, url)))
    }
}

impl MessageSink for HttpRelaySink {
    fn post_or_update_series_message(
        &self,
        identity: &SeriesIdentity,
        message: SeriesMessage,
    ) -> BoxFuture<'static, Result<(), SinkError>> {
        let request = self
            .client
            .post(self.url.as_ref())
            .json(&feed_event(identity, message));
        Box::pin(async move {
            let response = request.send().await.map_err(SinkError::Request)?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(SinkError::Status(response.status()))
            }
        })
    }
}

/// Delivers each message to every inner sink; individual failures are only logged.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MessageSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn MessageSink>>) -> Self {
        Self { sinks }
    }
}

impl MessageSink for FanoutSink {
    fn post_or_update_series_message(
        &self,
        identity: &SeriesIdentity,
        message: SeriesMessage,
    ) -> BoxFuture<'static, Result<(), SinkError>> {
        let deliveries: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| sink.post_or_update_series_message(identity, message.clone()))
            .collect();
        let series = identity.to_string();
        Box::pin(async move {
            for result in join_all(deliveries).await {
                if let Err(err) = result {
                    warn!(series = %series, error = %err, "series message delivery failed");
                }
            }
            Ok(())
        })
    }
}
