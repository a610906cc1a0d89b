use serde::Serialize;
use utoipa::ToSchema;

use crate::{clients::message_sink::MessageKind, dto::tracker::SeriesIdentityDto};

/// SSE event name carrying [`SeriesFeedEvent`] payloads.
pub const SERIES_MESSAGE_EVENT: &str = "series_message";
/// SSE event name carrying [`SystemStatus`] payloads.
pub const SYSTEM_STATUS_EVENT: &str = "system_status";

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend currently cannot reach its storage backend.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Rendered series message published by a tracker.
pub struct SeriesFeedEvent {
    pub series: SeriesIdentityDto,
    pub kind: MessageKind,
    /// `true` when the content replaces the persistent scoreboard message, `false` for notices.
    pub updates_scoreboard: bool,
    pub content: String,
}
