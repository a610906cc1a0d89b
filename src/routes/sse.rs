use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/series",
    tag = "sse",
    responses((status = 200, description = "Series feed: scoreboards, notices and system status", content_type = "text/event-stream", body = String))
)]
/// Stream rendered series messages and degraded-mode changes.
pub async fn series_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let (receiver, handshake) = sse_service::subscribe_series(&state);
    info!("New series SSE connection");
    sse_service::to_sse_stream(receiver, handshake)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/series", get(series_stream))
}
