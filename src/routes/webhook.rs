use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::post,
};
use axum_valid::Valid;
use tracing::debug;

use crate::{
    dto::webhook::{QueueEvent, WebhookAccepted},
    error::AppError,
    services::webhook_service,
    state::SharedState,
};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Inbound events from the matchmaking queue.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/webhooks/queue", post(queue_event))
        .route_layer(middleware::from_fn_with_state(state, require_webhook_secret))
}

/// Accept a queue event and hand it to the matching tracker.
#[utoipa::path(
    post,
    path = "/webhooks/queue",
    tag = "webhooks",
    params(("X-Webhook-Secret" = String, Header, description = "Shared secret configured for the queue integration")),
    request_body = QueueEvent,
    responses(
        (status = 202, description = "Event accepted", body = WebhookAccepted),
        (status = 400, description = "Malformed or invalid event"),
        (status = 401, description = "Missing or wrong secret"),
        (status = 404, description = "No running tracker for this series"),
        (status = 409, description = "Series already tracked")
    )
)]
pub async fn queue_event(
    State(state): State<SharedState>,
    Valid(Json(event)): Valid<Json<QueueEvent>>,
) -> Result<(StatusCode, Json<WebhookAccepted>), AppError> {
    debug!(series = ?event.series(), "queue webhook received");
    let accepted = webhook_service::handle_event(&state, event).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn require_webhook_secret(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing webhook secret header `X-Webhook-Secret`".into())
        })?;

    if provided != state.secrets().webhook_secret {
        return Err(AppError::Unauthorized("invalid webhook secret".into()));
    }
    Ok(next.run(req).await)
}
