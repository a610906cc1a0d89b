use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};

use crate::{
    dto::tracker::{ActionResponse, TrackerDetail, TrackerSummary},
    error::AppError,
    services::admin_service,
    state::{SharedState, series::SeriesIdentity},
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints for inspecting and steering series trackers.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/trackers", get(list_trackers))
        .route(
            "/admin/trackers/{guild_id}/{channel_id}/{queue_number}",
            get(get_tracker),
        )
        .route(
            "/admin/trackers/{guild_id}/{channel_id}/{queue_number}/stop",
            post(stop_tracker),
        )
        .route(
            "/admin/trackers/{guild_id}/{channel_id}/{queue_number}/resume",
            post(resume_tracker),
        )
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

fn identity((guild_id, channel_id, queue_number): (String, String, u32)) -> SeriesIdentity {
    SeriesIdentity::new(guild_id, channel_id, queue_number)
}

/// List every running tracker.
#[utoipa::path(
    get,
    path = "/admin/trackers",
    tag = "admin",
    params(("X-Admin-Token" = String, Header, description = "Configured operator token")),
    responses((status = 200, description = "Running trackers", body = [TrackerSummary]))
)]
pub async fn list_trackers(
    State(state): State<SharedState>,
) -> Result<Json<Vec<TrackerSummary>>, AppError> {
    Ok(Json(admin_service::list_trackers(&state).await?))
}

/// Full snapshot of one tracker, live or archived.
#[utoipa::path(
    get,
    path = "/admin/trackers/{guild_id}/{channel_id}/{queue_number}",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Configured operator token"),
        ("guild_id" = String, Path, description = "Guild of the series"),
        ("channel_id" = String, Path, description = "Channel of the series"),
        ("queue_number" = u32, Path, description = "Queue number within the channel")
    ),
    responses(
        (status = 200, description = "Tracker snapshot", body = TrackerDetail),
        (status = 404, description = "No tracker for this series")
    )
)]
pub async fn get_tracker(
    State(state): State<SharedState>,
    Path(path): Path<(String, String, u32)>,
) -> Result<Json<TrackerDetail>, AppError> {
    Ok(Json(admin_service::get_tracker(&state, identity(path)).await?))
}

/// Stop a running tracker and archive its last snapshot.
#[utoipa::path(
    post,
    path = "/admin/trackers/{guild_id}/{channel_id}/{queue_number}/stop",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Configured operator token"),
        ("guild_id" = String, Path, description = "Guild of the series"),
        ("channel_id" = String, Path, description = "Channel of the series"),
        ("queue_number" = u32, Path, description = "Queue number within the channel")
    ),
    responses(
        (status = 200, description = "Tracker stopped", body = ActionResponse),
        (status = 404, description = "No running tracker for this series")
    )
)]
pub async fn stop_tracker(
    State(state): State<SharedState>,
    Path(path): Path<(String, String, u32)>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::stop_tracker(&state, identity(path)).await?))
}

/// Resume a paused tracker and poll immediately.
#[utoipa::path(
    post,
    path = "/admin/trackers/{guild_id}/{channel_id}/{queue_number}/resume",
    tag = "admin",
    params(
        ("X-Admin-Token" = String, Header, description = "Configured operator token"),
        ("guild_id" = String, Path, description = "Guild of the series"),
        ("channel_id" = String, Path, description = "Channel of the series"),
        ("queue_number" = u32, Path, description = "Queue number within the channel")
    ),
    responses(
        (status = 200, description = "Tracker resumed", body = ActionResponse),
        (status = 404, description = "No running tracker for this series"),
        (status = 409, description = "Tracker is not paused or its roster is still invalid")
    )
)]
pub async fn resume_tracker(
    State(state): State<SharedState>,
    Path(path): Path<(String, String, u32)>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(admin_service::resume_tracker(&state, identity(path)).await?))
}

async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    if provided != state.secrets().admin_token {
        return Err(AppError::Unauthorized("invalid admin token".into()));
    }
    Ok(next.run(req).await)
}
