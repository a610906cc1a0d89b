use axum::Router;

use crate::state::SharedState;

pub mod admin;
pub mod docs;
pub mod health;
pub mod sse;
pub mod webhook;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(webhook::router(state.clone()))
        .merge(admin::router(state.clone()));

    api_router.merge(docs::router()).with_state(state)
}
