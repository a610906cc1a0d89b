use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Path of the generated OpenAPI document consumed by the Swagger UI.
pub const OPENAPI_JSON_PATH: &str = "/api-doc/series-tracker.json";

/// Swagger UI under `/docs`.
pub fn router() -> Router<SharedState> {
    SwaggerUi::new("/docs")
        .url(OPENAPI_JSON_PATH, ApiDoc::openapi())
        .into()
}
