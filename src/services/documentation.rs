use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the series tracker.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::series_stream,
        crate::routes::webhook::queue_event,
        crate::routes::admin::list_trackers,
        crate::routes::admin::get_tracker,
        crate::routes::admin::stop_tracker,
        crate::routes::admin::resume_tracker,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::sse::SeriesFeedEvent,
            crate::dto::webhook::QueueEvent,
            crate::dto::webhook::TeamsCreatedEvent,
            crate::dto::webhook::SubstitutionEvent,
            crate::dto::webhook::MatchCompletedEvent,
            crate::dto::webhook::StopTrackingEvent,
            crate::dto::webhook::WebhookAccepted,
            crate::dto::tracker::SeriesIdentityDto,
            crate::dto::tracker::TrackerSummary,
            crate::dto::tracker::TrackerDetail,
            crate::dto::tracker::ActionResponse,
            crate::clients::message_sink::MessageKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "webhooks", description = "Matchmaking queue integration"),
        (name = "admin", description = "Operator control of series trackers"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        for expected in [
            "/healthcheck",
            "/sse/series",
            "/webhooks/queue",
            "/admin/trackers",
            "/admin/trackers/{guild_id}/{channel_id}/{queue_number}/resume",
        ] {
            assert!(paths.iter().any(|p| p == expected), "missing {expected}");
        }
    }
}
