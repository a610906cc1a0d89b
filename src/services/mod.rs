/// Operator views and commands over running trackers.
pub mod admin_service;
/// Single-flight cache of the stats provider credential.
pub mod credential_cache;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Paced admission control for stats provider calls.
pub mod rate_limiter;
/// Rendering of scoreboards and series notices.
pub mod series_message;
/// Per-series polling task.
pub mod series_tracker;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Authenticated, rate-limited access to the stats provider.
pub mod stats_gateway;
/// Storage health watcher toggling degraded mode.
pub mod storage_supervisor;
/// Ownership of every running series tracker.
pub mod tracker_registry;
/// Dispatch of queue webhooks to the registry.
pub mod webhook_service;

#[cfg(test)]
pub(crate) mod test_support;
