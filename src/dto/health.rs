use serde::Serialize;
use utoipa::ToSchema;

/// Overall service state; `degraded` while storage is unreachable and trackers run memory-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Body of `/healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Outcome of the storage ping made while answering this request.
    pub storage_reachable: bool,
    /// Series trackers currently running in this process.
    pub live_trackers: usize,
}
