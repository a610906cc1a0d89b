use tracing::{info, warn};

use crate::{
    dto::tracker::{ActionResponse, TrackerDetail, TrackerSummary},
    error::ServiceError,
    services::tracker_registry::RegistryError,
    state::{SharedState, series::SeriesIdentity},
};

/// Summaries of every running tracker, ordered by series identity.
pub async fn list_trackers(state: &SharedState) -> Result<Vec<TrackerSummary>, ServiceError> {
    let mut summaries = Vec::new();
    for handle in state.registry().list() {
        match handle.snapshot().await {
            Ok(snapshot) => summaries.push(TrackerSummary::from(&snapshot)),
            // Finished while we were iterating.
            Err(RegistryError::Closed(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(summaries)
}

/// Live snapshot of a tracker, falling back to its archived copy once it has finished.
pub async fn get_tracker(
    state: &SharedState,
    identity: SeriesIdentity,
) -> Result<TrackerDetail, ServiceError> {
    if let Some(handle) = state.registry().get(&identity) {
        match handle.snapshot().await {
            Ok(snapshot) => return Ok(TrackerDetail::from(&snapshot)),
            Err(err) => warn!(series = %identity, error = %err, "live snapshot unavailable"),
        }
    }

    let repository = state.registry().repository();
    if let Some(archived) = repository.load_archived(&identity).await? {
        return Ok(TrackerDetail::from(&archived));
    }
    Err(ServiceError::unknown_series(&identity))
}

/// Operator stop of a running tracker.
pub async fn stop_tracker(
    state: &SharedState,
    identity: SeriesIdentity,
) -> Result<ActionResponse, ServiceError> {
    let status = state.registry().stop(&identity).await?;
    info!(series = %identity, ?status, "tracker stopped by operator");
    Ok(ActionResponse {
        message: format!("tracking of series {identity} stopped"),
    })
}

/// Operator resume of a paused tracker.
pub async fn resume_tracker(
    state: &SharedState,
    identity: SeriesIdentity,
) -> Result<ActionResponse, ServiceError> {
    state.registry().live(&identity)?.resume().await?;
    Ok(ActionResponse {
        message: format!("tracking of series {identity} resumed"),
    })
}
