use std::time::SystemTime;

use tracing::info;

use crate::{
    dto::webhook::{
        MatchCompletedEvent, QueueEvent, StopTrackingEvent, SubstitutionEvent, TeamsCreatedEvent,
        WebhookAccepted,
    },
    error::ServiceError,
    state::{
        SharedState,
        series::{Roster, SeriesIdentity, SubstitutionRequest, TrackerState},
    },
};

/// Dispatch a validated queue event to the tracker registry.
pub async fn handle_event(
    state: &SharedState,
    event: QueueEvent,
) -> Result<WebhookAccepted, ServiceError> {
    let accepted = match event {
        QueueEvent::TeamsCreated(event) => {
            teams_created(state, event)?;
            "teams_created"
        }
        QueueEvent::Substitution(event) => {
            substitution(state, event).await?;
            "substitution"
        }
        QueueEvent::MatchCompleted(event) => {
            match_completed(state, event).await?;
            "match_completed"
        }
        QueueEvent::StopTracking(event) => {
            stop_tracking(state, event).await?;
            "stop_tracking"
        }
    };

    Ok(WebhookAccepted {
        event: accepted.to_string(),
    })
}

fn teams_created(state: &SharedState, event: TeamsCreatedEvent) -> Result<(), ServiceError> {
    let identity = SeriesIdentity::from(event.series);
    let tracker = TrackerState::new(
        identity.clone(),
        Roster::new(event.teams),
        event.best_of,
        SystemTime::now(),
    );
    state.registry().start(tracker)?;
    info!(series = %identity, best_of = event.best_of, "started tracking series");
    Ok(())
}

async fn substitution(state: &SharedState, event: SubstitutionEvent) -> Result<(), ServiceError> {
    let identity = SeriesIdentity::from(event.series);
    let handle = state.registry().live(&identity)?;
    handle
        .substitute(SubstitutionRequest {
            player_out: event.player_out,
            player_in: event.player_in,
            team_index: event.team_index,
        })
        .await?;
    Ok(())
}

async fn match_completed(
    state: &SharedState,
    event: MatchCompletedEvent,
) -> Result<(), ServiceError> {
    let identity = SeriesIdentity::from(event.series);
    let handle = state.registry().live(&identity)?;
    handle.match_completed(event.match_id).await?;
    Ok(())
}

async fn stop_tracking(state: &SharedState, event: StopTrackingEvent) -> Result<(), ServiceError> {
    let identity = SeriesIdentity::from(event.series);
    let status = state.registry().stop(&identity).await?;
    info!(series = %identity, ?status, "stopped tracking series");
    Ok(())
}
