//! Events posted by the matchmaking-queue integration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::dto::tracker::SeriesIdentityDto;

/// Largest best-of value accepted from the queue.
pub const MAX_BEST_OF: u32 = 99;
const MAX_PLAYER_ID_LEN: usize = 64;
const MAX_PLAYER_ID_LEN_U64: u64 = MAX_PLAYER_ID_LEN as u64;

/// Event envelope, discriminated by its `type` field.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    TeamsCreated(TeamsCreatedEvent),
    Substitution(SubstitutionEvent),
    MatchCompleted(MatchCompletedEvent),
    StopTracking(StopTrackingEvent),
}

impl QueueEvent {
    pub fn series(&self) -> &SeriesIdentityDto {
        match self {
            QueueEvent::TeamsCreated(event) => &event.series,
            QueueEvent::Substitution(event) => &event.series,
            QueueEvent::MatchCompleted(event) => &event.series,
            QueueEvent::StopTracking(event) => &event.series,
        }
    }
}

impl Validate for QueueEvent {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            QueueEvent::TeamsCreated(event) => event.validate(),
            QueueEvent::Substitution(event) => event.validate(),
            QueueEvent::MatchCompleted(event) => event.validate(),
            QueueEvent::StopTracking(event) => event.validate(),
        }
    }
}

/// Teams were drafted: start tracking the series.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct TeamsCreatedEvent {
    #[validate(nested)]
    pub series: SeriesIdentityDto,
    /// Player ids per team. Unusable rosters are accepted and pause the tracker.
    #[validate(custom(function = "validate_teams"))]
    pub teams: Vec<Vec<String>>,
    #[validate(range(max = MAX_BEST_OF))]
    pub best_of: u32,
}

/// A player left a team, optionally replaced.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct SubstitutionEvent {
    #[validate(nested)]
    pub series: SeriesIdentityDto,
    #[validate(length(min = 1, max = MAX_PLAYER_ID_LEN_U64))]
    pub player_out: String,
    #[serde(default)]
    #[validate(length(min = 1, max = MAX_PLAYER_ID_LEN_U64))]
    pub player_in: Option<String>,
    pub team_index: usize,
}

/// The queue observed the end of a match; triggers an immediate reconciliation.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct MatchCompletedEvent {
    #[validate(nested)]
    pub series: SeriesIdentityDto,
    #[serde(default)]
    #[validate(length(min = 1, max = MAX_PLAYER_ID_LEN_U64))]
    pub match_id: Option<String>,
}

/// The queue was closed: stop tracking.
#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
pub struct StopTrackingEvent {
    #[validate(nested)]
    pub series: SeriesIdentityDto,
}

fn validate_teams(teams: &[Vec<String>]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for player in teams.iter().flatten() {
        if player.is_empty() || player.len() > MAX_PLAYER_ID_LEN {
            let mut err = ValidationError::new("player_id_length");
            err.message = Some(
                format!("player ids must be 1 to {MAX_PLAYER_ID_LEN} characters long").into(),
            );
            return Err(err);
        }
        if !seen.insert(player.as_str()) {
            let mut err = ValidationError::new("duplicate_player");
            err.message = Some(format!("player `{player}` appears more than once").into());
            return Err(err);
        }
    }
    Ok(())
}

/// Acknowledgement returned once an event has been accepted.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAccepted {
    /// Event type that was processed.
    pub event: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> QueueEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn teams_created_decodes_and_validates() {
        let event = parse(
            r#"{"type":"teams_created","series":{"guild_id":"g","channel_id":"c","queue_number":3},
                "teams":[["a","b"],["c","d"]],"best_of":3}"#,
        );
        assert!(matches!(event, QueueEvent::TeamsCreated(_)));
        assert_eq!(event.series().queue_number, 3);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn duplicate_players_are_rejected() {
        let event = parse(
            r#"{"type":"teams_created","series":{"guild_id":"g","channel_id":"c","queue_number":3},
                "teams":[["a","b"],["b","d"]],"best_of":3}"#,
        );
        let errors = event.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("teams"));
    }

    #[test]
    fn empty_team_is_left_to_the_tracker() {
        let event = parse(
            r#"{"type":"teams_created","series":{"guild_id":"g","channel_id":"c","queue_number":3},
                "teams":[["a"],[]],"best_of":4}"#,
        );
        assert!(event.validate().is_ok());
    }

    #[test]
    fn blank_series_identity_is_rejected() {
        let event = parse(r#"{"type":"stop_tracking","series":{"guild_id":"","channel_id":"c","queue_number":1}}"#);
        assert!(event.validate().is_err());
    }

    #[test]
    fn substitution_requires_player_out() {
        let event = parse(
            r#"{"type":"substitution","series":{"guild_id":"g","channel_id":"c","queue_number":1},
                "player_out":"","team_index":0}"#,
        );
        assert!(event.validate().is_err());

        let event = parse(
            r#"{"type":"match_completed","series":{"guild_id":"g","channel_id":"c","queue_number":1}}"#,
        );
        assert!(event.validate().is_ok());
    }
}
