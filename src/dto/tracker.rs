//! Projections of tracker state exposed by the admin API and the series feed.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::format_system_time,
    state::{
        series::{EnrichedMatch, ErrorState, SeriesIdentity, Substitution, TrackerState},
        state_machine::{PauseReason, TrackerStatus},
    },
};

/// Composite key of a tracked series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct SeriesIdentityDto {
    #[validate(length(min = 1, max = 64))]
    pub guild_id: String,
    #[validate(length(min = 1, max = 64))]
    pub channel_id: String,
    pub queue_number: u32,
}

impl From<&SeriesIdentity> for SeriesIdentityDto {
    fn from(value: &SeriesIdentity) -> Self {
        Self {
            guild_id: value.guild_id.clone(),
            channel_id: value.channel_id.clone(),
            queue_number: value.queue_number,
        }
    }
}

impl From<SeriesIdentityDto> for SeriesIdentity {
    fn from(value: SeriesIdentityDto) -> Self {
        SeriesIdentity::new(value.guild_id, value.channel_id, value.queue_number)
    }
}

/// Lifecycle status flattened for API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatusDto {
    Active,
    Paused,
    Stopped,
    Completed,
}

/// Why a paused tracker is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PauseReasonDto {
    Errors,
    Configuration,
}

fn split_status(status: &TrackerStatus) -> (TrackerStatusDto, Option<PauseReasonDto>) {
    match status {
        TrackerStatus::Active => (TrackerStatusDto::Active, None),
        TrackerStatus::Paused(PauseReason::Errors) => {
            (TrackerStatusDto::Paused, Some(PauseReasonDto::Errors))
        }
        TrackerStatus::Paused(PauseReason::Configuration) => {
            (TrackerStatusDto::Paused, Some(PauseReasonDto::Configuration))
        }
        TrackerStatus::Stopped => (TrackerStatusDto::Stopped, None),
        TrackerStatus::Completed => (TrackerStatusDto::Completed, None),
    }
}

/// Row of the tracker listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackerSummary {
    pub series: SeriesIdentityDto,
    pub status: TrackerStatusDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<PauseReasonDto>,
    pub best_of: u32,
    pub series_score: String,
}

impl From<&TrackerState> for TrackerSummary {
    fn from(state: &TrackerState) -> Self {
        let (status, pause_reason) = split_status(&state.status);
        Self {
            series: SeriesIdentityDto::from(&state.identity),
            status,
            pause_reason,
            best_of: state.best_of,
            series_score: state.series_score.clone(),
        }
    }
}

/// Match counted towards the series score.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchDto {
    pub id: String,
    pub started_at: String,
    /// Winning series team index, absent for a draw.
    pub winner: Option<usize>,
    pub map: Option<String>,
    pub mode: Option<String>,
}

impl From<&EnrichedMatch> for MatchDto {
    fn from(value: &EnrichedMatch) -> Self {
        Self {
            id: value.id.clone(),
            started_at: format_system_time(value.started_at),
            winner: value.winner,
            map: value.map.clone(),
            mode: value.mode.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubstitutionDto {
    pub player_out: String,
    pub player_in: Option<String>,
    pub team_index: usize,
    pub timestamp: String,
}

impl From<&Substitution> for SubstitutionDto {
    fn from(value: &Substitution) -> Self {
        Self {
            player_out: value.player_out.clone(),
            player_in: value.player_in.clone(),
            team_index: value.team_index,
            timestamp: format_system_time(value.timestamp),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorStateDto {
    pub consecutive_errors: u32,
    pub backoff_minutes: u64,
    pub last_success_time: Option<String>,
    pub last_error_message: Option<String>,
}

impl From<&ErrorState> for ErrorStateDto {
    fn from(value: &ErrorState) -> Self {
        Self {
            consecutive_errors: value.consecutive_errors,
            backoff_minutes: value.backoff_minutes,
            last_success_time: value.last_success_time.map(format_system_time),
            last_error_message: value.last_error_message.clone(),
        }
    }
}

/// Full snapshot of one tracker.
#[derive(Debug, Serialize, ToSchema)]
pub struct TrackerDetail {
    pub series: SeriesIdentityDto,
    pub status: TrackerStatusDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<PauseReasonDto>,
    pub revision: u64,
    pub best_of: u32,
    pub series_score: String,
    pub created_at: String,
    pub last_updated: String,
    pub next_check_at: String,
    pub matches: Vec<MatchDto>,
    pub roster: Vec<Vec<String>>,
    pub substitutions: Vec<SubstitutionDto>,
    pub error_state: ErrorStateDto,
}

impl From<&TrackerState> for TrackerDetail {
    fn from(state: &TrackerState) -> Self {
        let (status, pause_reason) = split_status(&state.status);
        Self {
            series: SeriesIdentityDto::from(&state.identity),
            status,
            pause_reason,
            revision: state.revision,
            best_of: state.best_of,
            series_score: state.series_score.clone(),
            created_at: format_system_time(state.created_at),
            last_updated: format_system_time(state.last_updated),
            next_check_at: format_system_time(state.next_check_at),
            matches: state.enriched_matches.values().map(MatchDto::from).collect(),
            roster: state.roster.teams().to_vec(),
            substitutions: state.substitutions.iter().map(SubstitutionDto::from).collect(),
            error_state: ErrorStateDto::from(&state.error_state),
        }
    }
}

/// Generic acknowledgement payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
}
