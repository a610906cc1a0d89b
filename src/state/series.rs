//! Series domain model: identities, rosters, reconciled matches and poll bookkeeping.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::TrackerConfig,
    state::state_machine::{InvalidTransition, PauseReason, TrackerEvent, TrackerStatus},
};

/// Identifier assigned to a player by the stats provider.
pub type PlayerId = String;
/// Identifier assigned to a match by the stats provider.
pub type MatchId = String;

/// Number of teams facing each other in a series.
pub const TEAM_COUNT: usize = 2;

/// Composite key of a tracked series. Immutable for the lifetime of a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesIdentity {
    pub guild_id: String,
    pub channel_id: String,
    pub queue_number: u32,
}

impl SeriesIdentity {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>, queue_number: u32) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            queue_number,
        }
    }
}

impl fmt::Display for SeriesIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.guild_id, self.channel_id, self.queue_number)
    }
}

/// One side of a match as reported by the stats provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTeam {
    pub players: Vec<PlayerId>,
    pub won: bool,
}

/// Match result as returned by the stats provider, before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub id: MatchId,
    pub started_at: SystemTime,
    pub teams: Vec<MatchTeam>,
    #[serde(default)]
    pub map: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Match folded into the series score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedMatch {
    pub id: MatchId,
    pub started_at: SystemTime,
    /// Series team credited with the win; `None` for a draw.
    pub winner: Option<usize>,
    pub map: Option<String>,
    pub mode: Option<String>,
}

/// Current players of both series teams, indexed by team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    teams: Vec<Vec<PlayerId>>,
}

impl Roster {
    pub fn new(teams: Vec<Vec<PlayerId>>) -> Self {
        Self { teams }
    }

    pub fn teams(&self) -> &[Vec<PlayerId>] {
        &self.teams
    }

    /// Every rostered player, team by team.
    pub fn players(&self) -> Vec<PlayerId> {
        self.teams.iter().flatten().cloned().collect()
    }

    /// Team index currently holding `player`, if any.
    pub fn team_of(&self, player: &str) -> Option<usize> {
        self.teams
            .iter()
            .position(|team| team.iter().any(|p| p == player))
    }

    fn problem(&self) -> Option<SeriesConfigError> {
        if self.teams.len() != TEAM_COUNT {
            return Some(SeriesConfigError::TeamCount(self.teams.len()));
        }
        self.teams
            .iter()
            .position(Vec::is_empty)
            .map(SeriesConfigError::EmptyTeam)
    }
}

/// Roster change requested by the queue integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRequest {
    pub player_out: PlayerId,
    /// `None` removes `player_out` without a replacement.
    pub player_in: Option<PlayerId>,
    pub team_index: usize,
}

/// Audit entry for an applied substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub player_out: PlayerId,
    pub player_in: Option<PlayerId>,
    pub team_index: usize,
    pub timestamp: SystemTime,
}

/// Poll failure bookkeeping driving backoff and auto-pause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorState {
    pub consecutive_errors: u32,
    pub backoff_minutes: u64,
    pub last_success_time: Option<SystemTime>,
    pub last_error_message: Option<String>,
}

/// Reason a substitution was refused. The roster is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstitutionError {
    #[error("team index {0} is out of range")]
    UnknownTeam(usize),
    #[error("player `{player}` is not on team {team_index}")]
    PlayerNotOnTeam { player: PlayerId, team_index: usize },
    #[error("player `{0}` is already on the roster")]
    AlreadyRostered(PlayerId),
}

/// Series configuration that prevents polling until an operator steps in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesConfigError {
    #[error("best-of value {0} is invalid; it must be a positive odd number")]
    InvalidBestOf(u32),
    #[error("a series needs exactly {TEAM_COUNT} teams, got {0}")]
    TeamCount(usize),
    #[error("team {0} has no players left on the roster")]
    EmptyTeam(usize),
}

/// How a fetched match relates to the tracked series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// The match does not oppose the two rosters.
    Unrelated,
    /// The match counts; carries the winning series team (`None` for a draw).
    Counted(Option<usize>),
}

/// Outcome of recording a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub consecutive_errors: u32,
    pub backoff: Duration,
    /// Set when the failure crosses the pause threshold while active.
    pub pause: bool,
}

/// Persisted state of one series tracker. Mutated only by its own tracker task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    pub identity: SeriesIdentity,
    pub best_of: u32,
    pub status: TrackerStatus,
    /// Incremented on every status transition.
    pub revision: u64,
    pub created_at: SystemTime,
    pub last_updated: SystemTime,
    pub next_check_at: SystemTime,
    pub enriched_matches: IndexMap<MatchId, EnrichedMatch>,
    pub series_score: String,
    pub roster: Roster,
    pub substitutions: Vec<Substitution>,
    pub error_state: ErrorState,
}

impl TrackerState {
    /// Fresh active state for a series whose teams were just created.
    pub fn new(identity: SeriesIdentity, roster: Roster, best_of: u32, now: SystemTime) -> Self {
        let mut state = Self {
            identity,
            best_of,
            status: TrackerStatus::Active,
            revision: 0,
            created_at: now,
            last_updated: now,
            next_check_at: now,
            enriched_matches: IndexMap::new(),
            series_score: String::new(),
            roster,
            substitutions: Vec::new(),
            error_state: ErrorState::default(),
        };
        state.series_score = state.render_score();
        state
    }

    /// Apply a lifecycle event to the status.
    pub fn transition(&mut self, event: TrackerEvent) -> Result<&TrackerStatus, InvalidTransition> {
        self.status = self.status.next(event)?;
        self.revision += 1;
        Ok(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// First reason the series cannot be polled, if any.
    pub fn configuration_problem(&self) -> Option<SeriesConfigError> {
        if self.best_of == 0 || self.best_of % 2 == 0 {
            return Some(SeriesConfigError::InvalidBestOf(self.best_of));
        }
        self.roster.problem()
    }

    /// Wins required to decide the series.
    pub fn wins_needed(&self) -> u32 {
        self.best_of / 2 + 1
    }

    /// Wins per series team.
    pub fn wins(&self) -> [u32; TEAM_COUNT] {
        let mut wins = [0; TEAM_COUNT];
        for winner in self.enriched_matches.values().filter_map(|m| m.winner) {
            if let Some(slot) = wins.get_mut(winner) {
                *slot += 1;
            }
        }
        wins
    }

    /// Team that has mathematically won the series.
    pub fn winner(&self) -> Option<usize> {
        if self.best_of == 0 {
            return None;
        }
        let needed = self.wins_needed();
        self.wins().iter().position(|&w| w >= needed)
    }

    pub fn is_decided(&self) -> bool {
        self.winner().is_some()
    }

    /// Decide whether `summary` opposes the two rosters and who won it.
    pub fn attribute(&self, summary: &MatchSummary) -> Attribution {
        // For each provider side, the series team with the most rostered players on it.
        let sides: Vec<Option<usize>> = summary
            .teams
            .iter()
            .map(|side| self.dominant_team(&side.players))
            .collect();

        let opposed = (0..TEAM_COUNT).all(|team| sides.contains(&Some(team)));
        if !opposed {
            return Attribution::Unrelated;
        }

        let winner = summary
            .teams
            .iter()
            .zip(&sides)
            .find(|(side, _)| side.won)
            .and_then(|(_, team)| *team);
        Attribution::Counted(winner)
    }

    fn dominant_team(&self, players: &[PlayerId]) -> Option<usize> {
        let mut counts = [0usize; TEAM_COUNT];
        for player in players {
            if let Some(team) = self.roster.team_of(player) {
                counts[team] += 1;
            }
        }
        match counts {
            [0, 0] => None,
            [a, b] if a == b => None,
            [a, b] => Some(if a > b { 0 } else { 1 }),
        }
    }

    /// Matches from a fetch that still need folding, in start-time order.
    ///
    /// Already-enriched ids are dropped here, so overlapping fetch windows are harmless.
    pub fn unseen_matches(&self, mut matches: Vec<MatchSummary>) -> Vec<MatchSummary> {
        matches.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        matches.dedup_by(|a, b| a.id == b.id);
        matches.retain(|m| !self.enriched_matches.contains_key(&m.id));
        matches
    }

    /// Fold a single match into the series. Returns the enriched entry when it counted.
    pub fn fold(&mut self, summary: MatchSummary) -> Option<EnrichedMatch> {
        if self.enriched_matches.contains_key(&summary.id) || self.is_decided() {
            return None;
        }
        // Games the same players finished before this series opened belong to an older one.
        if summary.started_at < self.created_at {
            return None;
        }
        let Attribution::Counted(winner) = self.attribute(&summary) else {
            return None;
        };

        let enriched = EnrichedMatch {
            id: summary.id,
            started_at: summary.started_at,
            winner,
            map: summary.map,
            mode: summary.mode,
        };
        self.enriched_matches
            .insert(enriched.id.clone(), enriched.clone());
        self.series_score = self.render_score();
        Some(enriched)
    }

    fn render_score(&self) -> String {
        let [a, b] = self.wins();
        format!("{a}-{b}")
    }

    /// Swap `player_out` for `player_in` within the named team.
    pub fn apply_substitution(
        &mut self,
        request: SubstitutionRequest,
        now: SystemTime,
    ) -> Result<Substitution, SubstitutionError> {
        let SubstitutionRequest {
            player_out,
            player_in,
            team_index,
        } = request;

        if team_index >= self.roster.teams.len() {
            return Err(SubstitutionError::UnknownTeam(team_index));
        }
        if let Some(incoming) = &player_in {
            if self.roster.team_of(incoming).is_some() {
                return Err(SubstitutionError::AlreadyRostered(incoming.clone()));
            }
        }

        let team = &mut self.roster.teams[team_index];
        let Some(slot) = team.iter().position(|p| *p == player_out) else {
            return Err(SubstitutionError::PlayerNotOnTeam {
                player: player_out,
                team_index,
            });
        };
        match &player_in {
            Some(incoming) => team[slot] = incoming.clone(),
            None => {
                team.remove(slot);
            }
        }

        let substitution = Substitution {
            player_out,
            player_in,
            team_index,
            timestamp: now,
        };
        self.substitutions.push(substitution.clone());
        Ok(substitution)
    }

    /// Start of the next fetch window, widened by `overlap` to catch late-reported matches.
    ///
    /// Never reaches back past the series creation time.
    pub fn fetch_since(&self, overlap: Duration) -> SystemTime {
        self.last_updated
            .checked_sub(overlap)
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .max(self.created_at)
    }

    /// Record a successful poll, clearing the failure streak.
    pub fn record_success(&mut self, now: SystemTime) {
        self.error_state.consecutive_errors = 0;
        self.error_state.backoff_minutes = 0;
        self.error_state.last_success_time = Some(now);
        self.last_updated = now;
    }

    /// Record a failed poll and compute the delay before the next attempt.
    pub fn record_failure(&mut self, message: String, config: &TrackerConfig) -> FailureOutcome {
        let errors = self.error_state.consecutive_errors.saturating_add(1);
        let backoff_minutes = config.backoff_minutes(errors);
        self.error_state.consecutive_errors = errors;
        self.error_state.backoff_minutes = backoff_minutes;
        self.error_state.last_error_message = Some(message);

        let pause = matches!(self.status, TrackerStatus::Active) && errors >= config.pause_threshold;
        let backoff = if matches!(self.status, TrackerStatus::Paused(PauseReason::Errors)) || pause {
            config.probe_delay(errors)
        } else {
            Duration::from_secs(backoff_minutes * 60)
        };

        FailureOutcome {
            consecutive_errors: errors,
            backoff,
            pause,
        }
    }

    /// Clear the failure streak after an operator resume.
    pub fn reset_errors(&mut self) {
        self.error_state.consecutive_errors = 0;
        self.error_state.backoff_minutes = 0;
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn identity() -> SeriesIdentity {
        SeriesIdentity::new("guild-1", "channel-7", 42)
    }

    pub fn roster_2v2() -> Roster {
        Roster::new(vec![
            vec!["alice".into(), "bob".into()],
            vec!["carol".into(), "dave".into()],
        ])
    }

    pub fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    /// A match between the 2v2 fixture rosters won by `winner`.
    pub fn series_match(id: &str, started: u64, winner: usize) -> MatchSummary {
        MatchSummary {
            id: id.into(),
            started_at: at(started),
            teams: vec![
                MatchTeam {
                    players: vec!["alice".into(), "bob".into()],
                    won: winner == 0,
                },
                MatchTeam {
                    players: vec!["carol".into(), "dave".into()],
                    won: winner == 1,
                },
            ],
            map: Some("Hard Rock Mine".into()),
            mode: Some("gemGrab".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn state(best_of: u32) -> TrackerState {
        TrackerState::new(identity(), roster_2v2(), best_of, at(0))
    }

    #[test]
    fn overlapping_fetches_never_duplicate_matches() {
        let mut state = state(5);
        let first = vec![series_match("m1", 10, 0), series_match("m2", 20, 1)];
        let second = vec![
            series_match("m2", 20, 1),
            series_match("m1", 10, 0),
            series_match("m3", 30, 0),
        ];

        for batch in [first, second.clone(), second] {
            for summary in state.unseen_matches(batch) {
                state.fold(summary);
            }
        }

        let ids: Vec<_> = state.enriched_matches.keys().cloned().collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(state.series_score, "2-1");
    }

    #[test]
    fn unseen_matches_orders_by_start_then_id() {
        let state = state(5);
        let ordered = state.unseen_matches(vec![
            series_match("b", 10, 0),
            series_match("c", 5, 0),
            series_match("a", 10, 1),
        ]);
        let ids: Vec<_> = ordered.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn unrelated_matches_are_not_folded() {
        let mut state = state(3);
        let mut solo = series_match("pub", 10, 0);
        solo.teams[1].players = vec!["stranger".into(), "other".into()];

        assert_eq!(state.attribute(&solo), Attribution::Unrelated);
        assert!(state.fold(solo).is_none());
        assert!(state.enriched_matches.is_empty());
    }

    #[test]
    fn winner_is_resolved_through_roster_when_sides_are_swapped() {
        let state = state(3);
        let mut swapped = series_match("m1", 10, 1);
        swapped.teams.swap(0, 1);
        assert_eq!(state.attribute(&swapped), Attribution::Counted(Some(1)));
    }

    #[test]
    fn series_is_decided_at_majority_and_stops_folding() {
        let mut state = state(3);
        state.fold(series_match("m1", 10, 0));
        state.fold(series_match("m2", 20, 1));
        assert!(!state.is_decided());
        state.fold(series_match("m3", 30, 0));
        assert_eq!(state.winner(), Some(0));
        assert_eq!(state.series_score, "2-1");

        assert!(state.fold(series_match("m4", 40, 1)).is_none());
        assert_eq!(state.enriched_matches.len(), 3);
    }

    #[test]
    fn fetch_window_stops_at_series_creation() {
        let mut state = TrackerState::new(identity(), roster_2v2(), 3, at(3600));
        assert_eq!(state.fetch_since(Duration::from_secs(600)), at(3600));

        state.record_success(at(7200));
        assert_eq!(state.fetch_since(Duration::from_secs(600)), at(6600));
    }

    #[test]
    fn matches_started_before_creation_are_not_counted() {
        let mut state = TrackerState::new(identity(), roster_2v2(), 3, at(3600));

        assert!(state.fold(series_match("old-1", 1800, 0)).is_none());
        assert!(state.fold(series_match("old-2", 2400, 1)).is_none());
        assert!(state.enriched_matches.is_empty());
        assert_eq!(state.series_score, "0-0");

        assert!(state.fold(series_match("m1", 3600, 0)).is_some());
        assert_eq!(state.series_score, "1-0");
    }

    #[test]
    fn substitution_swaps_player_and_logs() {
        let mut state = state(3);
        let request = SubstitutionRequest {
            player_out: "bob".into(),
            player_in: Some("erin".into()),
            team_index: 0,
        };
        state.apply_substitution(request, at(5)).unwrap();

        assert_eq!(state.roster.teams()[0], vec!["alice", "erin"]);
        assert_eq!(state.substitutions.len(), 1);
        assert_eq!(state.substitutions[0].timestamp, at(5));
    }

    #[test]
    fn substitution_for_unknown_player_leaves_roster_unchanged() {
        let mut state = state(3);
        let before = state.roster.clone();
        let err = state
            .apply_substitution(
                SubstitutionRequest {
                    player_out: "mallory".into(),
                    player_in: Some("erin".into()),
                    team_index: 1,
                },
                at(5),
            )
            .unwrap_err();

        assert!(matches!(err, SubstitutionError::PlayerNotOnTeam { .. }));
        assert_eq!(state.roster, before);
        assert!(state.substitutions.is_empty());
    }

    #[test]
    fn substitution_rejects_already_rostered_and_bad_team() {
        let mut state = state(3);
        let dup = SubstitutionRequest {
            player_out: "alice".into(),
            player_in: Some("carol".into()),
            team_index: 0,
        };
        assert_eq!(
            state.apply_substitution(dup, at(1)).unwrap_err(),
            SubstitutionError::AlreadyRostered("carol".into())
        );

        let bad_team = SubstitutionRequest {
            player_out: "alice".into(),
            player_in: None,
            team_index: 2,
        };
        assert_eq!(
            state.apply_substitution(bad_team, at(1)).unwrap_err(),
            SubstitutionError::UnknownTeam(2)
        );
    }

    #[test]
    fn removing_every_player_of_a_team_is_a_configuration_problem() {
        let mut state = state(3);
        for player in ["carol", "dave"] {
            state
                .apply_substitution(
                    SubstitutionRequest {
                        player_out: player.into(),
                        player_in: None,
                        team_index: 1,
                    },
                    at(1),
                )
                .unwrap();
        }
        assert_eq!(
            state.configuration_problem(),
            Some(SeriesConfigError::EmptyTeam(1))
        );
    }

    #[test]
    fn even_best_of_is_a_configuration_problem() {
        assert_eq!(
            state(4).configuration_problem(),
            Some(SeriesConfigError::InvalidBestOf(4))
        );
        assert_eq!(
            state(0).configuration_problem(),
            Some(SeriesConfigError::InvalidBestOf(0))
        );
        assert_eq!(state(7).configuration_problem(), None);
    }

    #[test]
    fn failures_grow_backoff_until_pause_then_success_resets() {
        let config = TrackerConfig::default();
        let mut state = state(3);
        let mut previous = 0;

        for attempt in 1..=config.pause_threshold {
            let outcome = state.record_failure(format!("boom {attempt}"), &config);
            assert_eq!(outcome.consecutive_errors, attempt);
            assert!(state.error_state.backoff_minutes >= previous);
            previous = state.error_state.backoff_minutes;
            assert_eq!(outcome.pause, attempt == config.pause_threshold);
        }

        state.record_success(at(100));
        assert_eq!(state.error_state.consecutive_errors, 0);
        assert_eq!(state.error_state.last_success_time, Some(at(100)));
        assert_eq!(state.last_updated, at(100));
    }
}
