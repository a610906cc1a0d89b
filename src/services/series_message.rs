//! Text rendering of the messages a tracker emits.

use std::fmt::Write;

use crate::{
    clients::message_sink::{MessageKind, SeriesMessage},
    state::{
        series::{SeriesConfigError, TrackerState},
        state_machine::{PauseReason, TrackerStatus},
    },
};

fn team_label(index: usize) -> String {
    format!("Team {}", index + 1)
}

/// Scoreboard shown in the persistent series message.
pub fn render_scoreboard(state: &TrackerState) -> String {
    let mut out = String::new();
    let [a, b] = state.wins();
    let _ = writeln!(out, "Series {} (best of {})", state.identity, state.best_of);
    let _ = writeln!(out, "Score: {} {a} - {b} {}", team_label(0), team_label(1));

    for (position, game) in state.enriched_matches.values().enumerate() {
        let map = game.map.as_deref().unwrap_or("unknown map");
        let result = game
            .winner
            .map(|winner| format!("{} won", team_label(winner)))
            .unwrap_or_else(|| "draw".to_owned());
        match game.mode.as_deref() {
            Some(mode) => {
                let _ = writeln!(out, "Game {}: {map} [{mode}] {result}", position + 1);
            }
            None => {
                let _ = writeln!(out, "Game {}: {map} {result}", position + 1);
            }
        }
    }

    for (index, players) in state.roster.teams().iter().enumerate() {
        let _ = writeln!(out, "{}: {}", team_label(index), players.join(", "));
    }
    for sub in &state.substitutions {
        let incoming = sub.player_in.as_deref().unwrap_or("nobody");
        let _ = writeln!(
            out,
            "Sub: {} -> {incoming} ({})",
            sub.player_out,
            team_label(sub.team_index)
        );
    }

    let status = match &state.status {
        TrackerStatus::Active => "tracking".to_owned(),
        TrackerStatus::Paused(PauseReason::Errors) => {
            "paused, retrying automatically".to_owned()
        }
        TrackerStatus::Paused(PauseReason::Configuration) => {
            "paused until the series is fixed".to_owned()
        }
        TrackerStatus::Stopped => "stopped".to_owned(),
        TrackerStatus::Completed => match state.winner() {
            Some(winner) => format!("{} wins {a}-{b}", team_label(winner)),
            None => "completed".to_owned(),
        },
    };
    let _ = write!(out, "Status: {status}");
    out
}

/// New standing after a match was folded in.
pub fn update(state: &TrackerState) -> SeriesMessage {
    SeriesMessage {
        kind: MessageKind::Update,
        content: render_scoreboard(state),
    }
}

/// Final summary once the series is decided.
pub fn completed(state: &TrackerState) -> SeriesMessage {
    SeriesMessage {
        kind: MessageKind::Completed,
        content: render_scoreboard(state),
    }
}

/// Notice posted once when repeated failures pause tracking.
pub fn paused(state: &TrackerState) -> SeriesMessage {
    let last = state
        .error_state
        .last_error_message
        .as_deref()
        .unwrap_or("unknown error");
    SeriesMessage {
        kind: MessageKind::Paused,
        content: format!(
            "Tracking of series {} is paused after {} consecutive errors (last: {last}). \
             It will resume automatically.",
            state.identity, state.error_state.consecutive_errors
        ),
    }
}

/// Notice explaining why a series cannot be tracked.
pub fn configuration_error(state: &TrackerState, problem: &SeriesConfigError) -> SeriesMessage {
    SeriesMessage {
        kind: MessageKind::ConfigurationError,
        content: format!(
            "Series {} cannot be tracked: {problem}. Fix it and resume tracking.",
            state.identity
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        series::{
            SubstitutionRequest,
            fixtures::{at, identity, roster_2v2, series_match},
        },
        state_machine::TrackerEvent,
    };

    #[test]
    fn scoreboard_lists_games_roster_and_subs() {
        let mut state = TrackerState::new(identity(), roster_2v2(), 3, at(0));
        state.fold(series_match("m1", 10, 0));
        let mut second = series_match("m2", 20, 1);
        second.mode = None;
        state.fold(second);
        state
            .apply_substitution(
                SubstitutionRequest {
                    player_out: "bob".into(),
                    player_in: Some("erin".into()),
                    team_index: 0,
                },
                at(30),
            )
            .unwrap();

        let text = render_scoreboard(&state);
        assert_eq!(
            text,
            "Series guild-1:channel-7:42 (best of 3)\n\
             Score: Team 1 1 - 1 Team 2\n\
             Game 1: Hard Rock Mine [gemGrab] Team 1 won\n\
             Game 2: Hard Rock Mine Team 2 won\n\
             Team 1: alice, erin\n\
             Team 2: carol, dave\n\
             Sub: bob -> erin (Team 1)\n\
             Status: tracking"
        );
    }

    #[test]
    fn completed_summary_names_the_winner() {
        let mut state = TrackerState::new(identity(), roster_2v2(), 3, at(0));
        state.fold(series_match("m1", 10, 1));
        state.fold(series_match("m2", 20, 1));
        state.transition(TrackerEvent::Complete).unwrap();

        let message = completed(&state);
        assert_eq!(message.kind, MessageKind::Completed);
        assert!(message.content.ends_with("Status: Team 2 wins 0-2"));
    }

    #[test]
    fn configuration_notice_is_specific() {
        let state = TrackerState::new(identity(), roster_2v2(), 4, at(0));
        let problem = state.configuration_problem().unwrap();
        let message = configuration_error(&state, &problem);
        assert_eq!(message.kind, MessageKind::ConfigurationError);
        assert!(message.content.contains("best-of value 4 is invalid"));
    }
}
