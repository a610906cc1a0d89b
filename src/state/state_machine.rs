use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle states of a series tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TrackerStatus {
    /// Polling on the regular cadence.
    Active,
    /// Polling suspended; see [`PauseReason`] for how it resumes.
    Paused(PauseReason),
    /// Stopped by an operator. Terminal.
    Stopped,
    /// The series has been decided. Terminal.
    Completed,
}

/// Represents why a tracker entered the paused state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Too many consecutive poll failures; low-frequency probes resume it automatically.
    Errors,
    /// The roster or best-of value is unusable; only an operator can resume it.
    Configuration,
}

/// Events that can be applied to the tracker lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Suspend polling.
    Pause(PauseReason),
    /// Return to regular polling, either after a successful probe or an operator command.
    Resume,
    /// The series has been decided.
    Complete,
    /// Operator-issued stop.
    Stop,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The status the tracker was in when the invalid event was received.
    pub from: TrackerStatus,
    /// The event that cannot be applied from this status.
    pub event: TrackerEvent,
}

impl TrackerStatus {
    /// Whether no further transition can leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackerStatus::Stopped | TrackerStatus::Completed)
    }

    /// Compute the status reached by applying `event`, if the transition is valid.
    pub fn next(&self, event: TrackerEvent) -> Result<TrackerStatus, InvalidTransition> {
        let next = match (self, event) {
            (TrackerStatus::Active, TrackerEvent::Pause(reason)) => TrackerStatus::Paused(reason),
            // A broken roster outranks an error pause: probes must stop.
            (
                TrackerStatus::Paused(PauseReason::Errors),
                TrackerEvent::Pause(PauseReason::Configuration),
            ) => TrackerStatus::Paused(PauseReason::Configuration),
            (TrackerStatus::Paused(_), TrackerEvent::Resume) => TrackerStatus::Active,
            (TrackerStatus::Active | TrackerStatus::Paused(_), TrackerEvent::Complete) => {
                TrackerStatus::Completed
            }
            (TrackerStatus::Active | TrackerStatus::Paused(_), TrackerEvent::Stop) => {
                TrackerStatus::Stopped
            }
            (from, event) => {
                return Err(InvalidTransition {
                    from: from.clone(),
                    event,
                });
            }
        };

        Ok(next)
    }
}
