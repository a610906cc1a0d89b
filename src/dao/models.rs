use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::state::series::TrackerState;

/// Current layout of [`TrackerSnapshotEntity`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// Stats provider credential shared between sibling processes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenEntity {
    /// Bearer token issued by the identity provider.
    pub token: String,
    /// Instant after which the provider rejects the token.
    pub expires_at: SystemTime,
}

/// Persisted snapshot of one tracker, written after every state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackerSnapshotEntity {
    /// Layout version, bumped on incompatible changes.
    pub version: u32,
    /// Wall-clock time of the write.
    pub saved_at: SystemTime,
    pub state: TrackerState,
}

impl TrackerSnapshotEntity {
    pub fn new(state: TrackerState, saved_at: SystemTime) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            state,
        }
    }
}
