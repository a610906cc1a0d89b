use std::{sync::Arc, time::Duration, time::SystemTime};

use tracing::warn;

use crate::{
    dao::{
        kv_store::{KeyValueStore, get_json, put_json},
        models::TrackerSnapshotEntity,
        storage::StorageResult,
    },
    state::series::{SeriesIdentity, TrackerState},
};

const ACTIVE_PREFIX: &str = "tracker:";
const ARCHIVE_PREFIX: &str = "tracker-archive:";

/// Snapshot persistence for series trackers on top of the key-value store.
#[derive(Clone)]
pub struct TrackerRepository {
    store: Arc<dyn KeyValueStore>,
    archive_ttl: Duration,
}

impl TrackerRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, archive_ttl: Duration) -> Self {
        Self { store, archive_ttl }
    }

    pub fn active_key(identity: &SeriesIdentity) -> String {
        format!("{ACTIVE_PREFIX}{identity}")
    }

    pub fn archive_key(identity: &SeriesIdentity) -> String {
        format!("{ARCHIVE_PREFIX}{identity}")
    }

    /// Overwrite the live snapshot of a tracker.
    pub async fn save(&self, state: &TrackerState) -> StorageResult<()> {
        let entity = TrackerSnapshotEntity::new(state.clone(), SystemTime::now());
        put_json(
            self.store.as_ref(),
            &Self::active_key(&state.identity),
            &entity,
            None,
        )
        .await
    }

    pub async fn load(&self, identity: &SeriesIdentity) -> StorageResult<Option<TrackerState>> {
        let entity =
            get_json::<TrackerSnapshotEntity>(self.store.as_ref(), &Self::active_key(identity))
                .await?;
        Ok(entity.map(|entity| entity.state))
    }

    /// Load a snapshot kept after its tracker reached a terminal status.
    pub async fn load_archived(
        &self,
        identity: &SeriesIdentity,
    ) -> StorageResult<Option<TrackerState>> {
        let entity =
            get_json::<TrackerSnapshotEntity>(self.store.as_ref(), &Self::archive_key(identity))
                .await?;
        Ok(entity.map(|entity| entity.state))
    }

    /// Move a terminal snapshot out of the live key space; it expires after the archive TTL.
    pub async fn archive(&self, state: &TrackerState) -> StorageResult<()> {
        let entity = TrackerSnapshotEntity::new(state.clone(), SystemTime::now());
        put_json(
            self.store.as_ref(),
            &Self::archive_key(&state.identity),
            &entity,
            Some(self.archive_ttl),
        )
        .await?;
        self.store.delete(&Self::active_key(&state.identity)).await
    }

    /// Every persisted tracker that can still make progress.
    ///
    /// Unreadable snapshots are skipped so one bad record cannot block the others.
    pub async fn list_active(&self) -> StorageResult<Vec<TrackerState>> {
        let keys = self.store.list_keys(ACTIVE_PREFIX).await?;
        let mut states = Vec::with_capacity(keys.len());
        for key in keys {
            match get_json::<TrackerSnapshotEntity>(self.store.as_ref(), &key).await {
                Ok(Some(entity)) if !entity.state.is_terminal() => states.push(entity.state),
                Ok(_) => {}
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable tracker snapshot"),
            }
        }
        Ok(states)
    }
}
