//! Process-wide map from series identity to its running tracker.

use std::sync::{Arc, Weak};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::{
    dao::{storage::StorageResult, tracker_repository::TrackerRepository},
    services::series_tracker::{ResumeError, SeriesTracker, TrackerCommand, TrackerDeps},
    state::{
        series::{MatchId, SeriesIdentity, SubstitutionRequest, TrackerState},
        state_machine::TrackerStatus,
    },
};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("series {0} is already being tracked")]
    AlreadyActive(SeriesIdentity),
    #[error("no active tracker for series {0}")]
    NotFound(SeriesIdentity),
    /// The tracker finished between lookup and delivery.
    #[error("tracker for series {0} is no longer running")]
    Closed(SeriesIdentity),
    #[error(transparent)]
    Resume(#[from] ResumeError),
}

/// Cloneable handle to a running tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    identity: SeriesIdentity,
    run_id: Uuid,
    commands: mpsc::Sender<TrackerCommand>,
    cancel: Arc<watch::Sender<bool>>,
    status: watch::Receiver<TrackerStatus>,
}

impl TrackerHandle {
    pub fn identity(&self) -> &SeriesIdentity {
        &self.identity
    }

    /// Last status published by the tracker.
    pub fn status(&self) -> TrackerStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn status_watcher(&self) -> watch::Receiver<TrackerStatus> {
        self.status.clone()
    }

    pub async fn substitute(&self, request: SubstitutionRequest) -> Result<(), RegistryError> {
        self.send(TrackerCommand::Substitute(request)).await
    }

    pub async fn match_completed(&self, match_id: Option<MatchId>) -> Result<(), RegistryError> {
        self.send(TrackerCommand::MatchCompleted { match_id }).await
    }

    pub async fn resume(&self) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Resume { reply }).await?;
        rx.await.map_err(|_| self.closed())??;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<TrackerState, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    async fn send(&self, command: TrackerCommand) -> Result<(), RegistryError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.closed())
    }

    fn closed(&self) -> RegistryError {
        RegistryError::Closed(self.identity.clone())
    }
}

/// Creates, looks up and removes series trackers. At most one live tracker exists per identity.
#[derive(Clone)]
pub struct TrackerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    trackers: DashMap<SeriesIdentity, TrackerHandle>,
    deps: TrackerDeps,
}

impl TrackerRegistry {
    pub fn new(deps: TrackerDeps) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                trackers: DashMap::new(),
                deps,
            }),
        }
    }

    /// Spawn a tracker for `state`. A finished tracker under the same identity is replaced.
    pub fn start(&self, state: TrackerState) -> Result<TrackerHandle, RegistryError> {
        match self.inner.trackers.entry(state.identity.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().status().is_terminal() {
                    return Err(RegistryError::AlreadyActive(state.identity));
                }
                let handle = self.spawn(state);
                occupied.insert(handle.clone());
                Ok(handle)
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn(state);
                vacant.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Stop a live tracker and wait until it has recorded the stop.
    pub async fn stop(&self, identity: &SeriesIdentity) -> Result<TrackerStatus, RegistryError> {
        let handle = self.live(identity)?;

        handle.cancel.send_replace(true);
        let mut status = handle.status.clone();
        let _ = status.wait_for(TrackerStatus::is_terminal).await;
        let final_status = status.borrow().clone();

        self.inner
            .trackers
            .remove_if(identity, |_, current| current.run_id == handle.run_id);
        Ok(final_status)
    }

    pub fn get(&self, identity: &SeriesIdentity) -> Option<TrackerHandle> {
        self.inner
            .trackers
            .get(identity)
            .map(|entry| entry.value().clone())
    }

    /// Handle of a tracker that has not reached a terminal status yet.
    pub fn live(&self, identity: &SeriesIdentity) -> Result<TrackerHandle, RegistryError> {
        self.get(identity)
            .filter(|handle| !handle.status().is_terminal())
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))
    }

    /// Snapshot store shared by the trackers.
    pub fn repository(&self) -> &TrackerRepository {
        &self.inner.deps.repository
    }

    /// Handles of every registered tracker, ordered by identity.
    pub fn list(&self) -> Vec<TrackerHandle> {
        let mut handles: Vec<_> = self
            .inner
            .trackers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        handles.sort_by_key(|handle| handle.identity.to_string());
        handles
    }

    /// Restart every tracker whose snapshot was left live by a previous process.
    pub async fn restore(&self) -> StorageResult<usize> {
        let states = self.inner.deps.repository.list_active().await?;
        let mut restored = 0;
        for state in states {
            let identity = state.identity.clone();
            match self.start(state) {
                Ok(_) => restored += 1,
                Err(err) => warn!(series = %identity, error = %err, "skipping tracker restore"),
            }
        }
        info!(restored, "restored persisted trackers");
        Ok(restored)
    }

    fn spawn(&self, state: TrackerState) -> TrackerHandle {
        let identity = state.identity.clone();
        let run_id = Uuid::new_v4();
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (cancel, cancel_rx) = watch::channel(false);
        let (status_tx, status) = watch::channel(state.status.clone());

        let tracker = SeriesTracker::new(
            state,
            self.inner.deps.clone(),
            command_rx,
            cancel_rx,
            status_tx,
        );
        let registry = Arc::downgrade(&self.inner);
        let span = info_span!("tracker", series = %identity, run = %run_id);
        let key = identity.clone();
        tokio::spawn(
            async move {
                let final_state = tracker.run().await;
                info!(status = ?final_state.status, "tracker exited");
                deregister(&registry, &key, run_id);
            }
            .instrument(span),
        );

        TrackerHandle {
            identity,
            run_id,
            commands,
            cancel: Arc::new(cancel),
            status,
        }
    }
}

fn deregister(registry: &Weak<RegistryInner>, identity: &SeriesIdentity, run_id: Uuid) {
    if let Some(inner) = registry.upgrade() {
        inner
            .trackers
            .remove_if(identity, |_, current| current.run_id == run_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::{
        clients::message_sink::MessageKind,
        config::TrackerConfig,
        dao::kv_store::MemoryStore,
        services::{
            stats_gateway::tests::gateway_with,
            test_support::{FakeIdentity, FakeStats, RecordingSink, unthrottled},
        },
        state::{
            series::fixtures::{at, identity, roster_2v2, series_match},
            state_machine::{PauseReason, TrackerEvent},
        },
    };

    struct Fixture {
        registry: TrackerRegistry,
        repository: TrackerRepository,
        stats: Arc<FakeStats>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let stats = FakeStats::new();
        let sink = RecordingSink::new();
        let repository =
            TrackerRepository::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        let deps = TrackerDeps {
            gateway: gateway_with(stats.clone(), FakeIdentity::new(), unthrottled()),
            repository: repository.clone(),
            sink: sink.clone(),
            config: TrackerConfig {
                initial_stagger: Duration::ZERO,
                ..TrackerConfig::default()
            },
        };
        Fixture {
            registry: TrackerRegistry::new(deps),
            repository,
            stats,
            sink,
        }
    }

    fn new_series() -> TrackerState {
        TrackerState::new(identity(), roster_2v2(), 3, at(0))
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_for_live_identity_is_rejected() {
        let f = fixture();
        f.registry.start(new_series()).unwrap();

        let err = f.registry.start(new_series()).err().unwrap();
        assert_eq!(err, RegistryError::AlreadyActive(identity()));
        assert_eq!(f.registry.list().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_removes_tracker_and_archives_it() {
        let f = fixture();
        f.registry.start(new_series()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = f.registry.stop(&identity()).await.unwrap();
        assert_eq!(status, TrackerStatus::Stopped);
        assert!(f.registry.get(&identity()).is_none());
        assert_eq!(
            f.repository
                .load_archived(&identity())
                .await
                .unwrap()
                .map(|state| state.status),
            Some(TrackerStatus::Stopped)
        );

        assert_eq!(
            f.registry.stop(&identity()).await.unwrap_err(),
            RegistryError::NotFound(identity())
        );
        f.registry.start(new_series()).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_of_unknown_series_is_not_found() {
        let f = fixture();
        let other = SeriesIdentity::new("g", "c", 9);
        assert_eq!(
            f.registry.stop(&other).await.unwrap_err(),
            RegistryError::NotFound(other)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_tracker_deregisters_itself() {
        let f = fixture();
        f.stats
            .push_matches(vec![series_match("m1", 10, 1), series_match("m2", 20, 1)]);
        let handle = f.registry.start(new_series()).unwrap();

        let mut status = handle.status.clone();
        status.wait_for(TrackerStatus::is_terminal).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(f.registry.get(&identity()).is_none());
        assert_eq!(f.sink.count(MessageKind::Completed), 1);
        assert!(matches!(
            handle.snapshot().await,
            Err(RegistryError::Closed(_))
        ));
        f.registry.start(new_series()).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn handle_commands_reach_the_tracker() {
        let f = fixture();
        let handle = f.registry.start(new_series()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle
            .substitute(SubstitutionRequest {
                player_out: "alice".into(),
                player_in: Some("erin".into()),
                team_index: 0,
            })
            .await
            .unwrap();
        let state = handle.snapshot().await.unwrap();
        assert_eq!(state.roster.teams()[0], vec!["erin", "bob"]);

        assert_eq!(
            handle.resume().await.unwrap_err(),
            RegistryError::Resume(ResumeError::NotPaused)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restore_restarts_persisted_live_trackers() {
        let f = fixture();
        let mut paused = TrackerState::new(
            SeriesIdentity::new("g", "c", 2),
            roster_2v2(),
            3,
            SystemTime::now(),
        );
        paused
            .transition(TrackerEvent::Pause(PauseReason::Errors))
            .unwrap();
        f.repository.save(&new_series()).await.unwrap();
        f.repository.save(&paused).await.unwrap();

        assert_eq!(f.registry.restore().await.unwrap(), 2);
        let identities: Vec<_> = f
            .registry
            .list()
            .iter()
            .map(|handle| handle.identity().to_string())
            .collect();
        assert_eq!(identities, vec!["g:c:2", "guild-1:channel-7:42"]);
        assert_eq!(f.registry.restore().await.unwrap(), 0);
    }
}
