//! Scripted collaborators shared by the service tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::{
    clients::{
        identity::{AccessToken, IdentityError, IdentityProvider},
        message_sink::{MessageKind, MessageSink, SeriesMessage, SinkError},
        stats_provider::{ProviderError, StatsProvider},
    },
    config::{RateLimitConfig, TrackerConfig},
    dao::{kv_store::MemoryStore, tracker_repository::TrackerRepository},
    services::{
        series_tracker::TrackerDeps, stats_gateway::tests::gateway_with,
        tracker_registry::TrackerRegistry,
    },
    state::{
        AccessSecrets, AppState, FEED_CAPACITY, SharedState, SseHub,
        series::{MatchSummary, PlayerId, SeriesIdentity},
    },
};

/// Identity provider issuing `token-1`, `token-2`, ... unless a scripted outcome is queued.
pub struct FakeIdentity {
    calls: AtomicUsize,
    lifetime: Duration,
    delay: Duration,
    script: Mutex<VecDeque<Result<AccessToken, IdentityError>>>,
}

impl FakeIdentity {
    pub fn new() -> Arc<Self> {
        Self::with_lifetime(Duration::from_secs(3600))
    }

    pub fn with_lifetime(lifetime: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            lifetime,
            delay: Duration::from_millis(50),
            script: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push(&self, outcome: Result<AccessToken, IdentityError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for FakeIdentity {
    fn exchange_for_token(&self) -> BoxFuture<'static, Result<AccessToken, IdentityError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(AccessToken {
                token: format!("token-{call}"),
                expires_at: SystemTime::now() + self.lifetime,
            })
        });
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            outcome
        })
    }
}

/// One recorded call to [`FakeStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsCall {
    Match { token: String, id: String },
    Players { token: String, players: Vec<PlayerId>, since: SystemTime },
}

type StatsOutcome = Result<Vec<MatchSummary>, ProviderError>;

/// Stats provider replaying queued outcomes; an empty queue answers with no matches.
#[derive(Default)]
pub struct FakeStats {
    script: Mutex<VecDeque<StatsOutcome>>,
    calls: Mutex<Vec<StatsCall>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, outcome: StatsOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn push_matches(&self, matches: Vec<MatchSummary>) {
        self.push(Ok(matches));
    }

    pub fn push_failures(&self, error: ProviderError, count: usize) {
        for _ in 0..count {
            self.push(Err(error.clone()));
        }
    }

    /// Hold every subsequent call until the returned notifier fires.
    pub fn hold_calls(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn calls(&self) -> Vec<StatsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn respond(&self, call: StatsCall) -> BoxFuture<'static, StatsOutcome> {
        self.calls.lock().unwrap().push(call);
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
        let gate = self.gate.lock().unwrap().clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            outcome
        })
    }
}

impl StatsProvider for FakeStats {
    fn fetch_match(
        &self,
        token: &str,
        match_id: &str,
    ) -> BoxFuture<'static, Result<MatchSummary, ProviderError>> {
        let response = self.respond(StatsCall::Match {
            token: token.to_owned(),
            id: match_id.to_owned(),
        });
        let id = match_id.to_owned();
        Box::pin(async move {
            response
                .await?
                .into_iter()
                .next()
                .ok_or(ProviderError::NotFound(format!("match {id}")))
        })
    }

    fn fetch_matches_for_players(
        &self,
        token: &str,
        players: &[PlayerId],
        since: SystemTime,
    ) -> BoxFuture<'static, Result<Vec<MatchSummary>, ProviderError>> {
        self.respond(StatsCall::Players {
            token: token.to_owned(),
            players: players.to_vec(),
            since,
        })
    }
}

/// Sink keeping every delivered message in order.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(SeriesIdentity, SeriesMessage)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<SeriesMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.messages().iter().map(|message| message.kind).collect()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl MessageSink for RecordingSink {
    fn post_or_update_series_message(
        &self,
        identity: &SeriesIdentity,
        message: SeriesMessage,
    ) -> BoxFuture<'static, Result<(), SinkError>> {
        self.messages
            .lock()
            .unwrap()
            .push((identity.clone(), message));
        Box::pin(async { Ok(()) })
    }
}

/// Application state wired to in-memory collaborators.
/// Ceiling loose enough that pacing never shows up in tracker timings.
pub fn unthrottled() -> RateLimitConfig {
    RateLimitConfig {
        max_calls: 1000,
        window: Duration::from_secs(1),
    }
}

pub struct TestApp {
    pub state: SharedState,
    pub stats: Arc<FakeStats>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryStore>,
}

pub fn test_app() -> TestApp {
    let stats = FakeStats::new();
    let sink = RecordingSink::new();
    let store = Arc::new(MemoryStore::new());
    let deps = TrackerDeps {
        gateway: gateway_with(stats.clone(), FakeIdentity::new(), unthrottled()),
        repository: TrackerRepository::new(store.clone(), Duration::from_secs(3600)),
        sink: sink.clone(),
        config: TrackerConfig {
            initial_stagger: Duration::ZERO,
            ..TrackerConfig::default()
        },
    };
    let state = AppState::new(
        TrackerRegistry::new(deps),
        store.clone(),
        SseHub::new(FEED_CAPACITY),
        AccessSecrets {
            webhook_secret: "hook-secret".into(),
            admin_token: "admin-token".into(),
        },
    );
    TestApp {
        state,
        stats,
        sink,
        store,
    }
}
