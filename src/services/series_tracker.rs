//! One task per tracked series: polling cadence, reconciliation, backoff and lifecycle.
//!
//! The task owns its [`TrackerState`]; everything else talks to it through
//! [`TrackerCommand`]s, a cancellation flag and a published status.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime},
};

use rand::{Rng, rng};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::{debug, info, warn};

use crate::{
    clients::message_sink::{MessageSink, SeriesMessage},
    config::TrackerConfig,
    dao::tracker_repository::TrackerRepository,
    services::{
        series_message,
        stats_gateway::{FailureKind, GatewayError, StatsGateway},
    },
    state::{
        series::{MatchId, MatchSummary, SeriesConfigError, SubstitutionRequest, TrackerState},
        state_machine::{PauseReason, TrackerEvent, TrackerStatus},
    },
};

/// Requests handled by a running tracker, in arrival order.
#[derive(Debug)]
pub enum TrackerCommand {
    /// Roster change from the queue integration. Invalid requests are logged and dropped.
    Substitute(SubstitutionRequest),
    /// A match just ended; reconcile now instead of waiting for the next tick.
    MatchCompleted { match_id: Option<MatchId> },
    /// Operator resume of a paused tracker.
    Resume {
        reply: oneshot::Sender<Result<(), ResumeError>>,
    },
    /// Copy of the current in-memory state.
    Snapshot { reply: oneshot::Sender<TrackerState> },
}

/// Why an operator resume was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeError {
    #[error("tracker is not paused")]
    NotPaused,
    #[error("series is still misconfigured: {0}")]
    Configuration(#[from] SeriesConfigError),
}

/// Process-wide collaborators handed to every tracker.
#[derive(Clone)]
pub struct TrackerDeps {
    pub gateway: StatsGateway,
    pub repository: TrackerRepository,
    pub sink: Arc<dyn MessageSink>,
    pub config: TrackerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    OutOfCycle,
}

/// Timer-driven state machine for a single series.
pub struct SeriesTracker {
    state: TrackerState,
    deps: TrackerDeps,
    commands: mpsc::Receiver<TrackerCommand>,
    cancel: watch::Receiver<bool>,
    status: watch::Sender<TrackerStatus>,
    next_poll: Option<Instant>,
}

impl SeriesTracker {
    pub fn new(
        state: TrackerState,
        deps: TrackerDeps,
        commands: mpsc::Receiver<TrackerCommand>,
        cancel: watch::Receiver<bool>,
        status: watch::Sender<TrackerStatus>,
    ) -> Self {
        Self {
            state,
            deps,
            commands,
            cancel,
            status,
            next_poll: None,
        }
    }

    /// Drive the tracker until it reaches a terminal status or its handle is dropped.
    pub async fn run(mut self) -> TrackerState {
        self.publish();
        self.persist().await;

        if let Some(problem) = self.state.configuration_problem() {
            self.pause_for_configuration(problem).await;
        } else if !self.is_configuration_paused() {
            let due = self
                .state
                .next_check_at
                .duration_since(SystemTime::now())
                .unwrap_or_default();
            self.schedule(due + self.stagger());
        }

        while !self.state.is_terminal() {
            let next_poll = self.next_poll;
            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => self.stop().await,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("tracker handle dropped; exiting");
                        break;
                    }
                },
                _ = sleep_until(next_poll.unwrap_or_else(Instant::now)), if next_poll.is_some() => {
                    self.next_poll = None;
                    self.poll(Trigger::Scheduled).await;
                }
            }
        }

        self.state
    }

    async fn handle(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Substitute(request) => self.substitute(request).await,
            TrackerCommand::MatchCompleted { match_id } => self.match_completed(match_id).await,
            TrackerCommand::Resume { reply } => {
                let result = self.resume().await;
                let _ = reply.send(result);
            }
            TrackerCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
        }
    }

    async fn substitute(&mut self, request: SubstitutionRequest) {
        match self.state.apply_substitution(request, SystemTime::now()) {
            Ok(substitution) => {
                info!(
                    player_out = %substitution.player_out,
                    player_in = ?substitution.player_in,
                    team = substitution.team_index,
                    "applied substitution"
                );
                match self.state.configuration_problem() {
                    Some(problem) => self.pause_for_configuration(problem).await,
                    None => {
                        self.emit(series_message::update(&self.state)).await;
                        self.persist().await;
                    }
                }
            }
            Err(err) => warn!(error = %err, "ignoring substitution"),
        }
    }

    async fn match_completed(&mut self, match_id: Option<MatchId>) {
        if self.is_configuration_paused() {
            debug!("ignoring match completion while the series is misconfigured");
            return;
        }

        let Some(match_id) = match_id else {
            self.poll(Trigger::OutOfCycle).await;
            return;
        };

        let fetch = self.deps.gateway.fetch_match(&match_id);
        let Some(result) = unless_cancelled(&mut self.cancel, fetch).await else {
            info!(match_id = %match_id, "stop requested during match fetch; discarding result");
            return;
        };
        match result {
            Ok(summary) => {
                if self.merge(vec![summary]).await == 0 {
                    debug!(match_id = %match_id, "completed match does not change the series");
                    return;
                }
                if self.state.is_decided() {
                    self.complete().await;
                } else {
                    self.persist().await;
                }
            }
            Err(err) => warn!(match_id = %match_id, error = %err, "out-of-cycle match fetch failed"),
        }
    }

    async fn resume(&mut self) -> Result<(), ResumeError> {
        match self.state.status {
            TrackerStatus::Paused(PauseReason::Configuration) => {
                if let Some(problem) = self.state.configuration_problem() {
                    return Err(problem.into());
                }
            }
            TrackerStatus::Paused(PauseReason::Errors) => {}
            _ => return Err(ResumeError::NotPaused),
        }

        info!("tracking resumed by operator");
        self.apply(TrackerEvent::Resume);
        self.state.reset_errors();
        self.schedule(Duration::ZERO);
        self.persist().await;
        Ok(())
    }

    async fn poll(&mut self, trigger: Trigger) {
        if let Some(problem) = self.state.configuration_problem() {
            self.pause_for_configuration(problem).await;
            return;
        }

        let players = self.state.roster.players();
        let since = self.state.fetch_since(self.deps.config.fetch_overlap);
        let fetch = self.deps.gateway.fetch_recent_matches(&players, since);
        let Some(result) = unless_cancelled(&mut self.cancel, fetch).await else {
            info!("stop requested during poll; discarding result");
            return;
        };

        match result {
            Ok(matches) => self.poll_succeeded(matches).await,
            Err(err) if trigger == Trigger::OutOfCycle => {
                warn!(error = %err, "out-of-cycle poll failed; keeping schedule");
            }
            Err(err) => self.poll_failed(err).await,
        }
    }

    async fn poll_succeeded(&mut self, matches: Vec<MatchSummary>) {
        let now = SystemTime::now();
        if self.state.status == TrackerStatus::Paused(PauseReason::Errors) {
            info!(
                consecutive_errors = self.state.error_state.consecutive_errors,
                "probe succeeded; resuming"
            );
            self.apply(TrackerEvent::Resume);
        }

        let folded = self.merge(matches).await;
        self.state.record_success(now);
        debug!(folded, score = %self.state.series_score, "poll succeeded");

        if self.state.is_decided() {
            self.complete().await;
            return;
        }
        self.schedule(self.deps.config.poll_interval);
        self.persist().await;
    }

    async fn poll_failed(&mut self, err: GatewayError) {
        match err.kind() {
            FailureKind::NotFound => {
                warn!(error = %err, "stats provider found nothing to poll");
                self.state.error_state.last_error_message = Some(err.to_string());
                self.schedule(self.regular_delay());
            }
            FailureKind::Auth | FailureKind::Transient => {
                let outcome = self.state.record_failure(err.to_string(), &self.deps.config);
                warn!(
                    error = %err,
                    consecutive_errors = outcome.consecutive_errors,
                    retry_in_secs = outcome.backoff.as_secs(),
                    "poll failed"
                );
                if outcome.pause {
                    warn!("pausing after repeated poll failures");
                    self.apply(TrackerEvent::Pause(PauseReason::Errors));
                    self.emit(series_message::paused(&self.state)).await;
                }
                self.schedule(outcome.backoff);
            }
        }
        self.persist().await;
    }

    /// Fold unseen matches in start-time order, emitting one update per counted match.
    async fn merge(&mut self, matches: Vec<MatchSummary>) -> usize {
        let mut folded = 0;
        for summary in self.state.unseen_matches(matches) {
            let Some(enriched) = self.state.fold(summary) else {
                continue;
            };
            folded += 1;
            info!(
                match_id = %enriched.id,
                score = %self.state.series_score,
                "folded match into series"
            );
            self.emit(series_message::update(&self.state)).await;
        }
        folded
    }

    async fn pause_for_configuration(&mut self, problem: SeriesConfigError) {
        self.next_poll = None;
        if !self.is_configuration_paused() {
            warn!(problem = %problem, "series configuration is unusable; pausing");
            self.apply(TrackerEvent::Pause(PauseReason::Configuration));
            self.emit(series_message::configuration_error(&self.state, &problem))
                .await;
        }
        self.persist().await;
    }

    async fn complete(&mut self) {
        self.next_poll = None;
        if !self.transition(TrackerEvent::Complete) {
            return;
        }
        info!(score = %self.state.series_score, "series decided");
        self.emit(series_message::completed(&self.state)).await;
        self.archive().await;
        self.publish();
    }

    async fn stop(&mut self) {
        self.next_poll = None;
        if !self.transition(TrackerEvent::Stop) {
            return;
        }
        info!("tracking stopped");
        self.archive().await;
        self.publish();
    }

    fn is_configuration_paused(&self) -> bool {
        self.state.status == TrackerStatus::Paused(PauseReason::Configuration)
    }

    /// Delay before the next poll when nothing went wrong.
    fn regular_delay(&self) -> Duration {
        match self.state.status {
            TrackerStatus::Paused(PauseReason::Errors) => self
                .deps
                .config
                .probe_delay(self.state.error_state.consecutive_errors),
            _ => self.deps.config.poll_interval,
        }
    }

    fn stagger(&self) -> Duration {
        let max_ms = self.deps.config.initial_stagger.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(0..=max_ms))
    }

    fn schedule(&mut self, delay: Duration) {
        self.next_poll = Some(Instant::now() + delay);
        self.state.next_check_at = SystemTime::now() + delay;
    }

    fn transition(&mut self, event: TrackerEvent) -> bool {
        match self.state.transition(event) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "ignoring invalid lifecycle event");
                false
            }
        }
    }

    fn apply(&mut self, event: TrackerEvent) {
        if self.transition(event) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.state.status.clone());
    }

    async fn emit(&self, message: SeriesMessage) {
        let kind = message.kind;
        if let Err(err) = self
            .deps
            .sink
            .post_or_update_series_message(&self.state.identity, message)
            .await
        {
            warn!(error = %err, ?kind, "failed to deliver series message");
        }
    }

    async fn persist(&self) {
        if let Err(err) = self.deps.repository.save(&self.state).await {
            warn!(error = %err, "failed to persist tracker snapshot; keeping in-memory state");
        }
    }

    async fn archive(&self) {
        if let Err(err) = self.deps.repository.archive(&self.state).await {
            warn!(error = %err, "failed to archive tracker snapshot");
            // A terminal live snapshot is still skipped on restore.
            self.persist().await;
        }
    }
}

/// Resolves once a stop is requested. Never resolves if the requester is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run `work` unless a stop arrives first, in which case its result is dropped.
async fn unless_cancelled<F>(cancel: &mut watch::Receiver<bool>, work: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancelled(cancel) => None,
        output = work => Some(output),
    }
}
