pub mod series;
mod sse;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crate::{
    dao::kv_store::KeyValueStore,
    dto::sse::{SYSTEM_STATUS_EVENT, ServerEvent, SystemStatus},
    services::tracker_registry::TrackerRegistry,
};

pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;

/// Capacity of the series feed broadcast channel.
pub const FEED_CAPACITY: usize = 64;

/// Shared secrets guarding the inbound HTTP surfaces.
#[derive(Clone)]
pub struct AccessSecrets {
    /// Expected `x-webhook-secret` value on queue webhooks.
    pub webhook_secret: String,
    /// Expected `x-admin-token` value on admin routes.
    pub admin_token: String,
}

/// Central application state: tracker registry, storage handle and the series feed.
pub struct AppState {
    registry: TrackerRegistry,
    store: Arc<dyn KeyValueStore>,
    feed: SseHub,
    degraded: watch::Sender<bool>,
    secrets: AccessSecrets,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        registry: TrackerRegistry,
        store: Arc<dyn KeyValueStore>,
        feed: SseHub,
        secrets: AccessSecrets,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            registry,
            store,
            feed,
            degraded: degraded_tx,
            secrets,
        })
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Broadcast hub behind `/sse/series`.
    pub fn feed(&self) -> &SseHub {
        &self.feed
    }

    pub fn secrets(&self) -> &AccessSecrets {
        &self.secrets
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag and announce the change on the feed.
    pub fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
        if !changed {
            return;
        }

        match ServerEvent::json(
            Some(SYSTEM_STATUS_EVENT.to_string()),
            &SystemStatus { degraded: value },
        ) {
            Ok(event) => self.feed.broadcast(event),
            Err(err) => warn!(error = %err, "failed to encode system status event"),
        }
    }
}
