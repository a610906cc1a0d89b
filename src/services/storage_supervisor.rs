use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::state::SharedState;

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watch the storage backend and keep the shared state in degraded mode while it is unreachable.
///
/// Trackers keep running while degraded; their snapshot writes fail and are retried on the
/// next change.
pub async fn run(state: SharedState) {
    let store = state.store().clone();

    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed; entering degraded mode");
                state.update_degraded(true);

                let mut attempt: u32 = 0;
                let mut delay = INITIAL_DELAY;
                loop {
                    sleep(delay).await;
                    match store.try_reconnect().await {
                        Ok(()) => {
                            info!(attempt, "storage reconnection succeeded");
                            state.update_degraded(false);
                            break;
                        }
                        Err(reconnect_err) => {
                            warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                            attempt += 1;
                            delay = (delay * 2).min(MAX_DELAY);
                        }
                    }
                }
            }
        }
    }
}
