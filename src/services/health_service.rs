use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Ping the store and report the degraded flag alongside the live tracker count.
///
/// The flag itself only moves with the storage supervisor; a failed ping here is reported but
/// does not flip it.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let storage_reachable = match state.store().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };

    HealthResponse {
        status: if state.is_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        },
        storage_reachable,
        live_trackers: state.registry().list().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::test_support::test_app,
        state::series::{
            TrackerState,
            fixtures::{at, identity, roster_2v2},
        },
    };

    #[tokio::test(start_paused = true)]
    async fn follows_degraded_flag() {
        let app = test_app();
        let health = health_status(&app.state).await;
        assert_eq!(health.status, HealthStatus::Ok);
        assert!(health.storage_reachable);

        app.state.update_degraded(true);
        assert_eq!(
            health_status(&app.state).await.status,
            HealthStatus::Degraded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn counts_live_trackers() {
        let app = test_app();
        assert_eq!(health_status(&app.state).await.live_trackers, 0);

        app.state
            .registry()
            .start(TrackerState::new(identity(), roster_2v2(), 3, at(0)))
            .unwrap();
        assert_eq!(health_status(&app.state).await.live_trackers, 1);
    }

    #[test]
    fn status_serializes_lowercase() {
        let body = serde_json::to_value(HealthResponse {
            status: HealthStatus::Degraded,
            storage_reachable: false,
            live_trackers: 2,
        })
        .unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["live_trackers"], 2);
    }
}
