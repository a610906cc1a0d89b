use std::{future::Future, num::NonZeroU32, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::Clock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use tokio::{sync::Mutex, time::sleep};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Governor clock reading tokio's timer, so pacing follows the runtime (and paused test time).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Admission control shared by every stats provider call.
///
/// Grants are spaced `window / max_calls` apart, so no window of `window` length ever holds
/// more than `max_calls` of them. Waiters queue on a fair mutex: slots are handed out in call
/// order and bursts are paced instead of rejected.
pub struct CallRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>,
    queue: Mutex<()>,
}

impl CallRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_calls = u32::try_from(config.max_calls.max(1)).unwrap_or(u32::MAX);
        let period = (config.window / max_calls).max(Duration::from_nanos(1));
        let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct_with_clock(quota, TokioClock),
            queue: Mutex::new(()),
        }
    }

    /// Wait for a slot and consume it.
    ///
    /// Dropping the returned future before it completes consumes nothing.
    pub async fn acquire(&self) {
        let _turn = self.queue.lock().await;
        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(TokioClock.now());
            debug!(wait_ms = wait.as_millis() as u64, "call rate ceiling reached; pacing");
            sleep(wait).await;
        }
    }

    /// Run `work` once a slot is available. Exactly one slot is used whatever `work` returns.
    pub async fn execute<F, Fut, T>(&self, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        work().await
    }
}
