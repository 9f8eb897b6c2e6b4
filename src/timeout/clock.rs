//! Injected clock for every timed wait in the pipeline.
//!
//! Production code uses [`TokioClock`], which reads tokio's clock. Because
//! tokio's clock can be paused in tests (`#[tokio::test(start_paused = true)]`),
//! wall-clock deadlines can be exercised without real waiting.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Source of time and sleeping for polling loops.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Time elapsed since `start`, saturating at zero.
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Clock backed by the tokio runtime timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
