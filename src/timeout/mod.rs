//! Waiting configuration and primitives.
//!
//! This module provides the time budget for everything the delivery
//! pipeline waits on: verification polling, check re-runs, mergeability
//! re-checks and individual git commands. It also provides the injected
//! clock and the cancellation signal used by every suspension point.

pub mod cancel;
pub mod clock;

use std::time::Duration;

pub use cancel::{CancelHandle, CancelSignal};
pub use clock::{Clock, TokioClock};

/// Configuration for how long the pipeline waits and how often it retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    /// Pause between two fetches of the verification check set.
    /// Default: 30 seconds
    pub poll_interval: Duration,

    /// Wall-clock budget for one verification wait.
    /// Default: 1800 seconds (30 minutes)
    pub max_wait: Duration,

    /// How many times failed checks are re-requested before escalating.
    /// Default: 2
    pub max_retries: u32,

    /// Pause after re-requesting failed checks before polling again.
    /// Default: 60 seconds
    pub retry_delay: Duration,

    /// Pause before the single mergeability re-check when the host has not
    /// finished computing it.
    /// Default: 5 seconds
    pub mergeability_recheck: Duration,

    /// Maximum time allowed for a single git command (push, worktree removal).
    /// Default: 60 seconds
    pub git_timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(1800),
            max_retries: 2,
            retry_delay: Duration::from_secs(60),
            mergeability_recheck: Duration::from_secs(5),
            git_timeout: Duration::from_secs(60),
        }
    }
}

impl WaitConfig {
    /// Creates a new WaitConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the verification polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the verification wall-clock budget.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sets the maximum number of check re-runs.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the pause after re-requesting failed checks.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the pause before re-checking an unknown mergeability.
    pub fn with_mergeability_recheck(mut self, delay: Duration) -> Self {
        self.mergeability_recheck = delay;
        self
    }

    /// Sets the git command timeout.
    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    /// Upper bound on how long a single verification wait can take,
    /// including the final poll interval that may straddle the deadline.
    pub fn verification_bound(&self) -> Duration {
        self.max_wait + self.poll_interval
    }
}
