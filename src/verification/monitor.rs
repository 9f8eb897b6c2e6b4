//! Cancellable, wall-clock bounded polling of verification checks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{classify, CheckSetState, VerificationCheck, VerificationSnapshot};
use crate::host::RepositoryHost;
use crate::timeout::{CancelSignal, Clock};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("verification wait cancelled")]
    Cancelled,
}

/// Polls the host for the checks of one ref until they settle or a
/// deadline passes.
pub struct VerificationMonitor {
    host: Arc<dyn RepositoryHost>,
    clock: Arc<dyn Clock>,
}

impl VerificationMonitor {
    pub fn new(host: Arc<dyn RepositoryHost>, clock: Arc<dyn Clock>) -> Self {
        Self { host, clock }
    }

    /// Wait for every check on `git_ref` to complete.
    ///
    /// Returns early with `timed_out = false` once at least one check exists
    /// and all of them are completed. Once `max_wait` has elapsed since the
    /// call began, returns `timed_out = true` with the last checks observed.
    /// A fetch still in flight at the deadline is abandoned, so the call
    /// returns within `max_wait + poll_interval` whatever the host latency.
    ///
    /// Fetch errors are logged and treated as "nothing new observed".
    #[instrument(skip(self, cancel), fields(component = "verification"))]
    pub async fn wait_for(
        &self,
        git_ref: &str,
        poll_interval: Duration,
        max_wait: Duration,
        cancel: &CancelSignal,
    ) -> Result<VerificationSnapshot, VerificationError> {
        let mut cancel = cancel.clone();
        let start = self.clock.now();
        let mut last_seen: Vec<VerificationCheck> = Vec::new();
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(VerificationError::Cancelled);
            }

            let remaining = max_wait.saturating_sub(self.clock.elapsed_since(start));
            if remaining.is_zero() {
                return Ok(self.timed_out(git_ref, last_seen, start, polls));
            }

            polls += 1;
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(VerificationError::Cancelled),
                _ = self.clock.sleep(remaining) => None,
                result = self.host.list_checks(git_ref) => Some(result),
            };

            match fetched {
                None => {
                    warn!(git_ref, poll = polls, "check fetch still pending at deadline");
                    return Ok(self.timed_out(git_ref, last_seen, start, polls));
                }
                Some(Ok(checks)) => {
                    let state = classify(&checks);
                    debug!(git_ref, poll = polls, checks = checks.len(), ?state, "polled checks");
                    last_seen = checks;
                    if state != CheckSetState::Pending {
                        let elapsed = self.clock.elapsed_since(start);
                        info!(
                            git_ref,
                            polls,
                            elapsed_secs = elapsed.as_secs(),
                            ?state,
                            "verification settled"
                        );
                        return Ok(VerificationSnapshot::new(last_seen, elapsed, false));
                    }
                }
                Some(Err(err)) => {
                    warn!(git_ref, poll = polls, error = %err, "check fetch failed, will retry");
                }
            }

            let remaining = max_wait.saturating_sub(self.clock.elapsed_since(start));
            if remaining.is_zero() {
                return Ok(self.timed_out(git_ref, last_seen, start, polls));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(VerificationError::Cancelled),
                _ = self.clock.sleep(poll_interval.min(remaining)) => {}
            }
        }
    }

    fn timed_out(
        &self,
        git_ref: &str,
        checks: Vec<VerificationCheck>,
        start: tokio::time::Instant,
        polls: u32,
    ) -> VerificationSnapshot {
        let elapsed = self.clock.elapsed_since(start);
        warn!(
            git_ref,
            polls,
            elapsed_secs = elapsed.as_secs(),
            checks = checks.len(),
            "verification wait timed out"
        );
        VerificationSnapshot::new(checks, elapsed, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHost;
    use crate::timeout::{CancelHandle, TokioClock};
    use crate::verification::{CheckConclusion, VerificationVerdict};

    fn monitor(host: Arc<ScriptedHost>) -> VerificationMonitor {
        VerificationMonitor::new(host, Arc::new(TokioClock))
    }

    fn done(name: &str, conclusion: CheckConclusion) -> VerificationCheck {
        VerificationCheck::completed(1, name, conclusion)
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_completed_set() {
        let host = Arc::new(ScriptedHost::new());
        host.script_checks(vec![
            vec![VerificationCheck::queued(1, "build")],
            vec![done("build", CheckConclusion::Success)],
        ]);

        let snapshot = monitor(host.clone())
            .wait_for(
                "story/7-1",
                Duration::from_secs(30),
                Duration::from_secs(600),
                &CancelSignal::never(),
            )
            .await
            .expect("not cancelled");

        assert_eq!(snapshot.verdict(), VerificationVerdict::Passed);
        assert_eq!(snapshot.elapsed(), Duration::from_secs(30));
        assert_eq!(host.check_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_set_returns_without_timeout() {
        let host = Arc::new(ScriptedHost::new());
        host.script_checks(vec![vec![
            done("build", CheckConclusion::Success),
            done("test", CheckConclusion::Failure),
        ]]);

        let snapshot = monitor(host)
            .wait_for("r", Duration::from_secs(5), Duration::from_secs(60), &CancelSignal::never())
            .await
            .expect("not cancelled");

        assert!(!snapshot.timed_out());
        assert_eq!(snapshot.verdict(), VerificationVerdict::Failed);
        assert_eq!(snapshot.failed_checks()[0].name, "test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_set_polls_until_timeout() {
        let host = Arc::new(ScriptedHost::new());
        host.script_checks(vec![vec![]]);

        let snapshot = monitor(host.clone())
            .wait_for("r", Duration::from_secs(30), Duration::from_secs(120), &CancelSignal::never())
            .await
            .expect("not cancelled");

        assert!(snapshot.timed_out());
        assert!(snapshot.checks().is_empty());
        assert_eq!(snapshot.elapsed(), Duration::from_secs(120));
        // polls at 0, 30, 60 and 90 seconds
        assert_eq!(host.check_fetches(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_last_observed_checks() {
        let host = Arc::new(ScriptedHost::new());
        host.script_checks(vec![vec![
            done("build", CheckConclusion::Success),
            VerificationCheck::queued(2, "e2e"),
        ]]);

        let snapshot = monitor(host)
            .wait_for("r", Duration::from_secs(10), Duration::from_secs(25), &CancelSignal::never())
            .await
            .expect("not cancelled");

        assert!(snapshot.timed_out());
        assert_eq!(snapshot.checks().len(), 2);
        assert_eq!(snapshot.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_host_does_not_extend_deadline() {
        let host = Arc::new(ScriptedHost::new());
        host.script_checks(vec![vec![VerificationCheck::queued(1, "build")]]);
        host.set_check_latency(Duration::from_secs(45));

        let poll = Duration::from_secs(30);
        let max_wait = Duration::from_secs(100);
        let clock = TokioClock;
        let start = clock.now();

        let snapshot = monitor(host)
            .wait_for("r", poll, max_wait, &CancelSignal::never())
            .await
            .expect("not cancelled");

        assert!(snapshot.timed_out());
        assert!(clock.elapsed_since(start) <= max_wait + poll);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_are_transient() {
        let host = Arc::new(ScriptedHost::new());
        host.fail_next_check_fetches(2);
        host.script_checks(vec![vec![done("build", CheckConclusion::Success)]]);

        let snapshot = monitor(host.clone())
            .wait_for("r", Duration::from_secs(10), Duration::from_secs(300), &CancelSignal::never())
            .await
            .expect("not cancelled");

        assert_eq!(snapshot.verdict(), VerificationVerdict::Passed);
        assert_eq!(host.check_fetches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let host = Arc::new(ScriptedHost::new());
        host.script_checks(vec![vec![]]);
        let (handle, signal) = CancelHandle::new();
        let clock = TokioClock;
        let start = clock.now();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        });

        let result = monitor(host)
            .wait_for("r", Duration::from_secs(600), Duration::from_secs(3600), &signal)
            .await;

        canceller.await.expect("canceller task");
        assert_eq!(result, Err(VerificationError::Cancelled));
        assert!(clock.elapsed_since(start) < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_does_not_poll() {
        let host = Arc::new(ScriptedHost::new());
        let (handle, signal) = CancelHandle::new();
        handle.cancel();

        let result = monitor(host.clone())
            .wait_for("r", Duration::from_secs(1), Duration::from_secs(10), &signal)
            .await;

        assert_eq!(result, Err(VerificationError::Cancelled));
        assert_eq!(host.check_fetches(), 0);
    }
}
