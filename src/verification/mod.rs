//! Verification checks reported by the hosting platform.
//!
//! A [`VerificationSnapshot`] is what one wait observed: the checks seen at
//! the last poll, how long the wait took, and whether it hit its deadline.

mod monitor;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use monitor::{VerificationError, VerificationMonitor};

/// Progress of a single check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

impl CheckStatus {
    /// Parse a host status string. Anything that is not running or
    /// completed (`waiting`, `requested`, `pending`) counts as queued.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => Self::Completed,
            "in_progress" => Self::InProgress,
            _ => Self::Queued,
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        })
    }
}

/// Final result of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    ActionRequired,
    Skipped,
    Stale,
    /// A conclusion this crate does not know, such as `startup_failure`,
    /// or a completed check the host reported without one.
    Unrecognized,
}

impl CheckConclusion {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "neutral" => Some(Self::Neutral),
            "cancelled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            "action_required" => Some(Self::ActionRequired),
            "skipped" => Some(Self::Skipped),
            "stale" => Some(Self::Stale),
            "unrecognized" => Some(Self::Unrecognized),
            _ => None,
        }
    }

    /// Conclusions that fail the check set. Neutral, cancelled, skipped and
    /// stale do not. An unrecognized conclusion is never trusted as a pass.
    pub fn is_failing(self) -> bool {
        matches!(
            self,
            Self::Failure | Self::TimedOut | Self::ActionRequired | Self::Unrecognized
        )
    }
}

impl fmt::Display for CheckConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Neutral => "neutral",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::ActionRequired => "action_required",
            Self::Skipped => "skipped",
            Self::Stale => "stale",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(s)
    }
}

/// One named automated check reported for a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub id: u64,
    pub name: String,
    pub status: CheckStatus,
    /// Present only once `status` is `Completed`.
    pub conclusion: Option<CheckConclusion>,
}

impl VerificationCheck {
    pub fn queued(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: CheckStatus::Queued,
            conclusion: None,
        }
    }

    pub fn completed(id: u64, name: impl Into<String>, conclusion: CheckConclusion) -> Self {
        Self {
            id,
            name: name.into(),
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CheckStatus::Completed
    }

    /// A completed check without a conclusion fails.
    pub fn is_failing(&self) -> bool {
        self.is_completed() && self.conclusion.map_or(true, CheckConclusion::is_failing)
    }
}

/// Classification of a check set at one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckSetState {
    /// No checks reported yet, or some are still queued or running.
    Pending,
    Passed,
    Failed,
}

/// Classify a check set. An empty set is pending, never passed.
pub fn classify(checks: &[VerificationCheck]) -> CheckSetState {
    if checks.is_empty() || !checks.iter().all(VerificationCheck::is_completed) {
        return CheckSetState::Pending;
    }
    if checks.iter().any(VerificationCheck::is_failing) {
        CheckSetState::Failed
    } else {
        CheckSetState::Passed
    }
}

/// Overall outcome of one verification wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationVerdict {
    Passed,
    Failed,
    TimedOut,
}

/// Checks observed by one verification wait. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationSnapshot {
    checks: Vec<VerificationCheck>,
    elapsed: Duration,
    timed_out: bool,
}

impl VerificationSnapshot {
    pub fn new(checks: Vec<VerificationCheck>, elapsed: Duration, timed_out: bool) -> Self {
        Self {
            checks,
            elapsed,
            timed_out,
        }
    }

    pub fn checks(&self) -> &[VerificationCheck] {
        &self.checks
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn state(&self) -> CheckSetState {
        classify(&self.checks)
    }

    pub fn passed(&self) -> bool {
        !self.timed_out && self.state() == CheckSetState::Passed
    }

    /// Completed checks whose conclusion fails the set.
    pub fn failed_checks(&self) -> Vec<&VerificationCheck> {
        self.checks.iter().filter(|c| c.is_failing()).collect()
    }

    pub fn verdict(&self) -> VerificationVerdict {
        if self.timed_out {
            return VerificationVerdict::TimedOut;
        }
        match self.state() {
            CheckSetState::Passed => VerificationVerdict::Passed,
            CheckSetState::Failed => VerificationVerdict::Failed,
            // A wait only returns early on a complete set.
            CheckSetState::Pending => VerificationVerdict::TimedOut,
        }
    }

    /// Short human-readable summary, e.g. `2 checks: build=success, lint=failure`.
    pub fn summary(&self) -> String {
        if self.checks.is_empty() {
            return "no checks reported".to_string();
        }
        let parts: Vec<String> = self
            .checks
            .iter()
            .map(|c| match c.conclusion {
                Some(conclusion) => format!("{}={}", c.name, conclusion),
                None => format!("{}={}", c.name, c.status),
            })
            .collect();
        format!("{} checks: {}", self.checks.len(), parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CheckConclusion::*;

    fn done(name: &str, conclusion: CheckConclusion) -> VerificationCheck {
        VerificationCheck::completed(1, name, conclusion)
    }

    #[test]
    fn test_all_success_passes() {
        assert_eq!(
            classify(&[done("build", Success), done("lint", Success)]),
            CheckSetState::Passed
        );
    }

    #[test]
    fn test_any_failure_fails() {
        assert_eq!(
            classify(&[done("build", Success), done("test", Failure)]),
            CheckSetState::Failed
        );
    }

    #[test]
    fn test_skipped_does_not_fail() {
        assert_eq!(
            classify(&[done("build", Success), done("deploy", Skipped)]),
            CheckSetState::Passed
        );
    }

    #[test]
    fn test_neutral_and_cancelled_do_not_fail() {
        assert_eq!(
            classify(&[done("a", Neutral), done("b", Cancelled), done("c", Stale)]),
            CheckSetState::Passed
        );
    }

    #[test]
    fn test_timed_out_and_action_required_fail() {
        assert_eq!(classify(&[done("a", TimedOut)]), CheckSetState::Failed);
        assert_eq!(classify(&[done("a", ActionRequired)]), CheckSetState::Failed);
    }

    #[test]
    fn test_empty_set_is_pending() {
        assert_eq!(classify(&[]), CheckSetState::Pending);
    }

    #[test]
    fn test_running_check_is_pending() {
        assert_eq!(
            classify(&[done("build", Failure), VerificationCheck::queued(2, "test")]),
            CheckSetState::Pending
        );
    }

    #[test]
    fn test_parse_host_values() {
        assert_eq!(CheckStatus::parse("completed"), CheckStatus::Completed);
        assert_eq!(CheckStatus::parse("in_progress"), CheckStatus::InProgress);
        assert_eq!(CheckStatus::parse("waiting"), CheckStatus::Queued);
        assert_eq!(CheckConclusion::parse("action_required"), Some(ActionRequired));
        assert_eq!(CheckConclusion::parse("mystery"), None);
    }

    #[test]
    fn test_snapshot_verdicts() {
        let passed = VerificationSnapshot::new(vec![done("build", Success)], Duration::ZERO, false);
        assert_eq!(passed.verdict(), VerificationVerdict::Passed);
        assert!(passed.passed());

        let failed = VerificationSnapshot::new(vec![done("build", Failure)], Duration::ZERO, false);
        assert_eq!(failed.verdict(), VerificationVerdict::Failed);
        assert_eq!(failed.failed_checks().len(), 1);

        let timed_out = VerificationSnapshot::new(vec![done("build", Success)], Duration::ZERO, true);
        assert_eq!(timed_out.verdict(), VerificationVerdict::TimedOut);
        assert!(!timed_out.passed());
    }

    #[test]
    fn test_summary() {
        let snapshot = VerificationSnapshot::new(
            vec![done("build", Success), VerificationCheck::queued(2, "lint")],
            Duration::ZERO,
            true,
        );
        assert_eq!(snapshot.summary(), "2 checks: build=success, lint=queued");
    }

    #[test]
    fn test_summary_keeps_check_name_case() {
        let mut running = VerificationCheck::queued(2, "Integration Tests");
        running.status = CheckStatus::InProgress;
        let snapshot = VerificationSnapshot::new(
            vec![done("Build", Success), running],
            Duration::ZERO,
            true,
        );
        assert_eq!(
            snapshot.summary(),
            "2 checks: Build=success, Integration Tests=in_progress"
        );
    }

    #[test]
    fn test_unrecognized_conclusion_fails() {
        assert!(Unrecognized.is_failing());
        assert_eq!(
            classify(&[done("build", Success), done("setup", Unrecognized)]),
            CheckSetState::Failed
        );
    }

    #[test]
    fn test_completed_without_conclusion_fails() {
        let mut check = VerificationCheck::queued(3, "deploy");
        check.status = CheckStatus::Completed;
        assert!(check.is_failing());
        assert_eq!(
            classify(&[done("build", Success), check]),
            CheckSetState::Failed
        );
    }
}
