//! Merge executor.
//!
//! Checks mergeability (re-checking once when the host has not computed it
//! yet), logs branch protection rules when they are readable, performs the
//! merge and classifies host failures as conflicts or generic failures.

mod commit_message;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

pub use commit_message::{commit_message, commit_title, implementation_section, PLACEHOLDER_MESSAGE};

use crate::host::{HostError, MergeCommit, MergeMethod, RepositoryHost, RequestHandle};
use crate::timeout::Clock;

/// Result of one merge attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub success: bool,
    /// Commit id of the merge, present on success.
    pub merge_reference: Option<String>,
    pub has_conflict: bool,
    /// Host-reported reason, present on failure.
    pub error_detail: Option<String>,
}

impl MergeOutcome {
    pub fn merged(reference: impl Into<String>) -> Self {
        Self {
            success: true,
            merge_reference: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self {
            has_conflict: true,
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }
}

fn conflict_vocabulary() -> Option<&'static Regex> {
    static CONFLICT: OnceLock<Option<Regex>> = OnceLock::new();
    CONFLICT
        .get_or_init(|| Regex::new(r"(?i)conflict|merge").ok())
        .as_ref()
}

/// Whether a host merge failure describes a conflict.
pub fn is_conflict(err: &HostError) -> bool {
    matches!(err, HostError::NotMergeable(_))
        || conflict_vocabulary().is_some_and(|re| re.is_match(err.detail()))
}

/// Performs merges against a repository host.
pub struct MergeExecutor {
    host: Arc<dyn RepositoryHost>,
    clock: Arc<dyn Clock>,
    recheck_delay: Duration,
    message_limit: usize,
}

impl MergeExecutor {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        clock: Arc<dyn Clock>,
        recheck_delay: Duration,
        message_limit: usize,
    ) -> Self {
        Self {
            host,
            clock,
            recheck_delay,
            message_limit,
        }
    }

    /// Merge `request` with `method`. Never fails; the outcome carries the
    /// classification.
    #[instrument(skip(self, request), fields(component = "merge", number = request.number))]
    pub async fn merge(&self, request: &RequestHandle, method: MergeMethod) -> MergeOutcome {
        match self.mergeability(request.number).await {
            Some(false) => {
                warn!(number = request.number, "host reports the request is not mergeable");
                return MergeOutcome::conflict("request has conflicts with the target branch");
            }
            Some(true) => debug!(number = request.number, "request is mergeable"),
            None => debug!(number = request.number, "mergeability unknown, attempting merge"),
        }

        self.log_protection(&request.target_branch).await;

        let commit = MergeCommit {
            title: commit_title(&request.title, request.number),
            message: commit_message(&request.body, self.message_limit),
            method,
        };

        match self.host.merge(request.number, &commit).await {
            Ok(reference) => {
                info!(number = request.number, merge_reference = %reference, %method, "request merged");
                MergeOutcome::merged(reference)
            }
            Err(err) if is_conflict(&err) => {
                warn!(number = request.number, error = %err, "merge rejected as conflict");
                MergeOutcome::conflict(err.detail())
            }
            Err(err) => {
                warn!(number = request.number, error = %err, "merge failed");
                MergeOutcome::failed(err.to_string())
            }
        }
    }

    /// Mergeability, re-checked once after a short delay if unknown.
    /// Fetch errors count as unknown.
    async fn mergeability(&self, number: u64) -> Option<bool> {
        let first = self.fetch_mergeability(number).await;
        if first.is_some() {
            return first;
        }
        self.clock.sleep(self.recheck_delay).await;
        self.fetch_mergeability(number).await
    }

    async fn fetch_mergeability(&self, number: u64) -> Option<bool> {
        match self.host.mergeability(number).await {
            Ok(value) => value,
            Err(err) => {
                debug!(number, error = %err, "mergeability lookup failed");
                None
            }
        }
    }

    async fn log_protection(&self, branch: &str) {
        match self.host.branch_protection(branch).await {
            Ok(Some(rules)) => info!(
                branch,
                required_checks = ?rules.required_checks,
                required_approvals = rules.required_approvals,
                enforce_admins = rules.enforce_admins,
                "target branch is protected"
            ),
            Ok(None) => debug!(branch, "target branch has no protection rules"),
            Err(err) => debug!(
                branch,
                error = %err,
                tier = "best_effort",
                "branch protection not readable"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request_handle, ScriptedHost};
    use crate::timeout::TokioClock;

    fn executor(host: Arc<ScriptedHost>) -> MergeExecutor {
        MergeExecutor::new(host, Arc::new(TokioClock), Duration::from_secs(5), 1000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mergeable_request_merges() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![Some(true)]);
        host.set_merge_sha("abc123");

        let outcome = executor(host.clone())
            .merge(&request_handle(50, "story/7-1"), MergeMethod::Squash)
            .await;

        assert_eq!(outcome, MergeOutcome::merged("abc123"));
        let merges = host.merges();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].0, 50);
        assert_eq!(merges[0].1.method, MergeMethod::Squash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmergeable_request_is_conflict_without_merge() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![Some(false)]);

        let outcome = executor(host.clone())
            .merge(&request_handle(50, "story/7-1"), MergeMethod::Squash)
            .await;

        assert!(outcome.has_conflict);
        assert!(!outcome.success);
        assert!(host.merges().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_mergeability_rechecked_once() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![None, None, Some(false)]);
        host.set_merge_sha("def456");
        let clock = TokioClock;
        let start = clock.now();

        let outcome = executor(host.clone())
            .merge(&request_handle(9, "b"), MergeMethod::Merge)
            .await;

        assert_eq!(host.mergeability_fetches(), 2);
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(5));
        assert_eq!(outcome.merge_reference.as_deref(), Some("def456"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_reporting_conflict_stops() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![None, Some(false)]);

        let outcome = executor(host.clone())
            .merge(&request_handle(9, "b"), MergeMethod::Merge)
            .await;

        assert!(outcome.has_conflict);
        assert!(host.merges().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_error_classified_by_vocabulary() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![Some(true)]);
        host.set_merge_error(HostError::Api {
            status: 422,
            message: "Merge conflict detected in src/lib.rs".to_string(),
        });

        let outcome = executor(host)
            .merge(&request_handle(1, "b"), MergeMethod::Squash)
            .await;

        assert!(outcome.has_conflict);
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("Merge conflict detected in src/lib.rs")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_host_error_is_generic_failure() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![Some(true)]);
        host.set_merge_error(HostError::Forbidden("Resource not accessible".to_string()));

        let outcome = executor(host)
            .merge(&request_handle(1, "b"), MergeMethod::Squash)
            .await;

        assert!(!outcome.success);
        assert!(!outcome.has_conflict);
        assert!(outcome.error_detail.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_uses_implementation_section() {
        let host = Arc::new(ScriptedHost::new());
        host.script_mergeability(vec![Some(true)]);
        let mut request = request_handle(50, "story/7-1");
        request.title = "Login form".to_string();
        request.body = "## Implementation\nAdded the form.\n## Testing\nok\n".to_string();

        executor(host.clone()).merge(&request, MergeMethod::Squash).await;

        let merges = host.merges();
        assert_eq!(merges[0].1.title, "Login form (#50)");
        assert_eq!(merges[0].1.message, "Added the form.");
    }

    #[test]
    fn test_not_mergeable_is_always_conflict() {
        assert!(is_conflict(&HostError::NotMergeable("Base branch was modified".into())));
        assert!(!is_conflict(&HostError::Transport("timed out".into())));
    }

    #[test]
    fn test_conflict_pattern_compiles() {
        assert!(conflict_vocabulary().is_some());
        assert!(is_conflict(&HostError::Api {
            status: 422,
            message: "Merge conflict between base and head".into(),
        }));
    }
}
