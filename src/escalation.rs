//! Escalations: stopping conditions that need a human.
//!
//! An escalation halts auto-merge but leaves the request open. Each kind
//! names the remedy the operator is expected to apply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    VerificationTimeout,
    VerificationFailed,
    MergeConflict,
    MergeFailed,
}

impl EscalationKind {
    /// What the operator should do about it.
    pub fn remedy(self) -> &'static str {
        match self {
            Self::VerificationTimeout => {
                "checks did not finish in time: inspect the CI queue, then retry the merge manually"
            }
            Self::VerificationFailed => {
                "checks still failing after retries: inspect the CI logs and push a fix"
            }
            Self::MergeConflict => {
                "branch conflicts with its target: resolve the conflict and push the branch again"
            }
            Self::MergeFailed => "merge was rejected by the host: review the request and retry manually",
        }
    }
}

impl std::fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EscalationKind::VerificationTimeout => "verification_timeout",
            EscalationKind::VerificationFailed => "verification_failed",
            EscalationKind::MergeConflict => "merge_conflict",
            EscalationKind::MergeFailed => "merge_failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EscalationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verification_timeout" => Ok(EscalationKind::VerificationTimeout),
            "verification_failed" => Ok(EscalationKind::VerificationFailed),
            "merge_conflict" => Ok(EscalationKind::MergeConflict),
            "merge_failed" => Ok(EscalationKind::MergeFailed),
            _ => Err(format!(
                "unknown escalation kind '{s}': must be verification_timeout, verification_failed, merge_conflict, or merge_failed"
            )),
        }
    }
}

/// A raised escalation for one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub kind: EscalationKind,
    pub work_item_key: String,
    pub request_number: u64,
    pub request_url: String,
    pub detail: String,
    /// Names of failing checks, for verification escalations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_checks: Vec<String>,
    pub raised_at: DateTime<Utc>,
}

impl Escalation {
    pub fn new(
        kind: EscalationKind,
        work_item_key: impl Into<String>,
        request_number: u64,
        request_url: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            work_item_key: work_item_key.into(),
            request_number,
            request_url: request_url.into(),
            detail: detail.into(),
            failed_checks: Vec::new(),
            raised_at: Utc::now(),
        }
    }

    pub fn with_failed_checks(mut self, checks: Vec<String>) -> Self {
        self.failed_checks = checks;
        self
    }

    pub fn remedy(&self) -> &'static str {
        self.kind.remedy()
    }

    /// Log the escalation as a structured event.
    pub fn emit(&self) {
        warn!(
            component = "orchestrator",
            work_item = %self.work_item_key,
            tier = "escalation",
            kind = %self.kind,
            request = self.request_number,
            url = %self.request_url,
            failed_checks = %self.failed_checks.join(", "),
            remedy = self.remedy(),
            detail = %self.detail,
            "delivery escalated"
        );
    }
}
