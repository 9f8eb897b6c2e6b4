//! Value types exchanged with the repository host.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a change request on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Open,
    Closed,
    Merged,
}

/// An open (or formerly open) change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHandle {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub body: String,
    pub source_branch: String,
    pub target_branch: String,
    pub state: RequestState,
    pub auto_merge_requested: bool,
}

impl RequestHandle {
    pub fn is_merged(&self) -> bool {
        self.state == RequestState::Merged
    }

    /// Record that the request was merged. A merged handle never changes
    /// again, so this returns false if it already was.
    pub fn mark_merged(&mut self) -> bool {
        if self.is_merged() {
            return false;
        }
        self.state = RequestState::Merged;
        true
    }
}

/// Parameters for opening a new change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub title: String,
    pub body: String,
    /// Source branch.
    pub head: String,
    /// Target branch.
    pub base: String,
}

/// Merge strategy applied by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "squash" => Ok(Self::Squash),
            "rebase" => Ok(Self::Rebase),
            other => Err(format!(
                "unknown merge method '{}' (expected merge, squash or rebase)",
                other
            )),
        }
    }
}

/// Commit metadata sent with a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCommit {
    pub title: String,
    pub message: String,
    pub method: MergeMethod,
}

/// What the host reports about the protection rules of a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionSummary {
    pub required_checks: Vec<String>,
    pub required_approvals: u32,
    pub enforce_admins: bool,
}
