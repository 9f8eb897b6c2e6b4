//! Repository host API.
//!
//! [`RepositoryHost`] is the seam between the delivery pipeline and the
//! hosting platform. [`GitHubHost`] implements it over the GitHub REST API;
//! tests use an in-memory double.

mod github;
mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use github::GitHubHost;
pub use models::{
    MergeCommit, MergeMethod, NewRequest, ProtectionSummary, RequestHandle, RequestState,
};

use crate::verification::VerificationCheck;

/// Errors returned by host calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// An equivalent request for the same source branch already exists.
    #[error("request already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("request is not mergeable: {0}")]
    NotMergeable(String),

    #[error("host returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode host response: {0}")]
    Decode(String),
}

impl HostError {
    /// Classify an HTTP error status and message.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            405 | 409 => Self::NotMergeable(message),
            422 if message.to_ascii_lowercase().contains("already exists") => {
                Self::AlreadyExists(message)
            }
            _ => Self::Api { status, message },
        }
    }

    /// Human-readable detail without the variant prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::AlreadyExists(m)
            | Self::NotFound(m)
            | Self::Forbidden(m)
            | Self::NotMergeable(m)
            | Self::Transport(m)
            | Self::Decode(m) => m,
            Self::Api { message, .. } => message,
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Operations the delivery pipeline needs from the hosting platform.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Open a change request. Fails with [`HostError::AlreadyExists`] when
    /// one is already open for `request.head`.
    async fn create_request(&self, request: &NewRequest) -> HostResult<RequestHandle>;

    /// The open request whose source branch is `branch`, if any.
    async fn find_open_request(&self, branch: &str) -> HostResult<Option<RequestHandle>>;

    async fn list_labels(&self) -> HostResult<Vec<String>>;

    async fn create_label(&self, name: &str, color: &str) -> HostResult<()>;

    async fn add_labels(&self, number: u64, labels: &[String]) -> HostResult<()>;

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> HostResult<()>;

    /// Verification checks reported for a branch name or commit.
    async fn list_checks(&self, git_ref: &str) -> HostResult<Vec<VerificationCheck>>;

    /// Ask the host to run a single check again.
    async fn rerun_check(&self, check_id: u64) -> HostResult<()>;

    /// Mergeability of a request. `None` while the host is still computing it.
    async fn mergeability(&self, number: u64) -> HostResult<Option<bool>>;

    /// Protection rules for `branch`. `None` when the branch is unprotected.
    async fn branch_protection(&self, branch: &str) -> HostResult<Option<ProtectionSummary>>;

    /// Merge a request and return the resulting commit id.
    async fn merge(&self, number: u64, commit: &MergeCommit) -> HostResult<String>;

    async fn delete_branch(&self, branch: &str) -> HostResult<()>;
}
