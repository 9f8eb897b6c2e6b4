//! Errors that abort a delivery.

mod classification;

use std::error::Error as StdError;

use thiserror::Error;

pub use classification::FailureTier;

use crate::host::HostError;
use crate::ledger::LedgerError;
use crate::workspace::WorkspaceError;

/// Errors returned by `DeliveryOrchestrator::deliver`.
///
/// Escalations are not errors: they come back as an `Ok` report with the
/// request left open.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to publish branch {branch}")]
    Publish {
        branch: String,
        #[source]
        source: WorkspaceError,
    },

    #[error("failed to create request for branch {branch}")]
    CreateRequest {
        branch: String,
        #[source]
        source: HostError,
    },

    /// The host reported a duplicate request but none is open for the branch.
    #[error("host reported an existing request for {branch} but none is open")]
    ExistingRequestMissing { branch: String },

    #[error("failed to update ledger")]
    Ledger(#[from] LedgerError),

    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    pub fn tier(&self) -> FailureTier {
        FailureTier::Fatal
    }

    /// Pipeline stage that failed, as written to failure records.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "publish",
            Self::CreateRequest { .. } | Self::ExistingRequestMissing { .. } => "create_request",
            Self::Ledger(_) => "ledger",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this failure should leave a failure record behind.
    /// Cancellation is an operator decision, not a failure.
    pub fn is_recordable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// This error's message followed by each of its sources.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();
        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }
        chain
    }
}
