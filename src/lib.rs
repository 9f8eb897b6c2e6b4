//! prship: delivery pipeline for autonomous code changes.
//!
//! Given a finished branch for a work item, prship publishes it, opens a
//! pull request, waits for the host's verification checks, merges when they
//! pass, tears the workspace down and tells the status ledger which work
//! items are now unblocked.
//!
//! The entry point is [`orchestrator::DeliveryOrchestrator::deliver`].

pub mod config;
pub mod dependency;
pub mod error;
pub mod escalation;
pub mod failure;
pub mod git;
pub mod host;
pub mod ledger;
pub mod merge;
pub mod orchestrator;
pub mod timeout;
pub mod verification;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DeliveryConfig;
pub use error::{DeliveryError, FailureTier};
pub use orchestrator::{DeliveryOrchestrator, DeliveryOutcome, DeliveryReport, RequestDescription};
