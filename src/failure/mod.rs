//! Failure records for fatal deliveries.
//!
//! Each fatal failure is written as its own JSON document under
//! `<state_dir>/failures/`, named after the work item key. A repeat failure
//! for the same key gets a sequence suffix (`7-1.2.json`) instead of
//! replacing the earlier record.

mod config;
mod record;
mod store;

pub use config::{FailureStoreConfig, DEFAULT_RETENTION_DAYS, RETENTION_ENV_VAR};
pub use record::{FailureRecord, FAILURE_SCHEMA_VERSION};
pub use store::{FailureStore, FailureStoreError, FailureStoreResult, StoredFailure};
