use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::workspace::WorkspaceDescriptor;

/// Current failure record schema version.
pub const FAILURE_SCHEMA_VERSION: u32 = 1;

/// Structured record of one fatal delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub schema_version: u32,
    pub work_item_key: String,
    /// Pipeline stage that failed, e.g. `publish`.
    pub stage: String,
    pub error_message: String,
    /// The error followed by each underlying cause.
    #[serde(default)]
    pub error_chain: Vec<String>,
    /// Workspace left in place for inspection.
    #[serde(default)]
    pub workspace: Option<WorkspaceDescriptor>,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(
        work_item_key: impl Into<String>,
        stage: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: FAILURE_SCHEMA_VERSION,
            work_item_key: work_item_key.into(),
            stage: stage.into(),
            error_message: error_message.into(),
            error_chain: Vec::new(),
            workspace: None,
            recorded_at: Utc::now(),
        }
    }

    /// Capture a delivery error with its full cause chain.
    pub fn from_error(
        work_item_key: impl Into<String>,
        error: &DeliveryError,
        workspace: Option<WorkspaceDescriptor>,
    ) -> Self {
        Self {
            error_chain: error.chain(),
            workspace,
            ..Self::new(work_item_key, error.stage(), error.to_string())
        }
    }
}
