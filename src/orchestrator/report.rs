use serde::Serialize;

use crate::dependency::DependencyResolutionResult;
use crate::escalation::Escalation;
use crate::host::RequestHandle;

/// Text of the change request, composed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescription {
    pub title: String,
    pub body: String,
}

impl RequestDescription {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Auto-merge is off; the request waits for review.
    InReview,
    /// Merged and torn down. `resolution` lists the work items this unblocked.
    Merged {
        merge_reference: String,
        resolution: DependencyResolutionResult,
    },
    /// Stopped for a human; the request stays open.
    Escalated(Escalation),
}

/// Result of a delivery that did not fail fatally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub request: RequestHandle,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn is_escalated(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Escalated(_))
    }

    pub fn escalation(&self) -> Option<&Escalation> {
        match &self.outcome {
            DeliveryOutcome::Escalated(escalation) => Some(escalation),
            _ => None,
        }
    }
}
