//! Blast-radius tiers for delivery failures.

use std::fmt;

use serde::Serialize;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTier {
    /// Aborts the delivery, keeps the workspace and writes a failure record.
    Fatal,
    /// Stops auto-merge and leaves the request open for a human.
    Escalation,
    /// Logged and ignored.
    BestEffort,
}

impl FailureTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Escalation => "escalation",
            Self::BestEffort => "best_effort",
        }
    }
}

impl fmt::Display for FailureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
