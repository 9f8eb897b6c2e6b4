use std::fmt;

use serde::{Serialize, Serializer};

/// Lifecycle status of a work item as recorded in the ledger.
///
/// Known statuses are ordered; `Other` keeps any spelling this pipeline does
/// not own so it can be reported without being rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItemStatus {
    NotStarted,
    InProgress,
    InReview,
    Done,
    Other(String),
}

impl WorkItemStatus {
    /// Parse a ledger value, accepting the legacy spellings used by planning
    /// tools (`backlog`, `ready-for-dev`, `review`, ...).
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "not-started" | "backlog" | "ready-for-dev" | "drafted" | "todo" => Self::NotStarted,
            "in-progress" => Self::InProgress,
            "in-review" | "review" => Self::InReview,
            "done" | "completed" => Self::Done,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// Canonical ledger spelling.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::InReview => "in-review",
            Self::Done => "done",
            Self::Other(raw) => raw,
        }
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::NotStarted => Some(0),
            Self::InProgress => Some(1),
            Self::InReview => Some(2),
            Self::Done => Some(3),
            Self::Other(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle moving
    /// forward. Unknown statuses never block a transition.
    pub fn allows_transition_to(&self, next: &WorkItemStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(current), Some(next)) => next >= current,
            _ => true,
        }
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for WorkItemStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
