//! Readiness resolution after a work item completes.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::graph::DependencyGraph;
use crate::ledger::{LedgerSnapshot, WorkItemStatus};

/// A dependent work item that still waits on other prerequisites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedItem {
    pub key: String,
    /// Prerequisites that are not yet done (or not present in the ledger).
    pub missing: Vec<String>,
}

/// Result of propagating one completion through the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyResolutionResult {
    /// Work items whose prerequisites are now all done.
    pub ready_keys: Vec<String>,
    /// Dependents of the completed item that are still waiting.
    pub blocked: Vec<BlockedItem>,
    /// Prerequisite cycles found in the ledger, each closed on its first key.
    pub cycles: Vec<Vec<String>>,
}

impl DependencyResolutionResult {
    pub fn blocked_keys(&self) -> Vec<&str> {
        self.blocked.iter().map(|b| b.key.as_str()).collect()
    }
}

/// Compute which work items become ready now that `completed_key` is done.
///
/// `completed_key` is treated as done even if the snapshot predates the
/// ledger update.
pub fn resolve(snapshot: &LedgerSnapshot, completed_key: &str) -> DependencyResolutionResult {
    let completed = snapshot
        .resolve(completed_key)
        .map_or(completed_key, |entry| entry.key.as_str());

    let graph = DependencyGraph::from_snapshot(snapshot);
    let cycles = graph.find_cycles();
    for cycle in &cycles {
        warn!(
            component = "dependency",
            work_item = completed,
            cycle = %cycle.join(" -> "),
            "prerequisite cycle detected"
        );
    }

    let is_completed = |prerequisite: &str| {
        prerequisite == completed_key
            || snapshot
                .resolve(prerequisite)
                .is_some_and(|entry| entry.key == completed)
    };

    let mut result = DependencyResolutionResult {
        cycles,
        ..Default::default()
    };

    let candidates = snapshot.entries().iter().filter(|entry| {
        !entry.is_aggregate()
            && entry.key != completed
            && entry.prerequisites.iter().any(|p| is_completed(p.as_str()))
    });

    for candidate in candidates {
        if matches!(
            candidate.status,
            WorkItemStatus::Done | WorkItemStatus::InProgress
        ) {
            debug!(
                component = "dependency",
                work_item = %candidate.key,
                status = %candidate.status,
                "dependent already started, skipping"
            );
            continue;
        }

        let missing: Vec<String> = candidate
            .prerequisites
            .iter()
            .filter(|p| !is_completed(p.as_str()))
            .filter(|p| !snapshot.status_of(p.as_str()).is_some_and(WorkItemStatus::is_done))
            .cloned()
            .collect();

        if missing.is_empty() {
            info!(
                component = "dependency",
                work_item = %candidate.key,
                unblocked_by = completed,
                "work item is ready"
            );
            result.ready_keys.push(candidate.key.clone());
        } else {
            debug!(
                component = "dependency",
                work_item = %candidate.key,
                missing = %missing.join(", "),
                "work item still blocked"
            );
            result.blocked.push(BlockedItem {
                key: candidate.key.clone(),
                missing,
            });
        }
    }

    result
}
