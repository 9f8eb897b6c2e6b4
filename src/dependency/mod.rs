//! Dependency resolution between work items.
//!
//! After a work item is merged and marked done, the resolver finds which
//! dependents have every prerequisite satisfied and reports prerequisite
//! cycles without letting them block the rest of the ledger.

mod graph;
mod resolver;

pub use graph::DependencyGraph;
pub use resolver::{resolve, BlockedItem, DependencyResolutionResult};
