//! Shared wrapper for calls whose failure must never stop a delivery.

use std::fmt::Display;
use std::future::Future;

use tracing::{debug, warn};

/// Await `operation`, logging a failure instead of propagating it.
///
/// Returns `Some(value)` on success and `None` on failure.
pub(crate) async fn non_blocking<T, E, F>(
    component: &str,
    work_item: &str,
    operation: &str,
    future: F,
) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match future.await {
        Ok(value) => {
            debug!(component, work_item, operation, "best-effort call succeeded");
            Some(value)
        }
        Err(err) => {
            warn!(
                component,
                work_item,
                operation,
                tier = "best_effort",
                error = %err,
                "best-effort call failed, continuing"
            );
            None
        }
    }
}
