//! Status ledger adapter.
//!
//! The ledger is a shared, human-editable text file mapping work item keys
//! to lifecycle statuses, one `key: status` per line. Prerequisites are
//! declared in a trailing comment:
//!
//! ```text
//! development_status:
//!   7-1-login-form: done
//!   7-2-session-refresh: backlog  # depends-on: 7-1
//! ```
//!
//! Only the status token of a single line is ever rewritten; every other
//! byte of the file is preserved.

mod status;
mod store;

pub use status::WorkItemStatus;
pub use store::{
    is_aggregate_key, LedgerEntry, LedgerError, LedgerResult, LedgerSnapshot, LedgerUpdate,
    StatusLedger,
};
