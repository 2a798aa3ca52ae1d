//! Persistence layer for bug reports.
//!
//! [`ReportStore`] is the single seam between the lifecycle service and a
//! backend. Every state change is a conditional write: the backend checks the
//! current status (and, for dispatch, the claim token) and applies the change
//! atomically, returning `false` when the precondition no longer holds.
//!
//! Two backends ship with the crate: [`MemoryReportStore`] for tests and
//! ephemeral runs, and [`SqliteReportStore`] for durable single-node
//! deployments. Both are checked by the [`conformance`] suite.

mod error;
mod memory;
mod record;
mod sqlite;
mod traits;
mod transition;

pub mod conformance;

pub use error::StorageError;
pub use memory::MemoryReportStore;
pub use record::{
    now_rfc3339, now_unix_ms, BugReport, Category, Classification, ClassificationRecord,
    NewReport, ParseEnumError, ReportFilter, ReportId, ReportStatus, Severity,
};
pub use sqlite::SqliteReportStore;
pub use traits::ReportStore;
pub use transition::{IgnoreReason, StageOutcome, StageUpdate, ISSUE_UNCONFIRMED_PREFIX};
