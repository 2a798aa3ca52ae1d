use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{BugReport, ClassificationRecord, NewReport, ReportFilter, ReportId};
use crate::transition::{StageOutcome, StageUpdate};

/// The storage trait for bug report backends.
///
/// The report row is the single source of truth for a report's lifecycle.
/// Every mutating method except `insert_report` is a conditional write: it
/// checks the current row against the rules in [`crate::transition`] and
/// returns `Ok(false)` (or [`StageOutcome::Ignored`]) without touching the
/// row when the rule does not hold. Conditional writes are atomic with
/// respect to each other, so two workers racing for the same report cannot
/// both succeed.
///
/// ## At-most-one-issue guard
///
/// Issue creation is bracketed by `claim_dispatch` and `record_issue`.
/// Only the holder of a fresh claim calls the issue tracker, and only the
/// holder can record the resulting URL. Because the claim is persisted, the
/// guard holds across process restarts and across processes sharing a
/// database.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait ReportStore: Send + Sync + 'static {
    /// Persist a new report in `submitted` state and return it.
    async fn insert_report(&self, report: NewReport) -> Result<BugReport, StorageError>;

    /// Read a report. Returns `Err(StorageError::NotFound)` if absent.
    async fn get_report(&self, id: &ReportId) -> Result<BugReport, StorageError>;

    /// List reports, newest first.
    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<BugReport>, StorageError>;

    /// Record the triage classification and move `submitted → classified`.
    async fn record_classification(
        &self,
        id: &ReportId,
        record: ClassificationRecord,
    ) -> Result<bool, StorageError>;

    /// Take the dispatch claim for issue creation.
    ///
    /// `stale_before_ms`: claims taken before this instant are considered
    /// abandoned and may be replaced.
    async fn claim_dispatch(
        &self,
        id: &ReportId,
        token: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<bool, StorageError>;

    /// Record the created issue URL and move `classified → sent`.
    async fn record_issue(
        &self,
        id: &ReportId,
        token: &str,
        issue_url: &str,
    ) -> Result<bool, StorageError>;

    /// Move the report to `failed` with a reason, releasing any claim.
    async fn mark_failed(&self, id: &ReportId, reason: &str) -> Result<bool, StorageError>;

    /// Move a `failed` report without an issue back to `classified` so that
    /// issue creation can be attempted again. A failure recorded with
    /// [`ISSUE_UNCONFIRMED_PREFIX`](crate::ISSUE_UNCONFIRMED_PREFIX) is never
    /// reopened.
    async fn reopen_failed(&self, id: &ReportId) -> Result<bool, StorageError>;

    /// Apply an externally reported stage update, forward-only.
    async fn advance_stage(
        &self,
        id: &ReportId,
        update: &StageUpdate,
    ) -> Result<StageOutcome, StorageError>;
}
