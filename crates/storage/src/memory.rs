//! In-memory ReportStore backed by a `RwLock<HashMap>`.
//!
//! Nothing survives a restart. Used by tests and by `bugflow serve --memory`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{
    now_rfc3339, BugReport, ClassificationRecord, NewReport, ReportFilter, ReportId, ReportStatus,
};
use crate::transition::{self, StageOutcome, StageUpdate};
use crate::ReportStore;

#[derive(Default)]
pub struct MemoryReportStore {
    reports: RwLock<HashMap<ReportId, StoredReport>>,
    next_seq: std::sync::atomic::AtomicU64,
}

/// Insertion sequence keeps "newest first" stable when timestamps collide.
struct StoredReport {
    seq: u64,
    report: BugReport,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a conditional mutation under the write lock.
    async fn update_if<P, M>(&self, id: &ReportId, allowed: P, mutate: M) -> Result<bool, StorageError>
    where
        P: FnOnce(&BugReport) -> bool,
        M: FnOnce(&mut BugReport),
    {
        let mut reports = self.reports.write().await;
        let stored = reports
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound { id: id.clone() })?;
        if !allowed(&stored.report) {
            return Ok(false);
        }
        mutate(&mut stored.report);
        stored.report.updated_at = now_rfc3339();
        Ok(true)
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn insert_report(&self, new: NewReport) -> Result<BugReport, StorageError> {
        let now = now_rfc3339();
        let report = BugReport {
            id: ReportId::generate(),
            status: ReportStatus::Submitted,
            notes: new.notes,
            expected: new.expected,
            actual: new.actual,
            severity: new.severity,
            category: new.category,
            screenshots: new.screenshots,
            diagnostics: new.diagnostics,
            classification: None,
            confidence: None,
            escalate: None,
            github_issue_url: None,
            github_pr_url: None,
            preview_url: None,
            failure_reason: None,
            claim_token: None,
            claimed_at_ms: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.reports.write().await.insert(
            report.id.clone(),
            StoredReport {
                seq,
                report: report.clone(),
            },
        );
        Ok(report)
    }

    async fn get_report(&self, id: &ReportId) -> Result<BugReport, StorageError> {
        self.reports
            .read()
            .await
            .get(id)
            .map(|s| s.report.clone())
            .ok_or_else(|| StorageError::NotFound { id: id.clone() })
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<BugReport>, StorageError> {
        let reports = self.reports.read().await;
        let mut matching: Vec<&StoredReport> = reports
            .values()
            .filter(|s| filter.status.map_or(true, |st| s.report.status == st))
            .collect();
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(matching
            .into_iter()
            .take(limit)
            .map(|s| s.report.clone())
            .collect())
    }

    async fn record_classification(
        &self,
        id: &ReportId,
        record: ClassificationRecord,
    ) -> Result<bool, StorageError> {
        self.update_if(id, transition::can_classify, |r| {
            r.classification = Some(record.classification);
            r.confidence = Some(record.confidence);
            r.escalate = Some(record.escalate);
            r.status = ReportStatus::Classified;
        })
        .await
    }

    async fn claim_dispatch(
        &self,
        id: &ReportId,
        token: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<bool, StorageError> {
        self.update_if(
            id,
            |r| transition::can_claim(r, stale_before_ms),
            |r| {
                r.claim_token = Some(token.to_string());
                r.claimed_at_ms = Some(now_ms);
            },
        )
        .await
    }

    async fn record_issue(
        &self,
        id: &ReportId,
        token: &str,
        issue_url: &str,
    ) -> Result<bool, StorageError> {
        self.update_if(
            id,
            |r| transition::can_record_issue(r, token),
            |r| {
                r.github_issue_url = Some(issue_url.to_string());
                r.status = ReportStatus::Sent;
                r.claim_token = None;
                r.claimed_at_ms = None;
            },
        )
        .await
    }

    async fn mark_failed(&self, id: &ReportId, reason: &str) -> Result<bool, StorageError> {
        self.update_if(id, transition::can_fail, |r| {
            r.status = ReportStatus::Failed;
            r.failure_reason = Some(reason.to_string());
            r.claim_token = None;
            r.claimed_at_ms = None;
        })
        .await
    }

    async fn reopen_failed(&self, id: &ReportId) -> Result<bool, StorageError> {
        self.update_if(id, transition::can_reopen, |r| {
            r.status = ReportStatus::Classified;
            r.escalate = Some(true);
            r.failure_reason = None;
        })
        .await
    }

    async fn advance_stage(
        &self,
        id: &ReportId,
        update: &StageUpdate,
    ) -> Result<StageOutcome, StorageError> {
        let mut reports = self.reports.write().await;
        let stored = reports
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound { id: id.clone() })?;
        match transition::plan_stage(&stored.report, update) {
            Ok(plan) => {
                let (from, to) = (plan.from, plan.to);
                transition::apply_stage(&mut stored.report, plan, &now_rfc3339());
                Ok(StageOutcome::Applied { from, to })
            }
            Err(reason) => Ok(StageOutcome::Ignored {
                current: stored.report.status,
                reason,
            }),
        }
    }
}
