//! The bug report state machine.
//!
//! [`ReportService`] owns every lifecycle transition:
//!
//! ```text
//! submitted ─▶ classified ─▶ sent ─▶ pr_created ─▶ preview_ready ─▶ shipped
//!     │            │          │
//!     └────────────┴──────────┴──▶ failed ──(retry)──▶ classified
//! ```
//!
//! `submitted → classified` runs the triage classifier once. `classified →
//! sent` creates the tracked issue when the decision matrix escalates. Later
//! stages are reported by external automation. Every write goes through a
//! conditional store operation, and issue creation is bracketed by a
//! persisted claim, so a crash at any point leaves a report that
//! [`ReportService::recover`] can safely pick up again.

mod locks;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bugflow_storage::{
    now_unix_ms, BugReport, Category, ClassificationRecord, NewReport, ReportFilter, ReportId,
    ReportStatus, ReportStore, Severity, StageOutcome, StageUpdate, StorageError,
    ISSUE_UNCONFIRMED_PREFIX,
};

use crate::attachments::{is_inline, ScreenshotStore};
use crate::diagnostics::RedactionPolicy;
use crate::notify::{TriageNotice, TriageNotifier};
use crate::tracker::{IssueDraft, IssueTemplate, IssueTracker};
use crate::triage::{decide, needs_review, ReportText, TriageClassifier, DEFAULT_THRESHOLD};

use locks::ReportLocks;

/// Default dispatch claim lease: 10 minutes.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(600);

const DEFAULT_MAX_NOTES_CHARS: usize = 10_000;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("invalid automation update: {0}")]
    InvalidUpdate(String),

    #[error("report {id} is {status}; only failed reports known to have no issue can be retried")]
    NotRetryable { id: ReportId, status: ReportStatus },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Inbound report payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub notes: String,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub category: Category,
    /// Blob references or inline `data:` URLs, in display order.
    #[serde(default)]
    pub screenshots: Vec<String>,
    /// Unredacted diagnostics snapshot, as an object or a JSON string.
    #[serde(default)]
    pub diagnostics: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub id: ReportId,
    pub status: ReportStatus,
    pub created_at: String,
}

/// What status-polling clients see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub id: ReportId,
    pub status: ReportStatus,
    pub github_issue_url: Option<String>,
    pub github_pr_url: Option<String>,
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&BugReport> for StatusView {
    fn from(r: &BugReport) -> Self {
        StatusView {
            id: r.id.clone(),
            status: r.status,
            github_issue_url: r.github_issue_url.clone(),
            github_pr_url: r.github_pr_url.clone(),
            preview_url: r.preview_url.clone(),
            failure_reason: r.failure_reason.clone(),
        }
    }
}

/// Status report from the external remediation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationUpdate {
    pub report_id: ReportId,
    #[serde(alias = "status")]
    pub new_status: ReportStatus,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Confidence at or above which a feature request is not escalated.
    pub threshold: f64,
    /// Age after which a dispatch claim is considered abandoned.
    pub claim_lease: Duration,
    pub max_notes_chars: usize,
    pub redaction: RedactionPolicy,
    pub issue_template: IssueTemplate,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            threshold: DEFAULT_THRESHOLD,
            claim_lease: DEFAULT_CLAIM_LEASE,
            max_notes_chars: DEFAULT_MAX_NOTES_CHARS,
            redaction: RedactionPolicy::default(),
            issue_template: IssueTemplate::default(),
        }
    }
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct ReportService {
    store: Arc<dyn ReportStore>,
    classifier: Arc<dyn TriageClassifier>,
    tracker: Arc<dyn IssueTracker>,
    notifier: Option<Arc<dyn TriageNotifier>>,
    screenshots: Option<Arc<dyn ScreenshotStore>>,
    config: ServiceConfig,
    locks: ReportLocks,
}

impl ReportService {
    pub fn new(
        store: Arc<dyn ReportStore>,
        classifier: Arc<dyn TriageClassifier>,
        tracker: Arc<dyn IssueTracker>,
        config: ServiceConfig,
    ) -> Self {
        ReportService {
            store,
            classifier,
            tracker,
            notifier: None,
            screenshots: None,
            config,
            locks: ReportLocks::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TriageNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_screenshot_store(mut self, store: Arc<dyn ScreenshotStore>) -> Self {
        self.screenshots = Some(store);
        self
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ── Submission ──────────────────────────────────────────────────────────

    /// Validate, redact and persist a submission in `submitted` state.
    ///
    /// Returns as soon as the report is durable. Diagnostics and screenshot
    /// problems never fail the submission; they are logged and dropped.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReceipt, LifecycleError> {
        let notes = submission.notes.trim().to_string();
        if notes.is_empty() {
            return Err(LifecycleError::InvalidSubmission(
                "notes must not be empty".to_string(),
            ));
        }
        if notes.chars().count() > self.config.max_notes_chars {
            return Err(LifecycleError::InvalidSubmission(format!(
                "notes exceed {} characters",
                self.config.max_notes_chars
            )));
        }

        let diagnostics = submission
            .diagnostics
            .and_then(parse_diagnostics)
            .map(|v| self.config.redaction.redact_value(v).into_value());
        let screenshots = self.store_screenshots(submission.screenshots).await;

        let report = self
            .store
            .insert_report(NewReport {
                notes,
                expected: non_blank(submission.expected),
                actual: non_blank(submission.actual),
                severity: submission.severity,
                category: submission.category,
                screenshots,
                diagnostics,
            })
            .await?;

        tracing::info!(
            report_id = %report.id,
            severity = %report.severity,
            category = %report.category,
            "report submitted"
        );
        Ok(SubmissionReceipt {
            id: report.id,
            status: report.status,
            created_at: report.created_at,
        })
    }

    /// [`Self::submit`], then run the pipeline as a background task.
    pub async fn submit_and_dispatch(
        self: &Arc<Self>,
        submission: Submission,
    ) -> Result<SubmissionReceipt, LifecycleError> {
        let receipt = self.submit(submission).await?;
        self.spawn_process(receipt.id.clone());
        Ok(receipt)
    }

    /// Run [`Self::process`] for one report on a background task.
    pub fn spawn_process(self: &Arc<Self>, id: ReportId) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.process(&id).await {
                tracing::error!(report_id = %id, error = %e, "report pipeline failed");
            }
        })
    }

    async fn store_screenshots(&self, entries: Vec<String>) -> Vec<String> {
        let mut refs = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.trim().to_string();
            if entry.is_empty() {
                continue;
            }
            if !is_inline(&entry) {
                refs.push(entry);
                continue;
            }
            match &self.screenshots {
                Some(store) => match store.save(&entry).await {
                    Ok(reference) => refs.push(reference),
                    Err(e) => tracing::warn!(error = %e, "screenshot dropped"),
                },
                None => tracing::warn!("inline screenshot dropped: no screenshot store configured"),
            }
        }
        refs
    }

    // ── Pipeline ────────────────────────────────────────────────────────────

    /// Drive one report as far as the core can take it.
    ///
    /// Safe to call any number of times, concurrently or after a crash: a
    /// `submitted` report is classified, an escalated `classified` report
    /// without an issue gets one, and anything else is left alone.
    pub async fn process(&self, id: &ReportId) -> Result<ReportStatus, LifecycleError> {
        let _guard = self.locks.acquire(id).await;

        let mut report = self.store.get_report(id).await?;
        if report.status == ReportStatus::Submitted {
            self.classify(&report).await?;
            report = self.store.get_report(id).await?;
        }

        if awaits_issue(&report) {
            self.dispatch(&report).await?;
            report = self.store.get_report(id).await?;
        }

        Ok(report.status)
    }

    async fn classify(&self, report: &BugReport) -> Result<(), LifecycleError> {
        let text = ReportText::from_report(report);
        let verdict = self.classifier.classify(&text).await;
        let disposition = decide(&verdict, self.config.threshold, &text);
        let escalate = disposition.escalates();

        let applied = self
            .store
            .record_classification(
                &report.id,
                ClassificationRecord {
                    classification: verdict.classification,
                    confidence: verdict.confidence,
                    escalate,
                },
            )
            .await?;
        if !applied {
            tracing::debug!(report_id = %report.id, "classification already recorded");
            return Ok(());
        }

        tracing::info!(
            report_id = %report.id,
            classification = %verdict.classification,
            confidence = verdict.confidence,
            fallback = verdict.fallback,
            ?disposition,
            "report classified"
        );

        if needs_review(&verdict, self.config.threshold) {
            if let Some(notifier) = &self.notifier {
                let notice = TriageNotice {
                    report_id: report.id.clone(),
                    classification: verdict.classification,
                    confidence: verdict.confidence,
                    notes: report.notes.clone(),
                    escalated: escalate,
                };
                if let Err(e) = notifier.notify(&notice).await {
                    tracing::warn!(report_id = %report.id, error = %e, "triage notification failed");
                }
            }
        }
        Ok(())
    }

    async fn dispatch(&self, report: &BugReport) -> Result<(), LifecycleError> {
        let token = uuid::Uuid::new_v4().to_string();
        let now = now_unix_ms();
        let stale_before = now.saturating_sub(self.config.claim_lease.as_millis() as i64);

        if !self
            .store
            .claim_dispatch(&report.id, &token, now, stale_before)
            .await?
        {
            tracing::debug!(report_id = %report.id, "dispatch claimed by another worker");
            return Ok(());
        }

        let draft = IssueDraft::for_report(report, &self.config.issue_template);
        match self.tracker.create_issue(&draft).await {
            Ok(issue) => {
                let recorded = self
                    .store
                    .record_issue(&report.id, &token, &issue.url)
                    .await?;
                if recorded {
                    tracing::info!(report_id = %report.id, url = %issue.url, "report sent");
                } else {
                    tracing::error!(
                        report_id = %report.id,
                        url = %issue.url,
                        "issue created but dispatch claim was lost"
                    );
                }
            }
            Err(e) if e.issue_may_exist() => {
                let reason = format!("{}{}", ISSUE_UNCONFIRMED_PREFIX, e);
                self.store.mark_failed(&report.id, &reason).await?;
                tracing::error!(
                    report_id = %report.id,
                    error = %e,
                    "report failed; tracker accepted the request, retry disabled"
                );
            }
            Err(e) => {
                self.store.mark_failed(&report.id, &e.to_string()).await?;
                tracing::error!(report_id = %report.id, error = %e, "report failed");
            }
        }
        Ok(())
    }

    // ── Reads and external updates ──────────────────────────────────────────

    pub async fn status(&self, id: &ReportId) -> Result<StatusView, LifecycleError> {
        let report = self.store.get_report(id).await?;
        Ok(StatusView::from(&report))
    }

    pub async fn list(&self, filter: &ReportFilter) -> Result<Vec<BugReport>, LifecycleError> {
        Ok(self.store.list_reports(filter).await?)
    }

    /// Apply a forward-only stage update. Out-of-order and backward updates
    /// are ignored, not errors.
    pub async fn apply_automation_update(
        &self,
        update: AutomationUpdate,
    ) -> Result<StageOutcome, LifecycleError> {
        if let Some(url) = update.url.as_deref() {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(LifecycleError::InvalidUpdate(format!(
                    "url must be absolute http(s): {}",
                    url
                )));
            }
        }

        let _guard = self.locks.acquire(&update.report_id).await;
        let stage = StageUpdate {
            status: update.new_status,
            url: update.url,
            reason: update.reason,
        };
        let outcome = self.store.advance_stage(&update.report_id, &stage).await?;
        match &outcome {
            StageOutcome::Applied { from, to } => {
                tracing::info!(report_id = %update.report_id, %from, %to, "stage advanced");
            }
            StageOutcome::Ignored { current, reason } => {
                tracing::info!(
                    report_id = %update.report_id,
                    %current,
                    requested = %stage.status,
                    %reason,
                    "stage update ignored"
                );
            }
        }
        Ok(outcome)
    }

    // ── Recovery ────────────────────────────────────────────────────────────

    /// Reopen a failed report that never got an issue and run it again.
    pub async fn retry_failed(&self, id: &ReportId) -> Result<ReportStatus, LifecycleError> {
        let reopened = {
            let _guard = self.locks.acquire(id).await;
            self.store.reopen_failed(id).await?
        };
        if !reopened {
            let report = self.store.get_report(id).await?;
            return Err(LifecycleError::NotRetryable {
                id: id.clone(),
                status: report.status,
            });
        }
        tracing::info!(report_id = %id, "failed report reopened");
        self.process(id).await
    }

    /// Reprocess every report a crashed or restarted worker may have left
    /// behind. Reports are processed concurrently. Returns how many of them
    /// moved to a new status; a report whose dispatch claim is still fresh
    /// is left for a later sweep and not counted.
    pub async fn recover(self: &Arc<Self>) -> Result<usize, LifecycleError> {
        let mut pending: Vec<(ReportId, ReportStatus)> = Vec::new();
        for status in [ReportStatus::Submitted, ReportStatus::Classified] {
            let reports = self
                .store
                .list_reports(&ReportFilter {
                    status: Some(status),
                    limit: None,
                })
                .await?;
            pending.extend(
                reports
                    .into_iter()
                    .filter(|r| r.status == ReportStatus::Submitted || awaits_issue(r))
                    .map(|r| (r.id, r.status)),
            );
        }

        let handles: Vec<_> = pending
            .into_iter()
            .map(|(id, before)| {
                let service = Arc::clone(self);
                tokio::spawn(async move {
                    match service.process(&id).await {
                        Ok(after) => after != before,
                        Err(e) => {
                            tracing::error!(report_id = %id, error = %e, "report pipeline failed");
                            false
                        }
                    }
                })
            })
            .collect();

        let mut advanced = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => advanced += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "recovery task panicked"),
            }
        }

        if advanced > 0 {
            tracing::info!(count = advanced, "recovered pending reports");
        }
        Ok(advanced)
    }
}

fn awaits_issue(report: &BugReport) -> bool {
    report.status == ReportStatus::Classified
        && report.escalate == Some(true)
        && report.github_issue_url.is_none()
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Accept diagnostics as an object or as a JSON-encoded string. Anything
/// unparseable is dropped.
fn parse_diagnostics(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "diagnostics dropped: not valid JSON");
                None
            }
        },
        other => Some(other),
    }
}
