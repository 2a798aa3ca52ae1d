//! Transition rules shared by every storage backend.
//!
//! Backends apply these checks inside their own atomic section (a write lock
//! for the in-memory store, a conditional `UPDATE` or an immediate
//! transaction for SQLite), so the lifecycle invariants hold regardless of
//! which backend persists the report.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{BugReport, ReportStatus};

/// Prefix of a failure reason recorded when the tracker accepted an issue
/// request but returned no usable reference. Such reports are never reopened.
pub const ISSUE_UNCONFIRMED_PREFIX: &str = "issue may already exist: ";

/// An externally reported lifecycle update (automation callback, webhook).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageUpdate {
    pub status: ReportStatus,
    /// URL attached to the stage: the PR for `pr_created`, the preview
    /// deployment for `preview_ready`.
    pub url: Option<String>,
    /// Failure description for a `failed` update.
    pub reason: Option<String>,
}

impl StageUpdate {
    pub fn new(status: ReportStatus, url: Option<String>) -> Self {
        StageUpdate {
            status,
            url,
            reason: None,
        }
    }
}

/// Why a stage update was not applied. Ignored updates are no-ops, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The requested status is not an externally driven stage.
    NotAStage,
    /// The report has no tracked issue yet.
    NoIssue,
    /// The report is in `failed` and only an operator retry moves it.
    ReportFailed,
    /// The requested status is not ahead of the current one.
    NotForward,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IgnoreReason::NotAStage => "status is not an external stage",
            IgnoreReason::NoIssue => "report has no tracked issue",
            IgnoreReason::ReportFailed => "report is failed",
            IgnoreReason::NotForward => "status is not ahead of the current status",
        };
        f.write_str(text)
    }
}

/// Result of applying a [`StageUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Applied {
        from: ReportStatus,
        to: ReportStatus,
    },
    Ignored {
        current: ReportStatus,
        reason: IgnoreReason,
    },
}

impl StageOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, StageOutcome::Applied { .. })
    }
}

/// The field writes a validated stage update performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub from: ReportStatus,
    pub to: ReportStatus,
    pub github_pr_url: Option<String>,
    pub preview_url: Option<String>,
    pub failure_reason: Option<String>,
}

/// Validate a stage update against the current record.
pub fn plan_stage(report: &BugReport, update: &StageUpdate) -> Result<StagePlan, IgnoreReason> {
    let current = report.status;

    if current == ReportStatus::Failed {
        return Err(IgnoreReason::ReportFailed);
    }

    if update.status == ReportStatus::Failed {
        // Automation can only fail a report it has been handed.
        if current != ReportStatus::Sent {
            return Err(IgnoreReason::NotForward);
        }
        return Ok(StagePlan {
            from: current,
            to: ReportStatus::Failed,
            github_pr_url: None,
            preview_url: None,
            failure_reason: Some(
                update
                    .reason
                    .clone()
                    .unwrap_or_else(|| "remediation failed".to_string()),
            ),
        });
    }

    if !update.status.requires_issue() {
        return Err(IgnoreReason::NotAStage);
    }
    if report.github_issue_url.is_none() {
        return Err(IgnoreReason::NoIssue);
    }
    if update.status.rank() <= current.rank() {
        return Err(IgnoreReason::NotForward);
    }

    // A preview update carries the deployment URL; any other stage carries
    // the PR, which fills the field if an earlier event was missed.
    let url = update.url.clone().filter(|u| !u.trim().is_empty());
    let (github_pr_url, preview_url) = match update.status {
        ReportStatus::PreviewReady if report.preview_url.is_none() => (None, url),
        ReportStatus::PreviewReady => (None, None),
        _ if report.github_pr_url.is_none() => (url, None),
        _ => (None, None),
    };

    Ok(StagePlan {
        from: current,
        to: update.status,
        github_pr_url,
        preview_url,
        failure_reason: None,
    })
}

/// Apply a validated plan to an in-memory record.
pub fn apply_stage(report: &mut BugReport, plan: StagePlan, now: &str) {
    report.status = plan.to;
    if let Some(url) = plan.github_pr_url {
        report.github_pr_url = Some(url);
    }
    if let Some(url) = plan.preview_url {
        report.preview_url = Some(url);
    }
    if let Some(reason) = plan.failure_reason {
        report.failure_reason = Some(reason);
        report.claim_token = None;
        report.claimed_at_ms = None;
    }
    report.updated_at = now.to_string();
}

/// Classification is written once, while the report is still `submitted`.
pub fn can_classify(report: &BugReport) -> bool {
    report.status == ReportStatus::Submitted && report.classification.is_none()
}

/// A worker may claim issue creation for an escalated, issue-less report
/// when nobody holds a claim or the existing claim predates `stale_before_ms`.
pub fn can_claim(report: &BugReport, stale_before_ms: i64) -> bool {
    report.status == ReportStatus::Classified
        && report.escalate == Some(true)
        && report.github_issue_url.is_none()
        && report.claimed_at_ms.map_or(true, |at| at < stale_before_ms)
}

/// The issue URL is recorded only by the current claim holder, only once.
pub fn can_record_issue(report: &BugReport, token: &str) -> bool {
    report.status == ReportStatus::Classified
        && report.github_issue_url.is_none()
        && report.claim_token.as_deref() == Some(token)
}

pub fn can_fail(report: &BugReport) -> bool {
    matches!(
        report.status,
        ReportStatus::Submitted | ReportStatus::Classified | ReportStatus::Sent
    )
}

/// Only a failure that happened before an issue existed can be retried.
pub fn can_reopen(report: &BugReport) -> bool {
    report.status == ReportStatus::Failed
        && report.github_issue_url.is_none()
        && !report
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.starts_with(ISSUE_UNCONFIRMED_PREFIX))
}
