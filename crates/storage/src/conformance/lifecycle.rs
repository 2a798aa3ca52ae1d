use std::future::Future;

use super::{check, err, escalated, sample_report, TestResult};
use crate::record::{
    Classification, ClassificationRecord, ReportFilter, ReportId, ReportStatus,
};
use crate::transition::{IgnoreReason, StageOutcome, StageUpdate, ISSUE_UNCONFIRMED_PREFIX};
use crate::{ReportStore, StorageError};

pub(super) async fn run_lifecycle_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "insert",
        "insert_starts_submitted",
        insert_starts_submitted(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "insert",
        "insert_round_trips_fields",
        insert_round_trips_fields(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "insert",
        "missing_report_is_not_found",
        missing_report_is_not_found(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "insert",
        "list_is_newest_first_and_filtered",
        list_is_newest_first_and_filtered(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "classification",
        "classification_written_once",
        classification_written_once(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "stage",
        "stages_advance_forward_only",
        stages_advance_forward_only(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "stage",
        "stage_requires_issue",
        stage_requires_issue(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "failure",
        "failed_is_terminal_until_reopened",
        failed_is_terminal_until_reopened(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "failure",
        "shipped_cannot_fail",
        shipped_cannot_fail(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "failure",
        "unconfirmed_issue_is_not_reopened",
        unconfirmed_issue_is_not_reopened(factory().await).await,
    ));

    results
}

/// Drive a fresh report to `sent` with the given issue URL.
pub(super) async fn sent_report<S: ReportStore>(
    store: &S,
    issue_url: &str,
) -> Result<ReportId, String> {
    let report = store
        .insert_report(sample_report("crash on save"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;
    store
        .claim_dispatch(&report.id, "tok", 1_000, 0)
        .await
        .map_err(err("claim"))?;
    let recorded = store
        .record_issue(&report.id, "tok", issue_url)
        .await
        .map_err(err("record_issue"))?;
    check(recorded, "record_issue should apply for the claim holder")?;
    Ok(report.id)
}

async fn insert_starts_submitted<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("button does nothing"))
        .await
        .map_err(err("insert"))?;
    check(
        report.status == ReportStatus::Submitted,
        "new report should be submitted",
    )?;
    check(report.classification.is_none(), "classification should be null")?;
    check(report.github_issue_url.is_none(), "issue url should be null")?;
    check(!report.created_at.is_empty(), "created_at should be set")?;
    Ok(())
}

async fn insert_round_trips_fields<S: ReportStore>(store: S) -> Result<(), String> {
    let input = sample_report("totals are wrong");
    let inserted = store
        .insert_report(input.clone())
        .await
        .map_err(err("insert"))?;
    let read = store.get_report(&inserted.id).await.map_err(err("get"))?;
    check(read == inserted, "read report should equal inserted report")?;
    check(read.notes == input.notes, "notes should round-trip")?;
    check(read.expected == input.expected, "expected should round-trip")?;
    check(read.severity == input.severity, "severity should round-trip")?;
    check(read.category == input.category, "category should round-trip")?;
    check(
        read.screenshots == input.screenshots,
        "screenshots should keep submission order",
    )?;
    check(
        read.diagnostics == input.diagnostics,
        "diagnostics should round-trip",
    )?;
    Ok(())
}

async fn missing_report_is_not_found<S: ReportStore>(store: S) -> Result<(), String> {
    match store.get_report(&ReportId::from("does-not-exist")).await {
        Err(StorageError::NotFound { .. }) => {}
        other => return Err(format!("expected NotFound from get, got {:?}", other)),
    }
    match store.mark_failed(&ReportId::from("does-not-exist"), "x").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound from mark_failed, got {:?}", other)),
    }
}

async fn list_is_newest_first_and_filtered<S: ReportStore>(store: S) -> Result<(), String> {
    let first = store
        .insert_report(sample_report("first"))
        .await
        .map_err(err("insert"))?;
    let second = store
        .insert_report(sample_report("second"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&first.id, escalated())
        .await
        .map_err(err("classify"))?;

    let all = store
        .list_reports(&ReportFilter::default())
        .await
        .map_err(err("list"))?;
    check(all.len() == 2, "expected two reports")?;
    check(all[0].id == second.id, "newest report should come first")?;

    let classified = store
        .list_reports(&ReportFilter {
            status: Some(ReportStatus::Classified),
            limit: None,
        })
        .await
        .map_err(err("list"))?;
    check(
        classified.len() == 1 && classified[0].id == first.id,
        "status filter should select the classified report",
    )?;

    let limited = store
        .list_reports(&ReportFilter {
            status: None,
            limit: Some(1),
        })
        .await
        .map_err(err("list"))?;
    check(limited.len() == 1, "limit should cap the result")?;
    Ok(())
}

async fn classification_written_once<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("please add dark mode"))
        .await
        .map_err(err("insert"))?;
    let first = ClassificationRecord {
        classification: Classification::FeatureRequest,
        confidence: 0.85,
        escalate: false,
    };
    let applied = store
        .record_classification(&report.id, first)
        .await
        .map_err(err("classify"))?;
    check(applied, "first classification should apply")?;

    let second = ClassificationRecord {
        classification: Classification::Bug,
        confidence: 0.1,
        escalate: true,
    };
    let applied = store
        .record_classification(&report.id, second)
        .await
        .map_err(err("classify"))?;
    check(!applied, "second classification must be rejected")?;

    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(
        read.classification == Some(Classification::FeatureRequest),
        "classification must not be overwritten",
    )?;
    check(read.confidence == Some(0.85), "confidence must not be overwritten")?;
    check(read.escalate == Some(false), "escalate must not be overwritten")?;
    check(
        read.status == ReportStatus::Classified,
        "status should be classified",
    )?;
    Ok(())
}

async fn stages_advance_forward_only<S: ReportStore>(store: S) -> Result<(), String> {
    let id = sent_report(&store, "https://tracker.example/issues/1").await?;

    let pr = StageUpdate::new(
        ReportStatus::PrCreated,
        Some("https://tracker.example/pull/2".to_string()),
    );
    let outcome = store.advance_stage(&id, &pr).await.map_err(err("stage"))?;
    check(
        outcome
            == StageOutcome::Applied {
                from: ReportStatus::Sent,
                to: ReportStatus::PrCreated,
            },
        "pr_created should apply after sent",
    )?;

    let preview = StageUpdate::new(
        ReportStatus::PreviewReady,
        Some("https://preview.example/2".to_string()),
    );
    store
        .advance_stage(&id, &preview)
        .await
        .map_err(err("stage"))?;

    let late_pr = StageUpdate::new(
        ReportStatus::PrCreated,
        Some("https://tracker.example/pull/99".to_string()),
    );
    let outcome = store
        .advance_stage(&id, &late_pr)
        .await
        .map_err(err("stage"))?;
    check(
        outcome
            == StageOutcome::Ignored {
                current: ReportStatus::PreviewReady,
                reason: IgnoreReason::NotForward,
            },
        "earlier stage after a later one must be ignored",
    )?;

    let read = store.get_report(&id).await.map_err(err("get"))?;
    check(
        read.status == ReportStatus::PreviewReady,
        "status must not regress",
    )?;
    check(
        read.github_pr_url.as_deref() == Some("https://tracker.example/pull/2"),
        "pr url must not be replaced",
    )?;
    check(
        read.preview_url.as_deref() == Some("https://preview.example/2"),
        "preview url should be set",
    )?;
    check(
        read.github_issue_url.as_deref() == Some("https://tracker.example/issues/1"),
        "issue url must be preserved",
    )?;
    Ok(())
}

async fn stage_requires_issue<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("no issue yet"))
        .await
        .map_err(err("insert"))?;
    let outcome = store
        .advance_stage(&report.id, &StageUpdate::new(ReportStatus::Shipped, None))
        .await
        .map_err(err("stage"))?;
    check(
        !outcome.is_applied(),
        "stage update without an issue must be ignored",
    )?;
    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(
        read.status == ReportStatus::Submitted,
        "status must be unchanged",
    )
}

async fn failed_is_terminal_until_reopened<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("tracker will fail"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;
    let failed = store
        .mark_failed(&report.id, "tracker returned 401")
        .await
        .map_err(err("fail"))?;
    check(failed, "classified report should fail")?;

    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(read.status == ReportStatus::Failed, "status should be failed")?;
    check(
        read.failure_reason.as_deref() == Some("tracker returned 401"),
        "failure reason should be recorded",
    )?;

    let claimed = store
        .claim_dispatch(&report.id, "tok", 1_000, 0)
        .await
        .map_err(err("claim"))?;
    check(!claimed, "failed report cannot be claimed")?;

    let reopened = store.reopen_failed(&report.id).await.map_err(err("reopen"))?;
    check(reopened, "failed report without issue should reopen")?;
    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(
        read.status == ReportStatus::Classified && read.failure_reason.is_none(),
        "reopened report should be classified without failure reason",
    )?;
    check(
        read.classification == Some(Classification::Bug),
        "reopen keeps the classification",
    )?;
    Ok(())
}

async fn shipped_cannot_fail<S: ReportStore>(store: S) -> Result<(), String> {
    let id = sent_report(&store, "https://tracker.example/issues/5").await?;
    store
        .advance_stage(&id, &StageUpdate::new(ReportStatus::Shipped, None))
        .await
        .map_err(err("stage"))?;
    let failed = store.mark_failed(&id, "late").await.map_err(err("fail"))?;
    check(!failed, "shipped report must not move to failed")?;
    let reopened = store.reopen_failed(&id).await.map_err(err("reopen"))?;
    check(!reopened, "non-failed report must not reopen")
}

async fn unconfirmed_issue_is_not_reopened<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("tracker answered without a url"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;
    let reason = format!("{}response has no html_url", ISSUE_UNCONFIRMED_PREFIX);
    let failed = store
        .mark_failed(&report.id, &reason)
        .await
        .map_err(err("fail"))?;
    check(failed, "classified report should fail")?;

    let reopened = store.reopen_failed(&report.id).await.map_err(err("reopen"))?;
    check(!reopened, "failure after an accepted issue request must not reopen")?;
    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(
        read.status == ReportStatus::Failed && read.failure_reason.as_deref() == Some(&*reason),
        "report should stay failed with its reason",
    )
}
