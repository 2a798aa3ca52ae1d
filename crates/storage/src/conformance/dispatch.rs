use std::future::Future;

use super::{check, err, escalated, sample_report, TestResult};
use crate::record::{Classification, ClassificationRecord, ReportStatus};
use crate::ReportStore;

pub(super) async fn run_dispatch_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "dispatch",
        "claim_then_record_moves_to_sent",
        claim_then_record_moves_to_sent(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "dispatch",
        "fresh_claim_blocks_second_worker",
        fresh_claim_blocks_second_worker(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "dispatch",
        "stale_claim_can_be_retaken",
        stale_claim_can_be_retaken(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "dispatch",
        "issue_url_set_at_most_once",
        issue_url_set_at_most_once(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "dispatch",
        "skipped_report_is_never_claimed",
        skipped_report_is_never_claimed(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "dispatch",
        "unclassified_report_is_never_claimed",
        unclassified_report_is_never_claimed(factory().await).await,
    ));

    results
}

async fn claim_then_record_moves_to_sent<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("save fails"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;
    let claimed = store
        .claim_dispatch(&report.id, "worker-a", 10_000, 0)
        .await
        .map_err(err("claim"))?;
    check(claimed, "first claim should succeed")?;

    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(
        read.claim_token.as_deref() == Some("worker-a"),
        "claim token should be persisted",
    )?;
    check(read.claimed_at_ms == Some(10_000), "claim time should be persisted")?;

    let recorded = store
        .record_issue(&report.id, "worker-a", "https://tracker.example/issues/7")
        .await
        .map_err(err("record"))?;
    check(recorded, "claim holder should record the issue")?;

    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(read.status == ReportStatus::Sent, "status should be sent")?;
    check(
        read.github_issue_url.as_deref() == Some("https://tracker.example/issues/7"),
        "issue url should be set",
    )?;
    check(
        read.claim_token.is_none() && read.claimed_at_ms.is_none(),
        "claim should be released",
    )?;
    Ok(())
}

async fn fresh_claim_blocks_second_worker<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("double dispatch"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;
    store
        .claim_dispatch(&report.id, "worker-a", 10_000, 0)
        .await
        .map_err(err("claim"))?;
    // The second worker considers claims older than 5_000 stale; 10_000 is fresh.
    let claimed = store
        .claim_dispatch(&report.id, "worker-b", 11_000, 5_000)
        .await
        .map_err(err("claim"))?;
    check(!claimed, "fresh claim must block a second worker")?;

    let recorded = store
        .record_issue(&report.id, "worker-b", "https://tracker.example/issues/8")
        .await
        .map_err(err("record"))?;
    check(!recorded, "non-holder must not record an issue")
}

async fn stale_claim_can_be_retaken<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("crashed worker"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;
    store
        .claim_dispatch(&report.id, "worker-a", 1_000, 0)
        .await
        .map_err(err("claim"))?;
    let claimed = store
        .claim_dispatch(&report.id, "worker-b", 900_000, 600_000)
        .await
        .map_err(err("claim"))?;
    check(claimed, "stale claim should be replaceable")?;

    let recorded = store
        .record_issue(&report.id, "worker-a", "https://tracker.example/issues/9")
        .await
        .map_err(err("record"))?;
    check(!recorded, "the displaced worker must not record an issue")?;
    let recorded = store
        .record_issue(&report.id, "worker-b", "https://tracker.example/issues/9")
        .await
        .map_err(err("record"))?;
    check(recorded, "the new holder records the issue")
}

async fn issue_url_set_at_most_once<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("once"))
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
    store
        .record_issue(&report.id, "tok", "https://tracker.example/issues/1")
        .await
        .map_err(err("record"))?;

    let again = store
        .record_issue(&report.id, "tok", "https://tracker.example/issues/2")
        .await
        .map_err(err("record"))?;
    check(!again, "second record_issue must be rejected")?;
    let reclaim = store
        .claim_dispatch(&report.id, "tok-2", 2_000, i64::MAX)
        .await
        .map_err(err("claim"))?;
    check(!reclaim, "report with an issue cannot be claimed")?;

    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(
        read.github_issue_url.as_deref() == Some("https://tracker.example/issues/1"),
        "issue url must not be replaced",
    )
}

async fn skipped_report_is_never_claimed<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("feature idea"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(
            &report.id,
            ClassificationRecord {
                classification: Classification::FeatureRequest,
                confidence: 0.95,
                escalate: false,
            },
        )
        .await
        .map_err(err("classify"))?;
    let claimed = store
        .claim_dispatch(&report.id, "tok", 1_000, i64::MAX)
        .await
        .map_err(err("claim"))?;
    check(!claimed, "non-escalated report must never be claimed")
}

async fn unclassified_report_is_never_claimed<S: ReportStore>(store: S) -> Result<(), String> {
    let report = store
        .insert_report(sample_report("not triaged"))
        .await
        .map_err(err("insert"))?;
    let claimed = store
        .claim_dispatch(&report.id, "tok", 1_000, i64::MAX)
        .await
        .map_err(err("claim"))?;
    check(!claimed, "submitted report must not be claimed")
}
