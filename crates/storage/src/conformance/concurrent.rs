use std::future::Future;
use std::sync::Arc;

use super::{check, err, escalated, sample_report, TestResult};
use crate::record::{Classification, ClassificationRecord, ReportStatus};
use crate::ReportStore;

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ReportStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_claims_exactly_one_wins",
        concurrent_claims_exactly_one_wins(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_classification_exactly_one_wins",
        concurrent_classification_exactly_one_wins(factory().await).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_reports_are_independent",
        concurrent_reports_are_independent(factory().await).await,
    ));

    results
}

// ── Concurrent claims: exactly one wins ─────────────────────────────────────

/// N tasks race `claim_dispatch` for the same report. Exactly one claim is
/// granted, and only that worker can record an issue.
async fn concurrent_claims_exactly_one_wins<S: ReportStore>(store: S) -> Result<(), String> {
    let store = Arc::new(store);
    let report = store
        .insert_report(sample_report("raced"))
        .await
        .map_err(err("insert"))?;
    store
        .record_classification(&report.id, escalated())
        .await
        .map_err(err("classify"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        let id = report.id.clone();
        handles.push(tokio::spawn(async move {
            let token = format!("worker-{i}");
            let won = s.claim_dispatch(&id, &token, 1_000 + i as i64, 0).await?;
            if won {
                let url = format!("https://tracker.example/issues/{i}");
                s.record_issue(&id, &token, &url).await?;
            }
            Ok::<bool, crate::StorageError>(won)
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    check(winners == 1, &format!("expected exactly 1 winner, got {winners}"))?;

    let read = store.get_report(&report.id).await.map_err(err("get"))?;
    check(read.status == ReportStatus::Sent, "winner should reach sent")?;
    check(read.github_issue_url.is_some(), "winner should set the issue url")
}

async fn concurrent_classification_exactly_one_wins<S: ReportStore>(
    store: S,
) -> Result<(), String> {
    let store = Arc::new(store);
    let report = store
        .insert_report(sample_report("classified twice"))
        .await
        .map_err(err("insert"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        let id = report.id.clone();
        handles.push(tokio::spawn(async move {
            let record = ClassificationRecord {
                classification: Classification::Ambiguous,
                confidence: i as f64 / N as f64,
                escalate: true,
            };
            s.record_classification(&id, record).await
        }));
    }

    let mut applied = 0usize;
    for handle in handles {
        if handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?
        {
            applied += 1;
        }
    }
    check(
        applied == 1,
        &format!("expected exactly 1 classification, got {applied}"),
    )
}

async fn concurrent_reports_are_independent<S: ReportStore>(store: S) -> Result<(), String> {
    let store = Arc::new(store);
    let mut ids = Vec::new();
    for i in 0..N {
        let report = store
            .insert_report(sample_report(&format!("report {i}")))
            .await
            .map_err(err("insert"))?;
        store
            .record_classification(&report.id, escalated())
            .await
            .map_err(err("classify"))?;
        ids.push(report.id);
    }

    let mut handles = Vec::new();
    for (i, id) in ids.iter().cloned().enumerate() {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.claim_dispatch(&id, &format!("w{i}"), 1_000, 0).await
        }));
    }
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        check(won, "claims on distinct reports should all succeed")?;
    }
    Ok(())
}
