//! Conformance test suite for `ReportStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `ReportStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Insert**: fresh reports, field round-trip, listing order and filters
//! - **Classification**: written exactly once, only from `submitted`
//! - **Dispatch**: claim/record pair enforcing the at-most-one-issue guard
//! - **Stage**: forward-only external updates, URLs set once
//! - **Failure**: failure reachability and operator reopen
//! - **Concurrent**: racing claims for one report, exactly one wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use bugflow_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         SqliteReportStore::open_in_memory().unwrap()
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod dispatch;
mod lifecycle;

use std::fmt;
use std::future::Future;

use crate::record::{Category, Classification, ClassificationRecord, NewReport, Severity};
use crate::ReportStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "insert", "dispatch", "stage").
    pub category: String,
    /// Test name (e.g. "classification_written_once").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ReportStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(lifecycle::run_lifecycle_tests(&factory).await);
    results.extend(dispatch::run_dispatch_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn sample_report(notes: &str) -> NewReport {
    NewReport {
        notes: notes.to_string(),
        expected: Some("the page loads".to_string()),
        actual: Some("blank screen".to_string()),
        severity: Severity::High,
        category: Category::Data,
        screenshots: vec![
            "https://blobs.example/a.png".to_string(),
            "https://blobs.example/b.png".to_string(),
        ],
        diagnostics: Some(serde_json::json!({"url": "/rows", "logs": []})),
    }
}

fn escalated() -> ClassificationRecord {
    ClassificationRecord {
        classification: Classification::Bug,
        confidence: 0.9,
        escalate: true,
    }
}

fn check(cond: bool, msg: &str) -> Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(msg.to_string())
    }
}

fn err<E: fmt::Display>(ctx: &'static str) -> impl Fn(E) -> String {
    move |e| format!("{ctx}: {e}")
}
