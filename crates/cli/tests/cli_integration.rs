//! CLI integration tests for the operator subcommands.
//!
//! Uses `assert_cmd` to spawn the `bugflow` binary and verify exit codes,
//! stdout content, and stderr content. Every test runs in its own temp
//! directory with a config file pointing the store there, and with the
//! tracker and model credentials removed from the environment.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use bugflow_storage::{ClassificationRecord, NewReport, ReportId, ReportStore, SqliteReportStore};

const CREDENTIAL_VARS: &[&str] = &[
    "GITHUB_TOKEN",
    "GITHUB_REPO",
    "ANTHROPIC_API_KEY",
    "BUGFLOW_API_KEY",
    "BUGFLOW_WEBHOOK_SECRET",
    "BUGFLOW_RATE_LIMIT",
];

/// A temp workspace with a `bugflow.toml` whose database lives inside it.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = format!(
            "[storage]\npath = \"{}\"\n",
            dir.path().join("reports.db").display()
        );
        fs::write(dir.path().join("bugflow.toml"), config).unwrap();
        Workspace { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("reports.db")
    }

    /// Command for the `bugflow` binary, rooted in the workspace.
    fn bugflow(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("bugflow");
        cmd.current_dir(self.path());
        for var in CREDENTIAL_VARS {
            cmd.env_remove(var);
        }
        cmd.env("RUST_LOG", "warn");
        cmd
    }

    /// Insert an escalated report that failed before its issue was created.
    fn seed_failed_report(&self, notes: &str) -> ReportId {
        let db = self.db_path();
        let notes = notes.to_string();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let store = SqliteReportStore::open(&db).unwrap();
            let report = store.insert_report(NewReport::new(notes)).await.unwrap();
            store
                .record_classification(
                    &report.id,
                    ClassificationRecord {
                        classification: bugflow_storage::Classification::Bug,
                        confidence: 0.95,
                        escalate: true,
                    },
                )
                .await
                .unwrap();
            assert!(store
                .mark_failed(&report.id, "issue tracker is not configured")
                .await
                .unwrap());
            report.id
        })
    }
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_lists_subcommands() {
    let ws = Workspace::new();
    ws.bugflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Bug report intake, triage and issue dispatch",
        ))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("recover"))
        .stdout(predicate::str::contains("redact"));
}

#[test]
fn version_exits_0() {
    let ws = Workspace::new();
    ws.bugflow()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bugflow"));
}

// ──────────────────────────────────────────────
// 2. Configuration errors
// ──────────────────────────────────────────────

#[test]
fn invalid_threshold_fails_at_startup() {
    let ws = Workspace::new();
    let config = ws.path().join("bad.toml");
    fs::write(&config, "[triage]\nthreshold = 2.0\n").unwrap();
    ws.bugflow()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("triage.threshold"));
}

#[test]
fn missing_explicit_config_fails() {
    let ws = Workspace::new();
    ws.bugflow()
        .args(["--config", "does-not-exist.toml", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does-not-exist.toml"));
}

#[test]
fn malformed_repo_env_fails() {
    let ws = Workspace::new();
    ws.bugflow()
        .env("GITHUB_REPO", "not-a-repo")
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("owner/name"));
}

#[test]
fn json_errors_are_json() {
    let ws = Workspace::new();
    ws.bugflow()
        .args(["--output", "json", "show", "no-such-report"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""))
        .stderr(predicate::str::contains("report not found"));
}

// ──────────────────────────────────────────────
// 3. Store commands
// ──────────────────────────────────────────────

#[test]
fn list_empty_store() {
    let ws = Workspace::new();
    ws.bugflow()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("no reports"));

    let output = ws
        .bugflow()
        .args(["--output", "json", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn list_rejects_unknown_status() {
    let ws = Workspace::new();
    ws.bugflow()
        .args(["list", "--status", "exploded"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status"));
}

#[test]
fn show_and_list_seeded_report() {
    let ws = Workspace::new();
    let id = ws.seed_failed_report("Checkout button does nothing on Safari");

    ws.bugflow()
        .args(["show", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("bug (0.95)"))
        .stdout(predicate::str::contains("issue tracker is not configured"))
        .stdout(predicate::str::contains("Checkout button does nothing"));

    let output = ws
        .bugflow()
        .args(["--output", "json", "list", "--status", "failed"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = parsed.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["id"], id.as_str());
    assert_eq!(reports[0]["status"], "failed");

    ws.bugflow()
        .args(["list", "--status", "sent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no reports"));
}

#[test]
fn retry_without_tracker_fails_again() {
    let ws = Workspace::new();
    let id = ws.seed_failed_report("Search returns nothing");

    ws.bugflow()
        .args(["retry", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{}: failed", id)));
}

#[test]
fn retry_unknown_report_fails() {
    let ws = Workspace::new();
    ws.bugflow()
        .args(["retry", "no-such-report"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("report not found"));
}

#[test]
fn recover_on_empty_store() {
    let ws = Workspace::new();
    ws.bugflow()
        .arg("recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("recovered 0 report(s)"));
}

// ──────────────────────────────────────────────
// 4. Redaction
// ──────────────────────────────────────────────

#[test]
fn redact_file() {
    let ws = Workspace::new();
    let input = ws.path().join("diag.json");
    fs::write(
        &input,
        r#"{"url":"https://shop.example/cart","headers":{"Authorization":"Bearer abc123"},"user":{"password":"hunter2","name":"Ada"}}"#,
    )
    .unwrap();

    ws.bugflow()
        .arg("redact")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("[REDACTED]"))
        .stdout(predicate::str::contains("https://shop.example/cart"))
        .stdout(predicate::str::contains("Ada"))
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("abc123").not());
}

#[test]
fn redact_stdin_with_configured_keys() {
    let ws = Workspace::new();
    let config = ws.path().join("extra.toml");
    fs::write(&config, "[diagnostics]\nextra_sensitive_keys = [\"email\"]\n").unwrap();

    ws.bugflow()
        .arg("--config")
        .arg(&config)
        .arg("redact")
        .write_stdin(r#"{"userEmail":"ada@example.com","page":"/checkout"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("ada@example.com").not())
        .stdout(predicate::str::contains("/checkout"));
}

#[test]
fn redact_invalid_json_fails() {
    let ws = Workspace::new();
    ws.bugflow()
        .arg("redact")
        .write_stdin("{not json")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid JSON"));
}
