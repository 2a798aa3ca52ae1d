//! SQLite ReportStore.
//!
//! A single connection lives behind a mutex and every call runs inside
//! `tokio::task::spawn_blocking`. Conditional writes are single
//! `UPDATE ... WHERE` statements whose changed-row count decides the outcome;
//! the `WHERE` clauses mirror the predicates in [`crate::transition`].

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::error::StorageError;
use crate::record::{
    now_rfc3339, BugReport, Classification, ClassificationRecord, NewReport, ReportFilter, ReportId,
    ReportStatus,
};
use crate::transition::{self, StageOutcome, StageUpdate, ISSUE_UNCONFIRMED_PREFIX};
use crate::ReportStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bug_reports (
    id               TEXT PRIMARY KEY,
    status           TEXT NOT NULL,
    notes            TEXT NOT NULL,
    expected         TEXT,
    actual           TEXT,
    severity         TEXT NOT NULL,
    category         TEXT NOT NULL,
    screenshots      TEXT NOT NULL,
    diagnostics      TEXT,
    classification   TEXT,
    confidence       REAL,
    escalate         INTEGER,
    github_issue_url TEXT,
    github_pr_url    TEXT,
    preview_url      TEXT,
    failure_reason   TEXT,
    claim_token      TEXT,
    claimed_at_ms    INTEGER,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS bug_reports_status ON bug_reports(status);
";

const SELECT_COLUMNS: &str = "id, status, notes, expected, actual, severity, category, \
     screenshots, diagnostics, classification, confidence, escalate, github_issue_url, \
     github_pr_url, preview_url, failure_reason, claim_token, claimed_at_ms, created_at, \
     updated_at";

pub struct SqliteReportStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReportStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::init(conn)
    }

    /// A private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteReportStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Backend("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("task join error: {}", e)))?
    }

    /// Execute a conditional UPDATE. Zero changed rows means either the
    /// precondition failed (`Ok(false)`) or the report does not exist.
    async fn conditional_update<P>(
        &self,
        id: &ReportId,
        sql: &'static str,
        params: P,
    ) -> Result<bool, StorageError>
    where
        P: rusqlite::Params + Send + 'static,
    {
        let id = id.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(sql, params)?;
            if changed > 0 {
                return Ok(true);
            }
            ensure_exists(conn, &id)?;
            Ok(false)
        })
        .await
    }
}

fn ensure_exists(conn: &Connection, id: &ReportId) -> Result<(), StorageError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM bug_reports WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(StorageError::NotFound { id: id.clone() }),
    }
}

fn load(conn: &Connection, id: &ReportId) -> Result<BugReport, StorageError> {
    let sql = format!("SELECT {} FROM bug_reports WHERE id = ?1", SELECT_COLUMNS);
    let raw = conn
        .query_row(&sql, params![id.as_str()], RawRow::from_row)
        .optional()?;
    match raw {
        Some(raw) => raw.into_report(),
        None => Err(StorageError::NotFound { id: id.clone() }),
    }
}

/// Column values as stored, before enum and JSON decoding.
struct RawRow {
    id: String,
    status: String,
    notes: String,
    expected: Option<String>,
    actual: Option<String>,
    severity: String,
    category: String,
    screenshots: String,
    diagnostics: Option<String>,
    classification: Option<String>,
    confidence: Option<f64>,
    escalate: Option<bool>,
    github_issue_url: Option<String>,
    github_pr_url: Option<String>,
    preview_url: Option<String>,
    failure_reason: Option<String>,
    claim_token: Option<String>,
    claimed_at_ms: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRow {
            id: row.get(0)?,
            status: row.get(1)?,
            notes: row.get(2)?,
            expected: row.get(3)?,
            actual: row.get(4)?,
            severity: row.get(5)?,
            category: row.get(6)?,
            screenshots: row.get(7)?,
            diagnostics: row.get(8)?,
            classification: row.get(9)?,
            confidence: row.get(10)?,
            escalate: row.get(11)?,
            github_issue_url: row.get(12)?,
            github_pr_url: row.get(13)?,
            preview_url: row.get(14)?,
            failure_reason: row.get(15)?,
            claim_token: row.get(16)?,
            claimed_at_ms: row.get(17)?,
            created_at: row.get(18)?,
            updated_at: row.get(19)?,
        })
    }

    fn into_report(self) -> Result<BugReport, StorageError> {
        let id = self.id.clone();
        let corrupt = |message: String| StorageError::Corrupt {
            id: id.clone(),
            message,
        };

        let screenshots: Vec<String> = serde_json::from_str(&self.screenshots)
            .map_err(|e| corrupt(format!("screenshots: {}", e)))?;
        let diagnostics: Option<serde_json::Value> = self
            .diagnostics
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("diagnostics: {}", e)))?;
        let classification: Option<Classification> = self
            .classification
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e| corrupt(format!("{}", e)))?;

        Ok(BugReport {
            id: ReportId::from(self.id),
            status: self.status.parse().map_err(|e| corrupt(format!("{}", e)))?,
            notes: self.notes,
            expected: self.expected,
            actual: self.actual,
            severity: self.severity.parse().map_err(|e| corrupt(format!("{}", e)))?,
            category: self.category.parse().map_err(|e| corrupt(format!("{}", e)))?,
            screenshots,
            diagnostics,
            classification,
            confidence: self.confidence,
            escalate: self.escalate,
            github_issue_url: self.github_issue_url,
            github_pr_url: self.github_pr_url,
            preview_url: self.preview_url,
            failure_reason: self.failure_reason,
            claim_token: self.claim_token,
            claimed_at_ms: self.claimed_at_ms,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn insert_report(&self, new: NewReport) -> Result<BugReport, StorageError> {
        let id = ReportId::generate();
        let now = now_rfc3339();
        let screenshots = serde_json::to_string(&new.screenshots)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let diagnostics = new
            .diagnostics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO bug_reports (id, status, notes, expected, actual, severity, \
                 category, screenshots, diagnostics, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id.as_str(),
                    ReportStatus::Submitted.as_str(),
                    new.notes,
                    new.expected,
                    new.actual,
                    new.severity.as_str(),
                    new.category.as_str(),
                    screenshots,
                    diagnostics,
                    now,
                ],
            )?;
            load(conn, &id)
        })
        .await
    }

    async fn get_report(&self, id: &ReportId) -> Result<BugReport, StorageError> {
        let id = id.clone();
        self.with_conn(move |conn| load(conn, &id)).await
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<BugReport>, StorageError> {
        let status = filter.status.map(|s| s.as_str().to_string());
        // SQLite treats a negative LIMIT as "no limit".
        let limit = filter.limit.map_or(-1, |l| l.min(i64::MAX as usize) as i64);
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM bug_reports WHERE (?1 IS NULL OR status = ?1) \
                 ORDER BY rowid DESC LIMIT ?2",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![status, limit], RawRow::from_row)?;
            let mut reports = Vec::new();
            for raw in rows {
                reports.push(raw?.into_report()?);
            }
            Ok(reports)
        })
        .await
    }

    async fn record_classification(
        &self,
        id: &ReportId,
        record: ClassificationRecord,
    ) -> Result<bool, StorageError> {
        self.conditional_update(
            id,
            "UPDATE bug_reports SET classification = ?2, confidence = ?3, escalate = ?4, \
             status = 'classified', updated_at = ?5 \
             WHERE id = ?1 AND status = 'submitted' AND classification IS NULL",
            (
                id.as_str().to_string(),
                record.classification.as_str(),
                record.confidence,
                record.escalate,
                now_rfc3339(),
            ),
        )
        .await
    }

    async fn claim_dispatch(
        &self,
        id: &ReportId,
        token: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<bool, StorageError> {
        self.conditional_update(
            id,
            "UPDATE bug_reports SET claim_token = ?2, claimed_at_ms = ?3, updated_at = ?5 \
             WHERE id = ?1 AND status = 'classified' AND escalate = 1 \
             AND github_issue_url IS NULL \
             AND (claimed_at_ms IS NULL OR claimed_at_ms < ?4)",
            (
                id.as_str().to_string(),
                token.to_string(),
                now_ms,
                stale_before_ms,
                now_rfc3339(),
            ),
        )
        .await
    }

    async fn record_issue(
        &self,
        id: &ReportId,
        token: &str,
        issue_url: &str,
    ) -> Result<bool, StorageError> {
        self.conditional_update(
            id,
            "UPDATE bug_reports SET github_issue_url = ?3, status = 'sent', \
             claim_token = NULL, claimed_at_ms = NULL, updated_at = ?4 \
             WHERE id = ?1 AND status = 'classified' AND github_issue_url IS NULL \
             AND claim_token = ?2",
            (
                id.as_str().to_string(),
                token.to_string(),
                issue_url.to_string(),
                now_rfc3339(),
            ),
        )
        .await
    }

    async fn mark_failed(&self, id: &ReportId, reason: &str) -> Result<bool, StorageError> {
        self.conditional_update(
            id,
            "UPDATE bug_reports SET status = 'failed', failure_reason = ?2, \
             claim_token = NULL, claimed_at_ms = NULL, updated_at = ?3 \
             WHERE id = ?1 AND status IN ('submitted', 'classified', 'sent')",
            (id.as_str().to_string(), reason.to_string(), now_rfc3339()),
        )
        .await
    }

    async fn reopen_failed(&self, id: &ReportId) -> Result<bool, StorageError> {
        self.conditional_update(
            id,
            "UPDATE bug_reports SET status = 'classified', escalate = 1, \
             failure_reason = NULL, updated_at = ?2 \
             WHERE id = ?1 AND status = 'failed' AND github_issue_url IS NULL \
             AND (failure_reason IS NULL OR substr(failure_reason, 1, ?3) <> ?4)",
            (
                id.as_str().to_string(),
                now_rfc3339(),
                ISSUE_UNCONFIRMED_PREFIX.chars().count() as i64,
                ISSUE_UNCONFIRMED_PREFIX.to_string(),
            ),
        )
        .await
    }

    async fn advance_stage(
        &self,
        id: &ReportId,
        update: &StageUpdate,
    ) -> Result<StageOutcome, StorageError> {
        let id = id.clone();
        let update = update.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut report = load(&tx, &id)?;
            let outcome = match transition::plan_stage(&report, &update) {
                Ok(plan) => {
                    let (from, to) = (plan.from, plan.to);
                    transition::apply_stage(&mut report, plan, &now_rfc3339());
                    tx.execute(
                        "UPDATE bug_reports SET status = ?2, github_pr_url = ?3, \
                         preview_url = ?4, failure_reason = ?5, claim_token = ?6, \
                         claimed_at_ms = ?7, updated_at = ?8 WHERE id = ?1",
                        params![
                            id.as_str(),
                            report.status.as_str(),
                            report.github_pr_url,
                            report.preview_url,
                            report.failure_reason,
                            report.claim_token,
                            report.claimed_at_ms,
                            report.updated_at,
                        ],
                    )?;
                    StageOutcome::Applied { from, to }
                }
                Err(reason) => StageOutcome::Ignored {
                    current: report.status,
                    reason,
                },
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }
}
