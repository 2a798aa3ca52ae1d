use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a bug report. Assigned by the store at insert time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        ReportId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReportId {
    fn from(s: &str) -> Self {
        ReportId(s.to_string())
    }
}

impl From<String> for ReportId {
    fn from(s: String) -> Self {
        ReportId(s)
    }
}

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Lifecycle status of a report.
///
/// Progression is `submitted → classified → sent → pr_created →
/// preview_ready → shipped`; `failed` sits outside the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Submitted,
    Classified,
    Sent,
    PrCreated,
    PreviewReady,
    Shipped,
    Failed,
}

string_enum!(ReportStatus, "status", {
    Submitted => "submitted",
    Classified => "classified",
    Sent => "sent",
    PrCreated => "pr_created",
    PreviewReady => "preview_ready",
    Shipped => "shipped",
    Failed => "failed",
});

impl ReportStatus {
    /// Position in the forward progression. `None` for `failed`.
    pub fn rank(&self) -> Option<u8> {
        match self {
            ReportStatus::Submitted => Some(0),
            ReportStatus::Classified => Some(1),
            ReportStatus::Sent => Some(2),
            ReportStatus::PrCreated => Some(3),
            ReportStatus::PreviewReady => Some(4),
            ReportStatus::Shipped => Some(5),
            ReportStatus::Failed => None,
        }
    }

    /// Statuses that can only be reached once an issue exists.
    pub fn requires_issue(&self) -> bool {
        matches!(
            self,
            ReportStatus::PrCreated | ReportStatus::PreviewReady | ReportStatus::Shipped
        )
    }
}

/// Triage verdict recorded on a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Bug,
    FeatureRequest,
    Ambiguous,
}

string_enum!(Classification, "classification", {
    Bug => "bug",
    FeatureRequest => "feature_request",
    Ambiguous => "ambiguous",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Blocking,
}

string_enum!(Severity, "severity", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Blocking => "blocking",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Ui,
    Data,
    Auth,
    Payments,
    Performance,
    Other,
}

string_enum!(Category, "category", {
    Ui => "ui",
    Data => "data",
    Auth => "auth",
    Payments => "payments",
    Performance => "performance",
    Other => "other",
});

/// A persisted bug report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub id: ReportId,
    pub status: ReportStatus,
    pub notes: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Screenshot references in submission order.
    pub screenshots: Vec<String>,
    /// Redacted diagnostics snapshot, if the reporter opted in.
    pub diagnostics: Option<serde_json::Value>,
    pub classification: Option<Classification>,
    pub confidence: Option<f64>,
    /// Decision-matrix outcome stored alongside the classification.
    pub escalate: Option<bool>,
    pub github_issue_url: Option<String>,
    pub github_pr_url: Option<String>,
    pub preview_url: Option<String>,
    pub failure_reason: Option<String>,
    /// Token of the worker currently allowed to create the issue.
    pub claim_token: Option<String>,
    /// Unix milliseconds at which the dispatch claim was taken.
    pub claimed_at_ms: Option<i64>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub updated_at: String,
}

/// Insert payload for a new report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub notes: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub severity: Severity,
    pub category: Category,
    pub screenshots: Vec<String>,
    pub diagnostics: Option<serde_json::Value>,
}

impl NewReport {
    pub fn new(notes: impl Into<String>) -> Self {
        NewReport {
            notes: notes.into(),
            expected: None,
            actual: None,
            severity: Severity::default(),
            category: Category::default(),
            screenshots: Vec::new(),
            diagnostics: None,
        }
    }
}

/// Classification written once by the triage step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub classification: Classification,
    pub confidence: f64,
    pub escalate: bool,
}

/// Filter for [`ReportStore::list_reports`](crate::ReportStore::list_reports).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    /// Maximum number of results (None = no limit).
    pub limit: Option<usize>,
}

/// The current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// The current UTC time as unix milliseconds.
pub fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ReportStatus::Submitted,
            ReportStatus::Classified,
            ReportStatus::Sent,
            ReportStatus::PrCreated,
            ReportStatus::PreviewReady,
            ReportStatus::Shipped,
            ReportStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ReportStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ReportStatus::PreviewReady).unwrap();
        assert_eq!(json, "\"preview_ready\"");
        let json = serde_json::to_string(&Classification::FeatureRequest).unwrap();
        assert_eq!(json, "\"feature_request\"");
    }

    #[test]
    fn failed_has_no_rank() {
        assert_eq!(ReportStatus::Failed.rank(), None);
        assert!(ReportStatus::Shipped.rank() > ReportStatus::Sent.rank());
    }

    #[test]
    fn unknown_severity_is_rejected() {
        let err = "urgent".parse::<Severity>().unwrap_err();
        assert_eq!(err.kind, "severity");
        assert_eq!(err.to_string(), "unknown severity 'urgent'");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ReportId::generate(), ReportId::generate());
    }
}
