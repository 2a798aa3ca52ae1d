//! Triage notifications for reports a human should review.

use async_trait::async_trait;
use serde::Serialize;

use bugflow_storage::{Classification, ReportId};

/// What a reviewer needs to look at a triaged report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageNotice {
    pub report_id: ReportId,
    pub classification: Classification,
    pub confidence: f64,
    pub notes: String,
    pub escalated: bool,
}

impl TriageNotice {
    /// Subject line for a notification, e.g. `[FEATURE_REQUEST] Triage report 42 (0.85)`.
    pub fn subject(&self) -> String {
        format!(
            "[{}] Triage report {} ({:.2})",
            self.classification.as_str().to_uppercase(),
            self.report_id,
            self.confidence
        )
    }
}

/// Receives triage notices. Delivery is best effort: the pipeline logs
/// and ignores any error.
#[async_trait]
pub trait TriageNotifier: Send + Sync {
    async fn notify(&self, notice: &TriageNotice) -> Result<(), String>;
}

/// Emits each notice as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl TriageNotifier for LogNotifier {
    async fn notify(&self, notice: &TriageNotice) -> Result<(), String> {
        tracing::info!(
            report_id = %notice.report_id,
            classification = %notice.classification,
            confidence = notice.confidence,
            escalated = notice.escalated,
            "{}",
            notice.subject()
        );
        Ok(())
    }
}
