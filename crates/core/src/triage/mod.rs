//! Triage: classify a report and decide whether it becomes a tracked issue.
//!
//! A [`TriageClassifier`] never fails from the caller's point of view. Model
//! or network failures produce a fallback verdict (by default `bug` with
//! confidence 0.0) so the pipeline always proceeds. The decision itself is
//! made by [`decide`], not by the classifier.

mod llm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bugflow_storage::{BugReport, Classification};

pub use llm::{LlmClient, LlmError, LlmTriageClassifier, Message};

#[cfg(feature = "http")]
pub use llm::AnthropicClient;

/// Default confidence at or above which a feature request is not escalated.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Markers identifying synthetic reports that must never reach the tracker.
const TEST_DATA_MARKERS: &[&str] = &[
    "[test data]",
    "verification test bug",
    "do not create github issue",
    "test bug to verify",
];

/// Free text the classifier looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportText {
    pub notes: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl ReportText {
    pub fn from_report(report: &BugReport) -> Self {
        ReportText {
            notes: report.notes.clone(),
            expected: report.expected.clone(),
            actual: report.actual.clone(),
        }
    }
}

/// A classifier result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageVerdict {
    pub classification: Classification,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub reasoning: Option<String>,
    /// True when the verdict is the fallback for a failed classifier call.
    #[serde(default)]
    pub fallback: bool,
}

impl TriageVerdict {
    pub fn new(classification: Classification, confidence: f64) -> Self {
        TriageVerdict {
            classification,
            confidence: clamp_confidence(confidence),
            reasoning: None,
            fallback: false,
        }
    }

    /// The verdict recorded when classification is unavailable.
    pub fn unavailable(policy: FallbackPolicy) -> Self {
        let classification = match policy {
            FallbackPolicy::Bug => Classification::Bug,
            FallbackPolicy::Ambiguous => Classification::Ambiguous,
        };
        TriageVerdict {
            classification,
            confidence: 0.0,
            reasoning: None,
            fallback: true,
        }
    }
}

/// Which classification to record when the classifier cannot answer.
/// Both variants escalate; they differ only in what the report shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    Bug,
    Ambiguous,
}

impl FallbackPolicy {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FallbackPolicy::Bug
        } else {
            FallbackPolicy::Ambiguous
        }
    }
}

/// Classifies report text. Implementations absorb their own failures.
#[async_trait]
pub trait TriageClassifier: Send + Sync {
    async fn classify(&self, text: &ReportText) -> TriageVerdict;
}

/// Classifier used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledClassifier {
    pub fallback: FallbackPolicy,
}

#[async_trait]
impl TriageClassifier for DisabledClassifier {
    async fn classify(&self, _text: &ReportText) -> TriageVerdict {
        TriageVerdict::unavailable(self.fallback)
    }
}

// ── Decision matrix ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A feature request at or above the confidence threshold.
    ConfidentFeatureRequest,
    /// Synthetic report carrying a test-data marker.
    TestData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Disposition {
    Escalate,
    Skip { reason: SkipReason },
}

impl Disposition {
    pub fn escalates(&self) -> bool {
        matches!(self, Disposition::Escalate)
    }
}

/// Apply the decision matrix.
///
/// | classification  | confidence  | action   |
/// |-----------------|-------------|----------|
/// | feature_request | >= threshold| skip     |
/// | feature_request | < threshold | escalate |
/// | bug             | any         | escalate |
/// | ambiguous       | any         | escalate |
///
/// Reports carrying a test-data marker are never escalated.
pub fn decide(verdict: &TriageVerdict, threshold: f64, text: &ReportText) -> Disposition {
    if is_test_data(text) {
        return Disposition::Skip {
            reason: SkipReason::TestData,
        };
    }
    match verdict.classification {
        Classification::FeatureRequest if verdict.confidence >= threshold => Disposition::Skip {
            reason: SkipReason::ConfidentFeatureRequest,
        },
        _ => Disposition::Escalate,
    }
}

pub fn is_test_data(text: &ReportText) -> bool {
    let notes = text.notes.to_lowercase();
    TEST_DATA_MARKERS.iter().any(|m| notes.contains(m))
}

/// Whether a human should look at this verdict: feature requests and
/// anything the model was not confident about.
pub fn needs_review(verdict: &TriageVerdict, threshold: f64) -> bool {
    verdict.classification == Classification::FeatureRequest || verdict.confidence < threshold
}

pub(crate) fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Strip markdown code fences from an LLM response.
pub(crate) fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();

    if let Some(stripped) = trimmed.strip_prefix("```json") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(stripped) = trimmed.strip_prefix("```") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }

    trimmed
}
