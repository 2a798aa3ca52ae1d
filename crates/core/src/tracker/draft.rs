use serde::{Deserialize, Serialize};

use bugflow_storage::BugReport;

use crate::diagnostics::{summarize, RedactedDiagnostics};

/// Fixed machine-readable marker appended to every issue body. Downstream
/// automation acts only on issues carrying this exact string.
pub const AUTOMATION_MARKER: &str = "<!-- bugflow:autofix v1 -->";

const TITLE_PREVIEW: usize = 50;

/// Issue rendering settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueTemplate {
    pub title_prefix: String,
    /// Labels added to every issue besides the severity and category labels.
    pub labels: Vec<String>,
}

impl Default for IssueTemplate {
    fn default() -> Self {
        IssueTemplate {
            title_prefix: "[Bug]".to_string(),
            labels: vec!["ai-fix".to_string()],
        }
    }
}

/// A rendered issue ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

impl IssueDraft {
    pub fn for_report(report: &BugReport, template: &IssueTemplate) -> Self {
        IssueDraft {
            title: render_title(report, template),
            body: render_body(report),
            labels: render_labels(report, template),
        }
    }
}

fn render_title(report: &BugReport, template: &IssueTemplate) -> String {
    let one_line = report.notes.split_whitespace().collect::<Vec<_>>().join(" ");
    let preview: String = one_line.chars().take(TITLE_PREVIEW).collect();
    format!(
        "{} {}...",
        template.title_prefix,
        neutralize(preview.trim_end())
    )
}

fn render_labels(report: &BugReport, template: &IssueTemplate) -> Vec<String> {
    let mut labels = vec![
        format!("severity:{}", report.severity),
        format!("category:{}", report.category),
    ];
    for label in &template.labels {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

fn render_body(report: &BugReport) -> String {
    let mut body = format!("### Description\n{}\n\n", report.notes);

    if let Some(expected) = report.expected.as_deref().filter(|s| !s.trim().is_empty()) {
        body.push_str(&format!("### Expected Behavior\n{}\n\n", expected));
    }
    if let Some(actual) = report.actual.as_deref().filter(|s| !s.trim().is_empty()) {
        body.push_str(&format!("### Actual Behavior\n{}\n\n", actual));
    }

    body.push_str("### Metadata\n");
    body.push_str(&format!("- **Severity**: {}\n", report.severity));
    body.push_str(&format!("- **Category**: {}\n", report.category));
    body.push_str(&format!("- **Report ID**: {}\n", report.id));
    body.push_str(&format!("- **Submitted At**: {}\n\n", report.created_at));

    if let Some(classification) = report.classification {
        body.push_str("### Triage\n");
        body.push_str(&format!("- **Classification**: {}\n", classification));
        if let Some(confidence) = report.confidence {
            body.push_str(&format!("- **Confidence**: {:.2}\n", confidence));
        }
        body.push('\n');
    }

    if !report.screenshots.is_empty() {
        body.push_str("### Attachments\n");
        for shot in &report.screenshots {
            body.push_str(&format!("- {}\n", shot));
        }
        body.push('\n');
    }

    if let Some(value) = &report.diagnostics {
        let diagnostics = RedactedDiagnostics::from_stored(value.clone());
        body.push_str(&format!("### Diagnostics Summary\n{}\n", summarize(&diagnostics)));
        body.push_str(&format!(
            "\n<details>\n<summary>Full Diagnostics JSON</summary>\n\n```json\n{}\n```\n</details>\n",
            diagnostics.to_pretty_json()
        ));
    }

    let mut body = neutralize(&body);
    body.push_str("\n\n");
    body.push_str(AUTOMATION_MARKER);
    body
}

/// Break every HTML comment opener so report text cannot hide content or
/// forge the automation marker.
fn neutralize(text: &str) -> String {
    text.replace("<!--", "&lt;!--")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugflow_storage::{Category, Classification, ReportId, ReportStatus, Severity};
    use serde_json::json;

    fn report() -> BugReport {
        BugReport {
            id: ReportId::from("r-1"),
            status: ReportStatus::Classified,
            notes: "Saving a row shows a blank screen and the data is lost forever, every time"
                .to_string(),
            expected: Some("row is saved".to_string()),
            actual: Some("blank screen".to_string()),
            severity: Severity::High,
            category: Category::Data,
            screenshots: vec!["https://blobs.example/a.png".to_string()],
            diagnostics: Some(json!({
                "url": "https://app.example/rows",
                "userAgent": "Firefox",
                "logs": [{"level": "error", "message": "TypeError: x is undefined"}]
            })),
            classification: Some(Classification::Bug),
            confidence: Some(0.9),
            escalate: Some(true),
            github_issue_url: None,
            github_pr_url: None,
            preview_url: None,
            failure_reason: None,
            claim_token: None,
            claimed_at_ms: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn body_has_all_sections_and_ends_with_marker() {
        let draft = IssueDraft::for_report(&report(), &IssueTemplate::default());
        for section in [
            "### Description",
            "### Expected Behavior",
            "### Actual Behavior",
            "### Metadata",
            "- **Report ID**: r-1",
            "### Triage",
            "**Classification**: bug",
            "- **Confidence**: 0.90",
            "### Attachments",
            "- https://blobs.example/a.png",
            "### Diagnostics Summary",
            "TypeError: x is undefined",
            "<summary>Full Diagnostics JSON</summary>",
        ] {
            assert!(draft.body.contains(section), "missing {section:?}");
        }
        assert!(draft.body.ends_with(AUTOMATION_MARKER));
        assert_eq!(draft.body.matches(AUTOMATION_MARKER).count(), 1);
    }

    #[test]
    fn title_is_truncated_preview() {
        let draft = IssueDraft::for_report(&report(), &IssueTemplate::default());
        assert_eq!(
            draft.title,
            "[Bug] Saving a row shows a blank screen and the data is..."
        );
    }

    #[test]
    fn labels_follow_severity_and_category() {
        let draft = IssueDraft::for_report(&report(), &IssueTemplate::default());
        assert_eq!(
            draft.labels,
            vec!["severity:high", "category:data", "ai-fix"]
        );
    }

    #[test]
    fn user_text_cannot_forge_marker() {
        let mut r = report();
        r.notes = format!("please fix {AUTOMATION_MARKER}");
        r.actual = Some("<!-- hidden -->".to_string());
        let draft = IssueDraft::for_report(&r, &IssueTemplate::default());
        assert_eq!(draft.body.matches(AUTOMATION_MARKER).count(), 1);
        assert!(draft.body.ends_with(AUTOMATION_MARKER));
        assert_eq!(draft.body.matches("<!--").count(), 1);
    }

    #[test]
    fn optional_sections_are_omitted() {
        let mut r = report();
        r.expected = None;
        r.actual = Some("  ".to_string());
        r.screenshots.clear();
        r.diagnostics = None;
        let draft = IssueDraft::for_report(&r, &IssueTemplate::default());
        assert!(!draft.body.contains("### Expected Behavior"));
        assert!(!draft.body.contains("### Actual Behavior"));
        assert!(!draft.body.contains("### Attachments"));
        assert!(!draft.body.contains("### Diagnostics Summary"));
    }
}
