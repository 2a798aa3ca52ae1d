use serde_json::Value;

use super::RedactedDiagnostics;

const TOP_N: usize = 3;
const MESSAGE_PREVIEW: usize = 200;

/// Render a short markdown summary: page URL, user agent, the first console
/// errors and the first failed network requests.
pub fn summarize(diagnostics: &RedactedDiagnostics) -> String {
    let data = diagnostics.as_value();
    if !data.is_object() {
        return "No diagnostics available.".to_string();
    }

    let mut lines = vec![
        format!("- **URL**: {}", text_or(data.get("url"), "unknown")),
        format!("- **User Agent**: {}", text_or(data.get("userAgent"), "unknown")),
    ];

    let errors: Vec<&Value> = entries(data, "logs")
        .filter(|e| is_error(e))
        .collect();
    if !errors.is_empty() {
        lines.push(format!("\n**Top Console Errors ({})**:", errors.len()));
        for entry in errors.iter().copied().take(TOP_N) {
            let message = text_or(entry.get("message"), "");
            let preview: String = message.chars().take(MESSAGE_PREVIEW).collect();
            lines.push(format!("- `{}`", preview));
        }
    }

    let failures: Vec<&Value> = entries(data, "network")
        .filter(|e| is_error(e))
        .collect();
    if !failures.is_empty() {
        lines.push(format!("\n**Recent Network Failures ({})**:", failures.len()));
        for entry in failures.iter().copied().take(TOP_N) {
            let details = entry.get("details").unwrap_or(entry);
            lines.push(format!(
                "- `{} {}`",
                text_or(details.get("status"), "unknown"),
                text_or(details.get("url"), "unknown"),
            ));
        }
    }

    lines.join("\n")
}

fn entries<'a>(data: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}

fn is_error(entry: &Value) -> bool {
    entry.get("level").and_then(Value::as_str) == Some("error")
}

fn text_or(value: Option<&Value>, fallback: &str) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RedactionPolicy;
    use serde_json::json;

    #[test]
    fn summary_lists_top_errors_and_failures() {
        let diag = RedactionPolicy::default().redact_value(json!({
            "url": "https://app.example/rows",
            "userAgent": "Firefox",
            "logs": [
                {"level": "error", "message": "e1"},
                {"level": "info", "message": "fine"},
                {"level": "error", "message": "e2"},
                {"level": "error", "message": "e3"},
                {"level": "error", "message": "e4"}
            ],
            "network": [
                {"level": "error", "details": {"url": "/api/save", "status": 500}},
                {"level": "info", "details": {"url": "/api/ok", "status": 200}}
            ]
        }));
        let summary = summarize(&diag);
        assert!(summary.contains("- **URL**: https://app.example/rows"));
        assert!(summary.contains("- **User Agent**: Firefox"));
        assert!(summary.contains("**Top Console Errors (4)**:"));
        assert!(summary.contains("- `e3`"));
        assert!(!summary.contains("- `e4`"));
        assert!(summary.contains("**Recent Network Failures (1)**:"));
        assert!(summary.contains("- `500 /api/save`"));
        assert!(!summary.contains("/api/ok"));
    }

    #[test]
    fn missing_fields_fall_back_to_unknown() {
        let diag = RedactionPolicy::default().redact_value(json!({}));
        let summary = summarize(&diag);
        assert!(summary.contains("- **URL**: unknown"));
        assert!(!summary.contains("Console Errors"));
    }

    #[test]
    fn non_object_has_no_summary() {
        let diag = RedactionPolicy::default().redact_value(json!([1, 2]));
        assert_eq!(summarize(&diag), "No diagnostics available.");
    }
}
