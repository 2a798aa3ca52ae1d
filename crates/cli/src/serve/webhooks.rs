//! GitHub webhook deliveries.
//!
//! The remediation workflow works on a branch named `fix/bug-<report id>`.
//! Pull request and deployment events on such a branch are translated into
//! forward-only stage updates for that report:
//!
//! - `pull_request` opened → `pr_created` with the PR URL
//! - `pull_request` closed and merged → `shipped`
//! - `deployment_status` success → `preview_ready` with the environment URL
//!
//! Everything else is acknowledged and ignored.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use bugflow_core::AutomationUpdate;
use bugflow_storage::{ReportId, ReportStatus};

type HmacSha256 = Hmac<Sha256>;

/// Branch prefix the remediation workflow uses for fix branches.
pub(crate) const FIX_BRANCH_PREFIX: &str = "fix/bug-";

/// Check an `X-Hub-Signature-256` header (`sha256=<hex>`) against the raw body.
/// The digest comparison is constant time.
pub(crate) fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Extract the report id from a `fix/bug-<id>` branch or ref.
pub(crate) fn report_id_from_branch(branch: &str) -> Option<ReportId> {
    let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
    let id = branch.strip_prefix(FIX_BRANCH_PREFIX)?;
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some(ReportId::from(id))
}

/// Translate a delivery into a stage update, or None when the event does
/// not concern a fix branch.
pub(crate) fn update_from_event(event: &str, payload: &Value) -> Option<AutomationUpdate> {
    match event {
        "pull_request" => pull_request_update(payload),
        "deployment_status" => deployment_update(payload),
        _ => None,
    }
}

fn pull_request_update(payload: &Value) -> Option<AutomationUpdate> {
    let action = payload.get("action")?.as_str()?;
    let pr = payload.get("pull_request")?;
    let branch = pr.get("head")?.get("ref")?.as_str()?;
    let report_id = report_id_from_branch(branch)?;
    let pr_url = pr
        .get("html_url")
        .and_then(|u| u.as_str())
        .map(str::to_string);
    let merged = pr.get("merged").and_then(|m| m.as_bool()).unwrap_or(false);

    let new_status = match action {
        "opened" | "reopened" => ReportStatus::PrCreated,
        "closed" if merged => ReportStatus::Shipped,
        _ => return None,
    };
    Some(AutomationUpdate {
        report_id,
        new_status,
        url: pr_url,
        reason: None,
    })
}

fn deployment_update(payload: &Value) -> Option<AutomationUpdate> {
    let status = payload.get("deployment_status")?;
    if status.get("state")?.as_str()? != "success" {
        return None;
    }
    let git_ref = payload.get("deployment")?.get("ref")?.as_str()?;
    let report_id = report_id_from_branch(git_ref)?;
    let url = ["environment_url", "target_url"]
        .iter()
        .filter_map(|key| status.get(*key).and_then(|u| u.as_str()))
        .find(|u| !u.is_empty())
        .map(str::to_string);

    Some(AutomationUpdate {
        report_id,
        new_status: ReportStatus::PreviewReady,
        url,
        reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_round_trip_and_tamper() {
        let body = br#"{"action":"opened"}"#;
        let header = sign("s3cret", body);
        assert!(verify_signature("s3cret", body, Some(&header)));
        assert!(!verify_signature("other", body, Some(&header)));
        assert!(!verify_signature("s3cret", b"{}", Some(&header)));
        assert!(!verify_signature("s3cret", body, None));
        assert!(!verify_signature("s3cret", body, Some("sha1=abcd")));
        assert!(!verify_signature("s3cret", body, Some("sha256=not-hex")));
    }

    #[test]
    fn branch_parsing() {
        assert_eq!(
            report_id_from_branch("fix/bug-5f0c-11aa"),
            Some(ReportId::from("5f0c-11aa"))
        );
        assert_eq!(
            report_id_from_branch("refs/heads/fix/bug-abc"),
            Some(ReportId::from("abc"))
        );
        assert_eq!(report_id_from_branch("fix/bug-"), None);
        assert_eq!(report_id_from_branch("feature/login"), None);
        assert_eq!(report_id_from_branch("fix/bug-a/b"), None);
    }

    #[test]
    fn pull_request_opened_and_merged() {
        let opened = json!({
            "action": "opened",
            "pull_request": {
                "html_url": "https://github.com/acme/shop/pull/7",
                "merged": false,
                "head": {"ref": "fix/bug-r1"}
            }
        });
        let update = update_from_event("pull_request", &opened).unwrap();
        assert_eq!(update.report_id, ReportId::from("r1"));
        assert_eq!(update.new_status, ReportStatus::PrCreated);
        assert_eq!(
            update.url.as_deref(),
            Some("https://github.com/acme/shop/pull/7")
        );

        let merged = json!({
            "action": "closed",
            "pull_request": {"merged": true, "head": {"ref": "fix/bug-r1"}}
        });
        let update = update_from_event("pull_request", &merged).unwrap();
        assert_eq!(update.new_status, ReportStatus::Shipped);

        let abandoned = json!({
            "action": "closed",
            "pull_request": {"merged": false, "head": {"ref": "fix/bug-r1"}}
        });
        assert!(update_from_event("pull_request", &abandoned).is_none());
    }

    #[test]
    fn deployment_success_is_preview() {
        let payload = json!({
            "deployment_status": {
                "state": "success",
                "environment_url": "https://preview-r2.example.dev"
            },
            "deployment": {"ref": "fix/bug-r2"}
        });
        let update = update_from_event("deployment_status", &payload).unwrap();
        assert_eq!(update.new_status, ReportStatus::PreviewReady);
        assert_eq!(update.url.as_deref(), Some("https://preview-r2.example.dev"));

        let pending = json!({
            "deployment_status": {"state": "pending"},
            "deployment": {"ref": "fix/bug-r2"}
        });
        assert!(update_from_event("deployment_status", &pending).is_none());
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let push = json!({"ref": "refs/heads/fix/bug-r3"});
        assert!(update_from_event("push", &push).is_none());
        let other_branch = json!({
            "action": "opened",
            "pull_request": {"head": {"ref": "main"}}
        });
        assert!(update_from_event("pull_request", &other_branch).is_none());
    }
}
