//! GitHub issues transport.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime. HTTP error statuses are returned as
//! [`TransportResponse`]s so the retry layer can classify them.

use std::time::Duration;

use async_trait::async_trait;

use super::{IssueDraft, IssueTransport, TransportResponse};

const GITHUB_API: &str = "https://api.github.com";
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
const GITHUB_API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GithubTransport {
    token: String,
    /// `owner/name`.
    repo: String,
    api_base: String,
}

impl GithubTransport {
    pub fn new(token: impl Into<String>, repo: impl Into<String>) -> Self {
        GithubTransport {
            token: token.into(),
            repo: repo.into(),
            api_base: GITHUB_API.to_string(),
        }
    }

    /// Point the transport at another API root (GitHub Enterprise, test server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/issues",
            self.api_base.trim_end_matches('/'),
            self.repo
        )
    }
}

#[async_trait]
impl IssueTransport for GithubTransport {
    async fn send(&self, draft: &IssueDraft) -> Result<TransportResponse, String> {
        let url = self.issues_url();
        let auth = format!("Bearer {}", self.token);
        let payload = serde_json::json!({
            "title": draft.title,
            "body": draft.body,
            "labels": draft.labels,
        });

        tokio::task::spawn_blocking(move || {
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(REQUEST_TIMEOUT))
                .build()
                .into();
            let mut resp = agent
                .post(&url)
                .header("Authorization", &auth)
                .header("Accept", GITHUB_MEDIA_TYPE)
                .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
                .header("User-Agent", "bugflow")
                .send_json(&payload)
                .map_err(|e| e.to_string())?;

            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let (body, body_error) = match resp.body_mut().read_to_string() {
                Ok(body) => (body, None),
                Err(e) => (String::new(), Some(e.to_string())),
            };

            Ok(TransportResponse {
                status,
                body,
                body_error,
                retry_after,
            })
        })
        .await
        .map_err(|e| format!("task join error: {}", e))?
    }
}

/// Parse a `Retry-After` value given in seconds. HTTP-date values are ignored
/// and the regular backoff applies.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
