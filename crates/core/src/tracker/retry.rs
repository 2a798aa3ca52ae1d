use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CreatedIssue, IssueDraft, IssueTracker, TrackerError};

/// A raw response from one issue-creation attempt. HTTP error statuses are
/// responses, not errors; only transport-level failures are `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    /// Set when the status line arrived but the body could not be read.
    pub body_error: Option<String>,
    /// Parsed `Retry-After` header, if the server sent one.
    pub retry_after: Option<Duration>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        TransportResponse {
            status,
            body: body.into(),
            body_error: None,
            retry_after: None,
        }
    }
}

/// Performs a single issue-creation request. No retries.
#[async_trait]
pub trait IssueTransport: Send + Sync {
    async fn send(&self, draft: &IssueDraft) -> Result<TransportResponse, String>;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, including a server `Retry-After`.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        if let Some(server) = retry_after {
            return server.min(max);
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor)).min(max)
    }
}

/// Retryable statuses: 429 and every 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// [`IssueTracker`] that drives an [`IssueTransport`] under a [`RetryPolicy`].
pub struct RetryingTracker<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: IssueTransport> RetryingTracker<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        RetryingTracker { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

enum Attempt {
    Done(CreatedIssue),
    Retry {
        error: String,
        retry_after: Option<Duration>,
    },
    Fatal(TrackerError),
}

fn classify(result: Result<TransportResponse, String>) -> Attempt {
    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            return Attempt::Retry {
                error: format!("network error: {}", e),
                retry_after: None,
            }
        }
    };

    if (200..300).contains(&resp.status) {
        // Never retry after a success: a second attempt would create a second issue.
        let created = match &resp.body_error {
            Some(e) => Err(format!("unreadable body: {}", e)),
            None => parse_created(&resp.body),
        };
        return match created {
            Ok(issue) => Attempt::Done(issue),
            Err(e) => Attempt::Fatal(TrackerError::InvalidResponse(e)),
        };
    }

    let message = match &resp.body_error {
        Some(e) => format!("unreadable body: {}", e),
        None => error_message(&resp.body),
    };
    if is_retryable_status(resp.status) {
        Attempt::Retry {
            error: format!("HTTP {}: {}", resp.status, message),
            retry_after: resp.retry_after,
        }
    } else {
        Attempt::Fatal(TrackerError::Rejected {
            status: resp.status,
            message,
        })
    }
}

fn parse_created(body: &str) -> Result<CreatedIssue, String> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    let url = value
        .get("html_url")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "response has no html_url".to_string())?;
    Ok(CreatedIssue {
        url: url.to_string(),
        number: value.get("number").and_then(|v| v.as_u64()),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[async_trait]
impl<T: IssueTransport> IssueTracker for RetryingTracker<T> {
    async fn create_issue(&self, draft: &IssueDraft) -> Result<CreatedIssue, TrackerError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match classify(self.transport.send(draft).await) {
                Attempt::Done(issue) => {
                    tracing::info!(url = %issue.url, attempt = attempt + 1, "issue created");
                    return Ok(issue);
                }
                Attempt::Fatal(e) => {
                    tracing::error!(error = %e, attempt = attempt + 1, "issue creation failed");
                    return Err(e);
                }
                Attempt::Retry { error, retry_after } => {
                    if attempt + 1 < attempts {
                        let delay = self.policy.delay_for(attempt, retry_after);
                        tracing::warn!(
                            error = %error,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            delay_ms = delay.as_millis() as u64,
                            "retryable issue tracker error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = error;
                }
            }
        }

        tracing::error!(attempts, error = %last_error, "issue tracker retries exhausted");
        Err(TrackerError::Exhausted {
            attempts,
            last_error,
        })
    }
}
