//! Issue tracker client.
//!
//! [`IssueDraft`] renders a report into an issue. An [`IssueTransport`]
//! performs exactly one HTTP attempt; [`RetryingTracker`] wraps a transport
//! with the retry policy and is what the lifecycle service calls through the
//! [`IssueTracker`] trait. The tracker itself does no deduplication: the
//! caller guarantees it is invoked at most once per report.

mod draft;
#[cfg(feature = "http")]
mod github;
mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use draft::{IssueDraft, IssueTemplate, AUTOMATION_MARKER};
#[cfg(feature = "http")]
pub use github::GithubTransport;
pub use retry::{IssueTransport, RetryPolicy, RetryingTracker, TransportResponse};

/// Canonical reference of a created issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub url: String,
    pub number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("issue tracker is not configured")]
    NotConfigured,

    /// A non-retryable response such as 400, 401 or 422.
    #[error("issue tracker rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Every attempt failed with a retryable error.
    #[error("issue tracker failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The tracker accepted the request but the response carried no issue URL.
    #[error("issue tracker response unusable: {0}")]
    InvalidResponse(String),
}

impl TrackerError {
    /// True when the tracker accepted the request, so an issue probably
    /// exists even though no URL came back. Such a report must not be
    /// dispatched again.
    pub fn issue_may_exist(&self) -> bool {
        matches!(self, TrackerError::InvalidResponse(_))
    }
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Create one issue. Returns a terminal error once retries are spent.
    async fn create_issue(&self, draft: &IssueDraft) -> Result<CreatedIssue, TrackerError>;
}

/// Tracker used when no repository or token is configured. Every escalated
/// report fails with [`TrackerError::NotConfigured`] and can be retried once
/// the tracker is set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTracker;

#[async_trait]
impl IssueTracker for UnconfiguredTracker {
    async fn create_issue(&self, _draft: &IssueDraft) -> Result<CreatedIssue, TrackerError> {
        Err(TrackerError::NotConfigured)
    }
}
