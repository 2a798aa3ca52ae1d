//! Best-effort diagnostics capture.
//!
//! A [`DiagnosticsRecorder`] is owned by one reporting session. Calling code
//! records log lines, network events, breadcrumbs and errors into bounded
//! buffers; [`DiagnosticsRecorder::snapshot`] copies them out and a
//! [`RedactionPolicy`] turns the copy into [`RedactedDiagnostics`], the only
//! form in which diagnostics leave the recorder.

mod buffer;
mod redact;
mod summary;

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use buffer::RingBuffer;
pub use redact::{
    RedactedDiagnostics, RedactionPolicy, MAX_DEPTH_MARKER, REDACTION_MARKER, TRUNCATION_SUFFIX,
};
pub use summary::summarize;

// ── Entries ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDetails {
    pub method: String,
    pub url: String,
    /// HTTP status, or `None` when the request never got a response.
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub details: NetworkDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub timestamp: String,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Page-level context stamped onto every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub url: Option<String>,
    pub user_agent: Option<String>,
}

/// Per-category buffer capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferCapacities {
    pub logs: usize,
    pub network: usize,
    pub breadcrumbs: usize,
    pub errors: usize,
}

impl Default for BufferCapacities {
    fn default() -> Self {
        BufferCapacities {
            logs: 50,
            network: 50,
            breadcrumbs: 100,
            errors: 20,
        }
    }
}

/// An immutable copy of the recorder's buffers at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub captured_at: String,
    pub logs: Vec<LogEntry>,
    pub network: Vec<NetworkEvent>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub errors: Vec<ErrorEntry>,
}

// ── Recorder ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DiagnosticsRecorder {
    context: SessionContext,
    logs: RingBuffer<LogEntry>,
    network: RingBuffer<NetworkEvent>,
    breadcrumbs: RingBuffer<Breadcrumb>,
    errors: RingBuffer<ErrorEntry>,
    dropped_captures: u64,
}

impl Default for DiagnosticsRecorder {
    fn default() -> Self {
        Self::new(SessionContext::default(), BufferCapacities::default())
    }
}

impl DiagnosticsRecorder {
    pub fn new(context: SessionContext, capacities: BufferCapacities) -> Self {
        DiagnosticsRecorder {
            context,
            logs: RingBuffer::new(capacities.logs),
            network: RingBuffer::new(capacities.network),
            breadcrumbs: RingBuffer::new(capacities.breadcrumbs),
            errors: RingBuffer::new(capacities.errors),
            dropped_captures: 0,
        }
    }

    pub fn set_context(&mut self, context: SessionContext) {
        self.context = context;
    }

    pub fn record_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: bugflow_storage::now_rfc3339(),
            level,
            message: message.into(),
            details: None,
        });
    }

    /// Record a request/response pair. Responses at 400 and above, and
    /// requests that never got a response, are recorded at `error` level.
    pub fn record_network(
        &mut self,
        method: impl Into<String>,
        url: impl Into<String>,
        status: Option<u16>,
        duration_ms: Option<u64>,
    ) {
        let method = method.into();
        let url = url.into();
        let level = match status {
            Some(s) if s < 400 => LogLevel::Info,
            _ => LogLevel::Error,
        };
        let message = match status {
            Some(s) => format!("{} {} -> {}", method, url, s),
            None => format!("{} {} -> no response", method, url),
        };
        self.network.push(NetworkEvent {
            timestamp: bugflow_storage::now_rfc3339(),
            level,
            message,
            details: NetworkDetails {
                method,
                url,
                status,
                duration_ms,
            },
        });
    }

    pub fn add_breadcrumb(
        &mut self,
        category: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        self.breadcrumbs.push(Breadcrumb {
            timestamp: bugflow_storage::now_rfc3339(),
            category: category.into(),
            message: message.into(),
            data,
        });
    }

    pub fn record_error(&mut self, message: impl Into<String>, stack: Option<String>) {
        self.errors.push(ErrorEntry {
            timestamp: bugflow_storage::now_rfc3339(),
            message: message.into(),
            stack,
        });
    }

    /// Run a capture hook against the recorder.
    ///
    /// Capture is best effort: an error returned by the hook, or a panic
    /// inside it, is logged at `warn`, counted in [`Self::dropped_captures`]
    /// and otherwise swallowed. The caller's own work is never interrupted.
    pub fn record_with<F, E>(&mut self, hook: F)
    where
        F: FnOnce(&mut Self) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook(self)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.dropped_captures += 1;
                tracing::warn!(error = %e, "diagnostics capture failed");
            }
            Err(payload) => {
                self.dropped_captures += 1;
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(panic = %message, "diagnostics capture hook panicked");
            }
        }
    }

    /// Number of capture hooks that failed and were swallowed.
    pub fn dropped_captures(&self) -> u64 {
        self.dropped_captures
    }

    /// Copy the current buffer contents. Buffers are left untouched.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            url: self.context.url.clone(),
            user_agent: self.context.user_agent.clone(),
            captured_at: bugflow_storage::now_rfc3339(),
            logs: self.logs.to_vec(),
            network: self.network.to_vec(),
            breadcrumbs: self.breadcrumbs.to_vec(),
            errors: self.errors.to_vec(),
        }
    }
}
