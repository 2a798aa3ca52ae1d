//! Bug report triage pipeline.
//!
//! - [`diagnostics`]: bounded capture buffers and redaction
//! - [`triage`]: LLM classification and the escalation decision
//! - [`tracker`]: issue rendering and the retrying issue tracker client
//! - [`lifecycle`]: the report state machine tying them together
//! - [`attachments`], [`notify`]: screenshot storage and triage notices

pub mod attachments;
pub mod diagnostics;
pub mod lifecycle;
pub mod notify;
pub mod tracker;
pub mod triage;

pub use lifecycle::{
    AutomationUpdate, LifecycleError, ReportService, ServiceConfig, StatusView, Submission,
    SubmissionReceipt,
};
