use crate::record::ReportId;

/// All errors that can be returned by a ReportStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No report with the given id.
    #[error("report not found: {id}")]
    NotFound { id: ReportId },

    /// A stored row could not be decoded into a record.
    #[error("corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}
