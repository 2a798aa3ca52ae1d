//! Screenshot storage for inline (data URL) uploads.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Default maximum decoded screenshot size: 5 MiB.
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("screenshot is not a base64 data URL")]
    InvalidDataUrl,

    #[error("unsupported screenshot type: {0}")]
    UnsupportedType(String),

    #[error("screenshot is not valid base64: {0}")]
    Decode(String),

    #[error("screenshot is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("failed to write screenshot: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded inline screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl InlineImage {
    /// Decode a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(data_url: &str, max_bytes: usize) -> Result<Self, AttachmentError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or(AttachmentError::InvalidDataUrl)?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(AttachmentError::InvalidDataUrl)?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or(AttachmentError::InvalidDataUrl)?
            .to_ascii_lowercase();
        if extension_for(&mime).is_none() {
            return Err(AttachmentError::UnsupportedType(mime));
        }

        // Reject before decoding when the encoded form is already too large.
        let estimated = payload.len() / 4 * 3;
        if estimated > max_bytes + 3 {
            return Err(AttachmentError::TooLarge {
                size: estimated,
                limit: max_bytes,
            });
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| AttachmentError::Decode(e.to_string()))?;
        if bytes.len() > max_bytes {
            return Err(AttachmentError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        Ok(InlineImage { mime, bytes })
    }

    /// Content-addressed file name: `<sha256>.<ext>`.
    pub fn file_name(&self) -> String {
        let digest = hex::encode(Sha256::digest(&self.bytes));
        format!("{}.{}", digest, extension_for(&self.mime).unwrap_or("bin"))
    }
}

fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Whether a submitted screenshot entry is an inline upload rather than a
/// reference to an already stored blob.
pub fn is_inline(entry: &str) -> bool {
    entry.starts_with("data:")
}

/// Persists inline screenshots and returns a stable reference for each.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn save(&self, data_url: &str) -> Result<String, AttachmentError>;
}

/// Stores screenshots as files in a local directory.
pub struct LocalScreenshotStore {
    dir: PathBuf,
    public_base_url: String,
    max_bytes: usize,
}

impl LocalScreenshotStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        LocalScreenshotStore {
            dir: dir.into(),
            public_base_url: public_base_url.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait]
impl ScreenshotStore for LocalScreenshotStore {
    async fn save(&self, data_url: &str) -> Result<String, AttachmentError> {
        let image = InlineImage::from_data_url(data_url, self.max_bytes)?;
        let name = image.file_name();
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&name);
        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::write(&path, &image.bytes).await?;
        }
        tracing::debug!(path = %path.display(), bytes = image.bytes.len(), "screenshot stored");
        Ok(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            name
        ))
    }
}
