//! `bugflow.toml` configuration.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. Secrets are normally supplied through the environment and
//! override whatever the file says.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use bugflow_core::diagnostics::RedactionPolicy;
use bugflow_core::lifecycle::DEFAULT_CLAIM_LEASE;
use bugflow_core::tracker::{IssueTemplate, RetryPolicy};
use bugflow_core::triage::DEFAULT_THRESHOLD;

/// Config file read when `--config` is not given.
pub(crate) const DEFAULT_CONFIG_PATH: &str = "bugflow.toml";

/// Default rate limit: 60 requests per minute per IP.
const DEFAULT_RATE_LIMIT: u64 = 60;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct BugflowConfig {
    pub(crate) server: ServerConfig,
    pub(crate) storage: StorageConfig,
    pub(crate) triage: TriageConfig,
    pub(crate) tracker: TrackerConfig,
    pub(crate) diagnostics: DiagnosticsConfig,
    pub(crate) attachments: AttachmentsConfig,
    pub(crate) webhooks: WebhooksConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServerConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    pub(crate) rate_limit: u64,
    /// Operator API key. None leaves operator routes open.
    pub(crate) api_key: Option<String>,
    pub(crate) max_notes_chars: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rate_limit: DEFAULT_RATE_LIMIT,
            api_key: None,
            max_notes_chars: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StorageConfig {
    /// SQLite database file.
    pub(crate) path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from("bugflow.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct TriageConfig {
    pub(crate) model: String,
    pub(crate) threshold: f64,
    /// Record `bug` (true) or `ambiguous` (false) when the model is unavailable.
    pub(crate) fail_open: bool,
    pub(crate) api_key: Option<String>,
    pub(crate) api_base: Option<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        TriageConfig {
            model: DEFAULT_MODEL.to_string(),
            threshold: DEFAULT_THRESHOLD,
            fail_open: true,
            api_key: None,
            api_base: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct TrackerConfig {
    /// `owner/name`.
    pub(crate) repo: Option<String>,
    pub(crate) token: Option<String>,
    pub(crate) api_base: Option<String>,
    pub(crate) title_prefix: String,
    pub(crate) labels: Vec<String>,
    pub(crate) max_attempts: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
    /// Seconds after which an unfinished dispatch claim may be taken over.
    pub(crate) claim_lease_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let template = IssueTemplate::default();
        let retry = RetryPolicy::default();
        TrackerConfig {
            repo: None,
            token: None,
            api_base: None,
            title_prefix: template.title_prefix,
            labels: template.labels,
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay_ms,
            max_delay_ms: retry.max_delay_ms,
            claim_lease_secs: DEFAULT_CLAIM_LEASE.as_secs(),
        }
    }
}

impl TrackerConfig {
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    pub(crate) fn issue_template(&self) -> IssueTemplate {
        IssueTemplate {
            title_prefix: self.title_prefix.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct DiagnosticsConfig {
    /// Keys redacted in addition to the built-in sensitive set.
    pub(crate) extra_sensitive_keys: Vec<String>,
    pub(crate) max_string_len: usize,
    pub(crate) max_depth: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        let policy = RedactionPolicy::default();
        DiagnosticsConfig {
            extra_sensitive_keys: Vec::new(),
            max_string_len: policy.max_string_len,
            max_depth: policy.max_depth,
        }
    }
}

impl DiagnosticsConfig {
    pub(crate) fn redaction_policy(&self) -> RedactionPolicy {
        RedactionPolicy {
            max_string_len: self.max_string_len,
            max_depth: self.max_depth,
            ..RedactionPolicy::default()
        }
        .with_extra_keys(self.extra_sensitive_keys.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AttachmentsConfig {
    /// Directory for inline screenshots. None drops inline uploads.
    pub(crate) dir: Option<PathBuf>,
    /// URL prefix under which `dir` is served.
    pub(crate) public_base_url: String,
    pub(crate) max_bytes: usize,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        AttachmentsConfig {
            dir: None,
            public_base_url: "/screenshots".to_string(),
            max_bytes: bugflow_core::attachments::DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct WebhooksConfig {
    /// Shared secret for `X-Hub-Signature-256`. None accepts unsigned deliveries.
    pub(crate) secret: Option<String>,
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl BugflowConfig {
    /// Load configuration for the binary: file, then environment, then validation.
    ///
    /// An explicit `path` must exist. Without one, a missing
    /// [`DEFAULT_CONFIG_PATH`] yields the defaults.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override secrets and limits from the environment. Empty values are
    /// treated as unset.
    pub(crate) fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = var("GITHUB_TOKEN") {
            self.tracker.token = Some(token);
        }
        if let Some(repo) = var("GITHUB_REPO") {
            self.tracker.repo = Some(repo);
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.triage.api_key = Some(key);
        }
        if let Some(key) = var("BUGFLOW_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(secret) = var("BUGFLOW_WEBHOOK_SECRET") {
            self.webhooks.secret = Some(secret);
        }
        if let Some(limit) = var("BUGFLOW_RATE_LIMIT") {
            self.server.rate_limit = limit.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("BUGFLOW_RATE_LIMIT is not a number: {}", limit))
            })?;
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.triage.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "triage.threshold must be between 0 and 1, got {}",
                threshold
            )));
        }
        if self.tracker.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "tracker.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(repo) = &self.tracker.repo {
            if !is_owner_slash_name(repo) {
                return Err(ConfigError::Invalid(format!(
                    "tracker.repo must be owner/name, got '{}'",
                    repo
                )));
            }
        }
        if self.tracker.claim_lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "tracker.claim_lease_secs must be at least 1".to_string(),
            ));
        }
        if self.server.rate_limit == 0 {
            return Err(ConfigError::Invalid(
                "server.rate_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_owner_slash_name(repo: &str) -> bool {
    match repo.split_once('/') {
        Some((owner, name)) => {
            let valid = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            };
            valid(owner) && valid(name)
        }
        None => false,
    }
}
