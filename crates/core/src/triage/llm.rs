//! LLM-backed classifier: LlmClient trait, LlmTriageClassifier, AnthropicClient.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bugflow_storage::Classification;

use super::{
    clamp_confidence, strip_code_fences, FallbackPolicy, ReportText, TriageClassifier,
    TriageVerdict,
};

/// Error type for LLM client operations.
#[derive(Debug)]
pub enum LlmError {
    /// Network or HTTP error.
    NetworkError(String),
    /// LLM API returned an error response.
    ApiError { status: u16, message: String },
    /// Failed to parse the LLM response.
    ParseError(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::NetworkError(msg) => write!(f, "LLM network error: {}", msg),
            LlmError::ApiError { status, message } => {
                write!(f, "LLM API error ({}): {}", status, message)
            }
            LlmError::ParseError(msg) => write!(f, "LLM parse error: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

/// A message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Trait for calling an LLM to get a text completion.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String, LlmError>;
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(rename = "type")]
    classification: String,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Classifier that asks a language model for an intent label.
///
/// Exactly one model call per report. A failed call or an unparseable answer
/// is logged and replaced by the fallback verdict; nothing is retried.
pub struct LlmTriageClassifier {
    client: Box<dyn LlmClient>,
    model: String,
    fallback: FallbackPolicy,
}

impl LlmTriageClassifier {
    pub fn new(client: Box<dyn LlmClient>, model: impl Into<String>) -> Self {
        LlmTriageClassifier {
            client,
            model: model.into(),
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    fn system_prompt() -> &'static str {
        r#"You triage in-app feedback submitted by users of a web application.

Classify the report as one of:
- "bug": something is broken or behaves differently from what the user expected
- "feature_request": the user asks for new functionality or a change in design
- "ambiguous": it is not clear which of the two applies

Respond only with a JSON object in exactly this format:

{"type": "bug" | "feature_request" | "ambiguous", "confidence": <number between 0 and 1>, "reasoning": "<one sentence>"}

Do not include markdown fences or any other text."#
    }

    fn build_user_message(text: &ReportText) -> String {
        let mut out = format!("Notes:\n{}\n", text.notes);
        if let Some(expected) = &text.expected {
            out.push_str(&format!("\nExpected behavior:\n{}\n", expected));
        }
        if let Some(actual) = &text.actual {
            out.push_str(&format!("\nActual behavior:\n{}\n", actual));
        }
        out
    }

    /// Parse a model answer into a verdict.
    pub(crate) fn parse_response(response: &str) -> Result<TriageVerdict, String> {
        let json_str = strip_code_fences(response);
        let raw: RawVerdict = serde_json::from_str(json_str)
            .map_err(|e| format!("Failed to parse JSON: {}", e))?;
        let classification: Classification = raw
            .classification
            .trim()
            .to_lowercase()
            .parse()
            .map_err(|e| format!("{}", e))?;
        Ok(TriageVerdict {
            classification,
            confidence: clamp_confidence(raw.confidence),
            reasoning: raw.reasoning,
            fallback: false,
        })
    }
}

#[async_trait]
impl TriageClassifier for LlmTriageClassifier {
    async fn classify(&self, text: &ReportText) -> TriageVerdict {
        let messages = vec![
            Message::system(Self::system_prompt()),
            Message::user(Self::build_user_message(text)),
        ];

        let response = match self.client.complete(messages, &self.model).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "triage model call failed, using fallback verdict");
                return TriageVerdict::unavailable(self.fallback);
            }
        };

        match Self::parse_response(&response) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "triage model answer unusable, using fallback verdict");
                TriageVerdict::unavailable(self.fallback)
            }
        }
    }
}

// -- AnthropicClient (feature-gated) --

#[cfg(feature = "http")]
/// LLM client for the Anthropic Messages API.
///
/// Uses `ureq` for HTTP inside `spawn_blocking`.
pub struct AnthropicClient {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL (default: https://api.anthropic.com).
    pub base_url: String,
    pub max_tokens: u32,
}

#[cfg(feature = "http")]
impl AnthropicClient {
    /// Create a new AnthropicClient from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            LlmError::NetworkError("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 256,
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String, LlmError> {
        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();

        // Anthropic takes the system prompt as a separate field
        let system: Option<String> = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone());

        let non_system: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| {
                serde_json::json!({
                    "role": m.role,
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "messages": non_system,
        });
        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys);
        }

        tokio::task::spawn_blocking(move || {
            let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));
            let agent: ureq::Agent = ureq::Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(std::time::Duration::from_secs(30)))
                .build()
                .into();
            let mut resp = agent
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .send_json(body)
                .map_err(|e| LlmError::NetworkError(e.to_string()))?;

            let status = resp.status().as_u16();
            if status >= 400 {
                let message = resp.body_mut().read_to_string().unwrap_or_default();
                return Err(LlmError::ApiError { status, message });
            }

            let json: serde_json::Value = resp.body_mut().read_json().map_err(|e| {
                LlmError::ParseError(format!("Failed to parse Anthropic response: {}", e))
            })?;
            json["content"]
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(|c| c["text"].as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| {
                    LlmError::ParseError("No text content in Anthropic response".to_string())
                })
        })
        .await
        .map_err(|e| LlmError::NetworkError(format!("Task join error: {}", e)))?
    }
}
