//! Redaction of diagnostics before persistence or transmission.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::DiagnosticsSnapshot;

pub const REDACTION_MARKER: &str = "[REDACTED]";
pub const TRUNCATION_SUFFIX: &str = "...[TRUNCATED]";
pub const MAX_DEPTH_MARKER: &str = "[MAX_DEPTH_REACHED]";

const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "authorization",
    "token",
    "cookie",
    "password",
    "secret",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "session_id",
];

/// Rules applied to every diagnostics value.
///
/// A mapping key is sensitive when its lowercased name contains any of
/// `sensitive_keys`; its value is replaced by `marker` whatever its type.
/// Strings longer than `max_string_len` characters are truncated, and
/// subtrees nested deeper than `max_depth` are replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionPolicy {
    pub sensitive_keys: Vec<String>,
    pub marker: String,
    pub max_string_len: usize,
    pub max_depth: usize,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        RedactionPolicy {
            sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
            marker: REDACTION_MARKER.to_string(),
            max_string_len: 1000,
            max_depth: 16,
        }
    }
}

impl RedactionPolicy {
    /// Add extra sensitive keys on top of the configured set.
    pub fn with_extra_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            let key = key.into().trim().to_lowercase();
            if !key.is_empty() && !self.sensitive_keys.contains(&key) {
                self.sensitive_keys.push(key);
            }
        }
        self
    }

    /// Blank entries in `sensitive_keys` match nothing.
    pub fn is_sensitive(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        self.sensitive_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .any(|k| lower.contains(k.to_lowercase().as_str()))
    }

    /// Redact a recorder snapshot.
    pub fn redact_snapshot(&self, snapshot: &DiagnosticsSnapshot) -> RedactedDiagnostics {
        let value = serde_json::to_value(snapshot).unwrap_or(Value::Null);
        self.redact_value(value)
    }

    /// Redact an arbitrary JSON value, e.g. a snapshot received from a client.
    pub fn redact_value(&self, value: Value) -> RedactedDiagnostics {
        RedactedDiagnostics(self.process(value, 0))
    }

    fn process(&self, value: Value, depth: usize) -> Value {
        if depth > self.max_depth {
            return Value::String(MAX_DEPTH_MARKER.to_string());
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    let child = if self.is_sensitive(&key) {
                        Value::String(self.marker.clone())
                    } else {
                        self.process(child, depth + 1)
                    };
                    out.insert(key, child);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.process(item, depth + 1))
                    .collect(),
            ),
            Value::String(s) => Value::String(self.truncate(s)),
            other => other,
        }
    }

    fn truncate(&self, s: String) -> String {
        match s.char_indices().nth(self.max_string_len) {
            Some((cut, _)) => {
                let mut out = s[..cut].to_string();
                out.push_str(TRUNCATION_SUFFIX);
                out
            }
            None => s,
        }
    }
}

/// A diagnostics value that has been through a [`RedactionPolicy`].
///
/// There is no public constructor other than the policy, so anything that
/// persists, renders or transmits diagnostics and takes this type is
/// guaranteed to see redacted data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RedactedDiagnostics(Value);

impl RedactedDiagnostics {
    /// Wrap a value read back from storage. Stored diagnostics were redacted
    /// before insertion.
    pub(crate) fn from_stored(value: Value) -> Self {
        RedactedDiagnostics(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| "null".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_at_any_depth() {
        let policy = RedactionPolicy::default();
        let input = json!({
            "url": "/settings",
            "headers": {"Authorization": "Bearer abc123", "accept": "json"},
            "logs": [
                {"message": "ok", "details": {"nested": [{"password": "hunter2"}]}}
            ],
            "Session_ID": 42
        });
        let out = policy.redact_value(input).into_value();

        assert_eq!(out["headers"]["Authorization"], "[REDACTED]");
        assert_eq!(out["headers"]["accept"], "json");
        assert_eq!(out["logs"][0]["details"]["nested"][0]["password"], "[REDACTED]");
        assert_eq!(out["Session_ID"], "[REDACTED]");

        let text = serde_json::to_string(&out).unwrap();
        assert!(!text.contains("abc123"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn blank_configured_keys_match_nothing() {
        let policy: RedactionPolicy =
            serde_json::from_value(json!({"sensitive_keys": ["", "  ", "token"]})).unwrap();
        let out = policy
            .redact_value(json!({"page": "/cart", "csrf_token": "abc"}))
            .into_value();
        assert_eq!(out["page"], "/cart");
        assert_eq!(out["csrf_token"], "[REDACTED]");
    }

    #[test]
    fn containment_matches_compound_keys() {
        let policy = RedactionPolicy::default();
        let out = policy
            .redact_value(json!({"x-csrf-token": "t", "userPassword": "p", "name": "n"}))
            .into_value();
        assert_eq!(out["x-csrf-token"], "[REDACTED]");
        assert_eq!(out["userPassword"], "[REDACTED]");
        assert_eq!(out["name"], "n");
    }

    #[test]
    fn sensitive_container_values_are_replaced_whole() {
        let policy = RedactionPolicy::default();
        let out = policy
            .redact_value(json!({"cookie": {"sid": "1", "theme": "dark"}}))
            .into_value();
        assert_eq!(out["cookie"], "[REDACTED]");
    }

    #[test]
    fn long_strings_are_truncated() {
        let policy = RedactionPolicy {
            max_string_len: 5,
            ..RedactionPolicy::default()
        };
        let out = policy
            .redact_value(json!({"message": "abcdefghij", "short": "abc"}))
            .into_value();
        assert_eq!(out["message"], "abcde...[TRUNCATED]");
        assert_eq!(out["short"], "abc");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let policy = RedactionPolicy {
            max_string_len: 2,
            ..RedactionPolicy::default()
        };
        let out = policy.redact_value(json!("héllo")).into_value();
        assert_eq!(out, "hé...[TRUNCATED]");
    }

    #[test]
    fn deep_subtrees_are_cut() {
        let policy = RedactionPolicy {
            max_depth: 2,
            ..RedactionPolicy::default()
        };
        let out = policy
            .redact_value(json!({"a": {"b": {"c": {"d": 1}}}}))
            .into_value();
        assert_eq!(out["a"]["b"]["c"], "[MAX_DEPTH_REACHED]");
    }

    #[test]
    fn extra_keys_extend_default_set() {
        let policy = RedactionPolicy::default().with_extra_keys(["SSN"]);
        let out = policy.redact_value(json!({"user_ssn": "123"})).into_value();
        assert_eq!(out["user_ssn"], "[REDACTED]");
    }
}
