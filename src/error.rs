//! Typed error taxonomy shared across the core services.
//!
//! Validation and state errors are returned as values, never panics.
//! Backend error text passes through [`redact`] before it is stored on
//! an action or instance, so key/token/password-shaped substrings never
//! reach the audit log.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Upper bound on stored error message length.
const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Input blocked by the classifier gate.
    #[error("input blocked: {threat_level} threat ({patterns:?})")]
    Validation {
        threat_level: String,
        patterns: Vec<String>,
    },

    /// Action or sandbox concurrency limit exceeded.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// No backend able to serve the request on this host.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    /// Unknown action or instance id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation invalid for the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Exec exceeded its wall-clock deadline. Distinct from a generic
    /// failure: the command never finished, it did not fail.
    #[error("execution timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Underlying runtime or provider command failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl CoreError {
    /// Wraps an arbitrary failure as a backend error with redacted,
    /// size-bounded text.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        CoreError::Backend(redact(&err.to_string()))
    }
}

fn redaction_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"sk-[A-Za-z0-9]{8,}").expect("static pattern"),
                "[REDACTED_API_KEY]",
            ),
            (
                Regex::new(r"(?i)(password|passwd|token|secret|api[_-]?key|key)\s*[=:]\s*\S+")
                    .expect("static pattern"),
                "$1=[REDACTED]",
            ),
        ]
    })
}

/// Strips secret-shaped substrings from an error message and bounds its
/// length. Applied to every backend error before storage or audit.
pub fn redact(message: &str) -> String {
    let mut out = message.to_string();
    for (pattern, replacement) in redaction_patterns() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    if out.chars().count() > MAX_ERROR_LEN {
        out = out.chars().take(MAX_ERROR_LEN).collect::<String>() + "…";
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_api_key() {
        let msg = "request failed: sk-abcdef1234567890 rejected";
        let redacted = redact(msg);
        assert!(!redacted.contains("sk-abcdef"));
        assert!(redacted.contains("[REDACTED_API_KEY]"));
    }

    #[test]
    fn test_redact_key_value_pairs() {
        let redacted = redact("auth: password=hunter2 token: abc123");
        assert!(!redacted.contains("hunter2"));
        assert!(!redacted.contains("abc123"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn test_redact_bounds_length() {
        let long = "x".repeat(2000);
        let redacted = redact(&long);
        assert!(redacted.chars().count() <= MAX_ERROR_LEN + 1);
        assert!(redacted.ends_with('…'));
    }

    #[test]
    fn test_redact_passes_clean_messages() {
        let msg = "bundle directory missing";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn test_backend_constructor_redacts() {
        let err = CoreError::backend("connect failed, api_key=sekret123");
        let text = err.to_string();
        assert!(!text.contains("sekret123"));
    }

    #[test]
    fn test_timeout_is_distinct_variant() {
        let err = CoreError::Timeout { seconds: 30 };
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(err.to_string().contains("30s"));
    }
}
