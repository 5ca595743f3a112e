use thiserror::Error;

/// Message fragments that mark a provider failure as transient.
/// Matched case-insensitively against the rendered error.
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "rate limit",
    "429",
    "too many requests",
    "quota",
    "resource exhaust",
    "service unavailable",
    "internal server error",
    "503",
    "500",
];

/// Coarse failure class used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("configuration error for {provider}: {message}")]
    Configuration { provider: String, message: String },

    #[error("unsupported provider: {name}")]
    UnknownProvider {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("request to {provider} failed: {message}")]
    Request {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("request to {provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    #[error("{provider} still failing after {attempts} attempts: {source}")]
    RetryExhausted {
        provider: String,
        attempts: u32,
        #[source]
        source: Box<EvalError>,
    },

    #[error("unsupported response from {provider}: {detail}")]
    UnsupportedResponse { provider: String, detail: String },

    #[error("no valid JSON from {provider} after {attempts} attempts: {parse_error}")]
    JsonExtraction {
        provider: String,
        attempts: u32,
        raw: String,
        parse_error: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EvalError {
    pub fn config(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Configuration { provider, .. }
            | Self::Request { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::RetryExhausted { provider, .. }
            | Self::UnsupportedResponse { provider, .. }
            | Self::JsonExtraction { provider, .. } => Some(provider),
            Self::UnknownProvider { .. } | Self::Http(_) => None,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    ///
    /// Only the upstream status and body are matched, never the provider name
    /// or endpoint. Configuration, shape and extraction failures are never
    /// retried, even if their text happens to contain a transient signature.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Request { message, .. } => has_transient_signature(message),
            Self::Http(e) => {
                e.is_timeout() || e.status().is_some_and(|s| has_transient_signature(&s.to_string()))
            }
            _ => false,
        }
    }

    pub fn class(&self) -> ErrorClass {
        if self.is_retryable() {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        }
    }

    /// Short machine-readable tag, stored alongside failed batch records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::Request { .. } | Self::Http(_) => match self.class() {
                ErrorClass::Transient => "transient",
                ErrorClass::Fatal => "fatal",
            },
            Self::Timeout { .. } => "timeout",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::UnsupportedResponse { .. } => "unsupported_response",
            Self::JsonExtraction { .. } => "json_extraction",
        }
    }

    /// Produce a sanitized error message safe for writing into output artifacts.
    /// Does not leak request URLs or full upstream bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownProvider { name, suggestions } => {
                if suggestions.is_empty() {
                    format!("unsupported provider: {name}")
                } else {
                    format!(
                        "unsupported provider: {name}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::Request {
                provider, message, ..
            } => format!("request to {provider} failed: {}", preview(message, 300)),
            Self::RetryExhausted {
                provider,
                attempts,
                source,
            } => format!(
                "{provider} still failing after {attempts} attempts: {}",
                source.user_message()
            ),
            Self::JsonExtraction {
                provider,
                attempts,
                parse_error,
                ..
            } => format!("no valid JSON from {provider} after {attempts} attempts: {parse_error}"),
            Self::Http(_) => "request to provider failed".to_string(),
            other => other.to_string(),
        }
    }
}

/// Take at most `max` chars, marking the cut with a trailing ellipsis.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}...")
}

fn has_transient_signature(text: &str) -> bool {
    let text = text.to_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| text.contains(sig))
}
