pub mod http;
pub mod providers;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EvalError;

/// Identity of the adapter that produced a response.
/// Threaded through every call so the normalizer never has to guess a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Anthropic,
    OpenAi,
    HuggingFace,
    Nani,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::HuggingFace => "huggingface",
            Self::Nani => "nani",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation options (temperature, max tokens, penalties, ...).
///
/// Keys are kept in insertion order and passed to the vendor verbatim, so
/// options this crate doesn't know about still reach the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationConfig(Map<String, Value>);

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Layer `self` over `defaults`: caller keys win, default-only keys survive.
    pub fn merged_over(&self, defaults: &GenerationConfig) -> GenerationConfig {
        let mut merged = defaults.0.clone();
        for (k, v) in &self.0 {
            merged.insert(k.clone(), v.clone());
        }
        GenerationConfig(merged)
    }

    /// Copy every option into a JSON request body, skipping envelope keys the
    /// adapter owns.
    pub fn apply_to(&self, body: &mut Map<String, Value>, reserved: &[&str]) {
        for (k, v) in &self.0 {
            if !reserved.contains(&k.as_str()) {
                body.insert(k.clone(), v.clone());
            }
        }
    }
}

impl From<Map<String, Value>> for GenerationConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Provider-specific initialization options beyond credential and model
/// (e.g. `base_url` for self-hosted endpoints).
pub type ProviderOptions = HashMap<String, String>;

/// Raw vendor payload tagged with the adapter that produced it.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider: ProviderKind,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Normalized result of one successful adapter call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub usage: TokenUsage,
}

/// Uniform capability set implemented once per vendor.
///
/// Adapters issue exactly one network call per `generate`. Rate limiting and
/// retries belong to the caller.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;

    /// Best-effort token count. Implementations must fall back to
    /// [`estimate_tokens`] instead of failing.
    async fn count_tokens(&self, text: &str) -> u64;

    fn default_config(&self) -> GenerationConfig;

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, EvalError>;
}

/// Length heuristic used whenever a real tokenizer is unavailable.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Resolve a counted value or fall back to the heuristic, logging why.
pub(crate) fn count_or_estimate<E: std::fmt::Display>(
    provider: ProviderKind,
    text: &str,
    counted: Result<u64, E>,
) -> u64 {
    match counted {
        Ok(n) => n,
        Err(e) => {
            tracing::debug!(%provider, "token count failed, estimating: {e}");
            estimate_tokens(text)
        }
    }
}
