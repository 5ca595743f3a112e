use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::dispatch::http::{HttpTransport, join_url};
use crate::dispatch::providers::option_or;
use crate::dispatch::{
    GenerationConfig, ProviderAdapter, ProviderKind, ProviderOptions, ProviderResponse,
    count_or_estimate,
};
use crate::error::EvalError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: u64,
}

/// Google Generative Language API (`generateContent`).
///
/// Gemini has no separate system slot in this call path; the system prompt is
/// prepended to the user text.
pub struct GeminiAdapter {
    http: HttpTransport,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, model: String, options: &ProviderOptions) -> Result<Self, EvalError> {
        Ok(Self {
            http: HttpTransport::new()?,
            base_url: option_or(options, "base_url", DEFAULT_BASE_URL),
            api_key,
            model,
        })
    }

    fn model_url(&self, method: &str) -> String {
        join_url(&self.base_url, &format!("models/{}:{method}", self.model))
    }

    fn headers(&self) -> [(&'static str, String); 1] {
        [("x-goog-api-key", self.api_key.clone())]
    }

    async fn count_remote(&self, text: &str) -> Result<u64, EvalError> {
        let body = json!({"contents": [{"role": "user", "parts": [{"text": text}]}]});
        let value = self
            .http
            .post_json(self.kind(), &self.model_url("countTokens"), &self.headers(), &body)
            .await?;
        let parsed: CountTokensResponse =
            serde_json::from_value(value).map_err(|e| EvalError::UnsupportedResponse {
                provider: self.kind().to_string(),
                detail: format!("countTokens: {e}"),
            })?;
        Ok(parsed.total_tokens)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn count_tokens(&self, text: &str) -> u64 {
        count_or_estimate(self.kind(), text, self.count_remote(text).await)
    }

    fn default_config(&self) -> GenerationConfig {
        GenerationConfig::new()
            .with("temperature", 0.7)
            .with("top_p", 1.0)
            .with("top_k", 40)
            .with("candidate_count", 1)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, EvalError> {
        let config = config.merged_over(&self.default_config());
        let text = match system_prompt {
            Some(system) if !system.is_empty() => format!("{system}\n{prompt}"),
            _ => prompt.to_string(),
        };

        let mut generation_config = Map::new();
        config.apply_to(&mut generation_config, &["stream"]);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": text}]}],
            "generationConfig": Value::Object(generation_config),
        });

        let body = self
            .http
            .post_json(self.kind(), &self.model_url("generateContent"), &self.headers(), &body)
            .await?;
        Ok(ProviderResponse {
            provider: self.kind(),
            body,
        })
    }
}
