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

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

const RESERVED_KEYS: &[&str] = &["model", "messages", "system", "stream"];

#[derive(Deserialize)]
struct CountTokensResponse {
    input_tokens: u64,
}

/// Anthropic Messages API.
pub struct AnthropicAdapter {
    http: HttpTransport,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, model: String, options: &ProviderOptions) -> Result<Self, EvalError> {
        Ok(Self {
            http: HttpTransport::new()?,
            base_url: option_or(options, "base_url", DEFAULT_BASE_URL),
            api_key,
            model,
        })
    }

    fn headers(&self) -> [(&'static str, String); 2] {
        [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", API_VERSION.to_string()),
        ]
    }

    async fn count_remote(&self, text: &str) -> Result<u64, EvalError> {
        let url = join_url(&self.base_url, "messages/count_tokens");
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": text}],
        });
        let value = self
            .http
            .post_json(self.kind(), &url, &self.headers(), &body)
            .await?;
        let parsed: CountTokensResponse =
            serde_json::from_value(value).map_err(|e| EvalError::UnsupportedResponse {
                provider: self.kind().to_string(),
                detail: format!("count_tokens: {e}"),
            })?;
        Ok(parsed.input_tokens)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn count_tokens(&self, text: &str) -> u64 {
        count_or_estimate(self.kind(), text, self.count_remote(text).await)
    }

    fn default_config(&self) -> GenerationConfig {
        GenerationConfig::new()
            .with("max_tokens", 8096)
            .with("temperature", 0.7)
            .with("top_p", 1.0)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, EvalError> {
        let config = config.merged_over(&self.default_config());

        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(self.model.as_str()));
        if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
            body.insert("system".to_string(), Value::from(system));
        }
        body.insert(
            "messages".to_string(),
            json!([{"role": "user", "content": prompt}]),
        );
        config.apply_to(&mut body, RESERVED_KEYS);

        let url = join_url(&self.base_url, "messages");
        let body = self
            .http
            .post_json(self.kind(), &url, &self.headers(), &Value::Object(body))
            .await?;
        Ok(ProviderResponse {
            provider: self.kind(),
            body,
        })
    }
}
