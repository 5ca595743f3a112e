use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::dispatch::http::HttpTransport;
use crate::dispatch::providers::{BpeCounter, require_option};
use crate::dispatch::{GenerationConfig, ProviderAdapter, ProviderKind, ProviderOptions, ProviderResponse};
use crate::error::EvalError;

const RESERVED_KEYS: &[&str] = &["modelId", "messages", "stream", "system"];

/// Raw HTTP endpoint with a bespoke envelope:
/// request `{"modelId", "messages", "stream", "system"?}`,
/// response `{"text", "total_tokens"}`.
pub struct NaniAdapter {
    http: HttpTransport,
    api_key: String,
    model: String,
    base_url: String,
    tokenizer: BpeCounter,
}

impl NaniAdapter {
    pub fn new(api_key: String, model: String, options: &ProviderOptions) -> Result<Self, EvalError> {
        let base_url = require_option(ProviderKind::Nani, options, "base_url")?;
        Ok(Self {
            http: HttpTransport::new()?,
            tokenizer: BpeCounter::cl100k(ProviderKind::Nani),
            api_key,
            model,
            base_url,
        })
    }
}

#[async_trait]
impl ProviderAdapter for NaniAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nani
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn count_tokens(&self, text: &str) -> u64 {
        self.tokenizer.count(text)
    }

    fn default_config(&self) -> GenerationConfig {
        GenerationConfig::new()
            .with("temperature", 0.7)
            .with("max_tokens", 8096)
            .with("top_p", 1.0)
            .with("frequency_penalty", 0.0)
            .with("presence_penalty", 0.0)
            .with("stream", false)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, EvalError> {
        let config = config.merged_over(&self.default_config());

        let mut body = Map::new();
        body.insert("modelId".to_string(), Value::from(self.model.as_str()));
        body.insert(
            "messages".to_string(),
            json!([{"role": "user", "content": prompt}]),
        );
        body.insert("stream".to_string(), Value::Bool(false));
        if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
            body.insert("system".to_string(), Value::from(system));
        }
        config.apply_to(&mut body, RESERVED_KEYS);

        let headers = [("x-api-key", self.api_key.clone())];
        let body = self
            .http
            .post_json(self.kind(), &self.base_url, &headers, &Value::Object(body))
            .await?;
        Ok(ProviderResponse {
            provider: self.kind(),
            body,
        })
    }
}
