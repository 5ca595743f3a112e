use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::dispatch::http::{HttpTransport, join_url};
use crate::dispatch::providers::{BpeCounter, option_or};
use crate::dispatch::{GenerationConfig, ProviderAdapter, ProviderKind, ProviderOptions, ProviderResponse};
use crate::error::EvalError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Keys owned by the chat-completions envelope; caller config can't override them.
const RESERVED_KEYS: &[&str] = &["model", "messages", "stream"];

/// Build an OpenAI-style chat-completions body.
/// Shared with every OpenAI-compatible endpoint.
pub(crate) fn chat_completion_body(
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    config: &GenerationConfig,
) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let mut body = Map::new();
    body.insert("model".to_string(), Value::from(model));
    body.insert("messages".to_string(), Value::Array(messages));
    config.apply_to(&mut body, RESERVED_KEYS);
    Value::Object(body)
}

/// Hosted OpenAI chat completions.
pub struct OpenAiAdapter {
    http: HttpTransport,
    api_key: String,
    model: String,
    base_url: String,
    tokenizer: BpeCounter,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, model: String, options: &ProviderOptions) -> Result<Self, EvalError> {
        Ok(Self {
            http: HttpTransport::new()?,
            base_url: option_or(options, "base_url", DEFAULT_BASE_URL),
            tokenizer: BpeCounter::for_model(ProviderKind::OpenAi, &model),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn count_tokens(&self, text: &str) -> u64 {
        self.tokenizer.count(text)
    }

    fn default_config(&self) -> GenerationConfig {
        GenerationConfig::new()
            .with("temperature", 0.9)
            .with("max_tokens", 4096)
            .with("top_p", 1.0)
            .with("frequency_penalty", 0.0)
            .with("presence_penalty", 0.0)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
    ) -> Result<ProviderResponse, EvalError> {
        let config = config.merged_over(&self.default_config());
        let body = chat_completion_body(&self.model, prompt, system_prompt, &config);
        let url = join_url(&self.base_url, "chat/completions");
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];

        let body = self.http.post_json(self.kind(), &url, &headers, &body).await?;
        Ok(ProviderResponse {
            provider: self.kind(),
            body,
        })
    }
}
