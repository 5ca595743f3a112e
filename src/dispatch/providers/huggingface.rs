use async_trait::async_trait;

use crate::dispatch::http::{HttpTransport, join_url};
use crate::dispatch::providers::openai::chat_completion_body;
use crate::dispatch::providers::{BpeCounter, require_option};
use crate::dispatch::{GenerationConfig, ProviderAdapter, ProviderKind, ProviderOptions, ProviderResponse};
use crate::error::EvalError;

/// Self-hosted inference endpoint speaking the OpenAI chat-completions protocol
/// (TGI, vLLM, dedicated inference endpoints). `base_url` is mandatory.
pub struct HuggingFaceAdapter {
    http: HttpTransport,
    api_key: String,
    model: String,
    base_url: String,
    tokenizer: BpeCounter,
}

impl HuggingFaceAdapter {
    pub fn new(api_key: String, model: String, options: &ProviderOptions) -> Result<Self, EvalError> {
        let base_url = require_option(ProviderKind::HuggingFace, options, "base_url")?;
        Ok(Self {
            http: HttpTransport::new()?,
            tokenizer: BpeCounter::for_model(ProviderKind::HuggingFace, &model),
            api_key,
            model,
            base_url,
        })
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
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
