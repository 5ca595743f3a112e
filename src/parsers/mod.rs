pub mod chat_completion;
pub mod content_blocks;
pub mod flat;
pub mod gemini;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dispatch::{GenerationResult, ProviderAdapter, ProviderKind, ProviderResponse, TokenUsage};
use crate::error::EvalError;

/// Text and whatever usage the vendor reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Trait for extracting text and usage from one vendor response shape.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, provider: ProviderKind, body: &Value) -> Result<Normalized, EvalError>;
}

/// Resolve the parser for the adapter that produced a response.
pub fn parser_for(provider: ProviderKind) -> &'static dyn ResponseParser {
    match provider {
        ProviderKind::OpenAi | ProviderKind::HuggingFace => &chat_completion::ChatCompletionParser,
        ProviderKind::Anthropic => &content_blocks::ContentBlocksParser,
        ProviderKind::Gemini => &gemini::GeminiParser,
        ProviderKind::Nani => &flat::FlatParser,
    }
}

/// Normalize a raw response into a [`GenerationResult`].
///
/// Missing output usage is recounted from the extracted text with the
/// adapter's tokenizer; missing input usage uses `prompt_tokens`, the count
/// taken before the request was sent.
pub async fn normalize(
    response: &ProviderResponse,
    adapter: &dyn ProviderAdapter,
    prompt_tokens: u64,
) -> Result<GenerationResult, EvalError> {
    let parsed = parser_for(response.provider).parse(response.provider, &response.body)?;

    let output = match parsed.output_tokens {
        Some(n) => n,
        None => adapter.count_tokens(&parsed.text).await,
    };

    Ok(GenerationResult {
        text: parsed.text,
        usage: TokenUsage {
            input: parsed.input_tokens.unwrap_or(prompt_tokens),
            output,
        },
    })
}

/// Deserialize a shape, mapping mismatch to `UnsupportedResponse`.
pub(crate) fn decode<T: DeserializeOwned>(provider: ProviderKind, body: &Value) -> Result<T, EvalError> {
    T::deserialize(body).map_err(|e| unsupported(provider, format!("unexpected shape: {e}")))
}

pub(crate) fn unsupported(provider: ProviderKind, detail: impl Into<String>) -> EvalError {
    EvalError::UnsupportedResponse {
        provider: provider.to_string(),
        detail: detail.into(),
    }
}
