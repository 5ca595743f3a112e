use serde::Deserialize;
use serde_json::Value;

use crate::dispatch::ProviderKind;
use crate::error::EvalError;
use crate::parsers::{Normalized, ResponseParser, decode, unsupported};

/// Parses `generateContent` output.
/// Expected shape: `{"candidates": [{"content": {"parts": [{"text": "..."}]}}], "usageMetadata": {...}}`
pub struct GeminiParser;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

impl ResponseParser for GeminiParser {
    fn parse(&self, provider: ProviderKind, body: &Value) -> Result<Normalized, EvalError> {
        let response: GenerateContentResponse = decode(provider, body)?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unsupported(provider, "no candidate text (blocked or empty)"))?;

        let (input_tokens, output_tokens) = response
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        Ok(Normalized {
            text,
            input_tokens,
            output_tokens,
        })
    }
}
