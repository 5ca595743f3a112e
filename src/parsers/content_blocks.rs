use serde::Deserialize;
use serde_json::Value;

use crate::dispatch::ProviderKind;
use crate::error::EvalError;
use crate::parsers::{Normalized, ResponseParser, decode, unsupported};

/// Parses Anthropic Messages responses.
/// Text blocks are concatenated in order; non-text blocks are skipped.
pub struct ContentBlocksParser;

#[derive(Deserialize)]
struct MessageResponse {
    content: Vec<Block>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl ResponseParser for ContentBlocksParser {
    fn parse(&self, provider: ProviderKind, body: &Value) -> Result<Normalized, EvalError> {
        let response: MessageResponse = decode(provider, body)?;

        let parts: Vec<String> = response
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect();

        if parts.is_empty() {
            return Err(unsupported(provider, "no text content blocks"));
        }

        let (input_tokens, output_tokens) = response
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Ok(Normalized {
            text: parts.concat(),
            input_tokens,
            output_tokens,
        })
    }
}
