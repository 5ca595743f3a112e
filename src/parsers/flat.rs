use serde::Deserialize;
use serde_json::Value;

use crate::dispatch::ProviderKind;
use crate::error::EvalError;
use crate::parsers::{Normalized, ResponseParser, decode};

/// Parses the flat `{"text": "...", "total_tokens": n}` envelope.
/// `total_tokens` is the only usage figure this envelope carries; it is
/// recorded as output usage.
pub struct FlatParser;

#[derive(Deserialize)]
struct FlatResponse {
    text: String,
    total_tokens: Option<u64>,
}

impl ResponseParser for FlatParser {
    fn parse(&self, provider: ProviderKind, body: &Value) -> Result<Normalized, EvalError> {
        let response: FlatResponse = decode(provider, body)?;
        Ok(Normalized {
            text: response.text,
            input_tokens: None,
            output_tokens: response.total_tokens,
        })
    }
}
