use serde::Deserialize;
use serde_json::Value;

use crate::dispatch::ProviderKind;
use crate::error::EvalError;
use crate::parsers::{Normalized, ResponseParser, decode, unsupported};

/// Parses OpenAI-style chat completions.
/// Expected shape: `{"choices": [{"message": {"content": "..."}}], "usage": {...}}`
pub struct ChatCompletionParser;

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

impl ResponseParser for ChatCompletionParser {
    fn parse(&self, provider: ProviderKind, body: &Value) -> Result<Normalized, EvalError> {
        let completion: ChatCompletion = decode(provider, body)?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| unsupported(provider, "empty choices or null content"))?;

        let (input_tokens, output_tokens) = completion
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Normalized {
            text,
            input_tokens,
            output_tokens,
        })
    }
}
