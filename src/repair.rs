//! Self-correcting JSON extraction.
//!
//! Models often wrap JSON in prose or markdown fences. The repair loop strips
//! a fence when one is present, tries to parse, and on failure re-prompts the
//! model with the parser's exact error. It never guesses at malformed output.

use std::future::Future;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::EvalError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\n(.*?)```").expect("fenced block regex is valid")
});

/// Return the body of the first fenced block (optionally tagged `json`),
/// or the trimmed input when there is none.
pub fn strip_code_fence(text: &str) -> &str {
    if text.contains("```")
        && let Some(body) = FENCED_BLOCK.captures(text).and_then(|c| c.get(1))
    {
        return body.as_str().trim();
    }
    text.trim()
}

/// Strip any fence and parse as JSON.
pub fn parse_structured(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fence(text))
}

/// Follow-up prompt that feeds the parse error back to the model.
pub fn corrective_prompt(error: &str, original_prompt: &str) -> String {
    format!(
        "Your previous response could not be parsed as valid JSON. The specific error was: {error}\n\
         \n\
         IMPORTANT: You must provide a response that:\n\
         1. Contains ONLY valid JSON\n\
         2. Has NO markdown code blocks\n\
         3. Has NO explanatory text\n\
         4. Follows the exact schema requested\n\
         5. Uses proper JSON syntax (quotes, commas, brackets)\n\
         6. AVOID falling into recursive loops when retrieving data from the prompt\n\
         \n\
         Here is the original prompt again:\n\
         {original_prompt}"
    )
}

/// Bounded re-prompting until the model's reply parses as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonRepair {
    pub max_attempts: u32,
}

impl Default for JsonRepair {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl JsonRepair {
    /// Drive `generate` until its text parses as JSON.
    ///
    /// `generate` receives the prompt to submit: the original on the first
    /// attempt, a corrective prompt afterwards. Errors from `generate` itself
    /// abort the loop untouched.
    pub async fn run<F, Fut>(&self, provider: &str, prompt: &str, mut generate: F) -> Result<Value, EvalError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<String, EvalError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut next_prompt = prompt.to_string();
        let mut attempt = 1;

        loop {
            let raw = generate(next_prompt).await?;

            let parse_error = match parse_structured(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => e.to_string(),
            };

            if attempt >= max_attempts {
                tracing::error!(provider, attempts = attempt, %parse_error, "failed to parse JSON");
                return Err(EvalError::JsonExtraction {
                    provider: provider.to_string(),
                    attempts: attempt,
                    raw,
                    parse_error,
                });
            }

            tracing::warn!(
                provider,
                attempt,
                max_attempts,
                %parse_error,
                "JSON parsing failed, retrying with feedback"
            );
            next_prompt = corrective_prompt(&parse_error, prompt);
            attempt += 1;
        }
    }
}
