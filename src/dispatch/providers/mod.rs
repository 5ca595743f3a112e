pub mod anthropic;
pub mod gemini;
pub mod huggingface;
pub mod nani;
pub mod openai;

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

use crate::dispatch::{ProviderKind, ProviderOptions, count_or_estimate};
use crate::error::EvalError;

/// Look up a mandatory initialization option, failing before any request.
pub(crate) fn require_option(
    kind: ProviderKind,
    options: &ProviderOptions,
    key: &str,
) -> Result<String, EvalError> {
    options
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EvalError::config(kind.as_str(), format!("missing required option '{key}'")))
}

/// Optional option with a hosted default, used so tests can point hosted
/// adapters at a local server.
pub(crate) fn option_or(options: &ProviderOptions, key: &str, default: &str) -> String {
    options
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

#[derive(Debug, Clone)]
enum Encoding {
    /// Encoding registered for a model name; unknown models fail and fall back.
    ForModel(String),
    Cl100k,
}

/// Lazily loaded tiktoken BPE. Loading happens at most once per adapter;
/// a failed load is remembered and every count uses the length heuristic.
pub(crate) struct BpeCounter {
    kind: ProviderKind,
    encoding: Encoding,
    bpe: OnceLock<Option<CoreBPE>>,
}

impl BpeCounter {
    pub(crate) fn for_model(kind: ProviderKind, model: &str) -> Self {
        Self {
            kind,
            encoding: Encoding::ForModel(model.to_string()),
            bpe: OnceLock::new(),
        }
    }

    pub(crate) fn cl100k(kind: ProviderKind) -> Self {
        Self {
            kind,
            encoding: Encoding::Cl100k,
            bpe: OnceLock::new(),
        }
    }

    pub(crate) fn count(&self, text: &str) -> u64 {
        let bpe = self.bpe.get_or_init(|| {
            let loaded = match &self.encoding {
                Encoding::ForModel(model) => tiktoken_rs::get_bpe_from_model(model),
                Encoding::Cl100k => tiktoken_rs::cl100k_base(),
            };
            match loaded {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    tracing::debug!(provider = %self.kind, "no tokenizer for {:?}: {e}", self.encoding);
                    None
                }
            }
        });
        let counted = bpe
            .as_ref()
            .map(|bpe| bpe.encode_with_special_tokens(text).len() as u64)
            .ok_or("tokenizer unavailable");
        count_or_estimate(self.kind, text, counted)
    }
}
