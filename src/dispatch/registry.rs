use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::providers::anthropic::AnthropicAdapter;
use crate::dispatch::providers::gemini::GeminiAdapter;
use crate::dispatch::providers::huggingface::HuggingFaceAdapter;
use crate::dispatch::providers::nani::NaniAdapter;
use crate::dispatch::providers::openai::OpenAiAdapter;
use crate::dispatch::{GenerationConfig, ProviderAdapter, ProviderKind, ProviderOptions};
use crate::error::EvalError;

/// Static description of a supported provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub kind: ProviderKind,
    /// Environment variable holding the credential.
    pub credential_env: &'static str,
    pub default_model: &'static str,
    /// Initialization options that must be present.
    pub required_options: &'static [&'static str],
}

pub static PROVIDERS: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        name: "gemini",
        kind: ProviderKind::Gemini,
        credential_env: "GEMINI_API_KEY",
        default_model: "gemini-2.0-flash-exp",
        required_options: &[],
    },
    ProviderDescriptor {
        name: "anthropic",
        kind: ProviderKind::Anthropic,
        credential_env: "ANTHROPIC_API_KEY",
        default_model: "claude-3-5-sonnet-20241022",
        required_options: &[],
    },
    ProviderDescriptor {
        name: "openai",
        kind: ProviderKind::OpenAi,
        credential_env: "OPENAI_API_KEY",
        default_model: "gpt-4o-mini-2024-07-18",
        required_options: &[],
    },
    ProviderDescriptor {
        name: "huggingface",
        kind: ProviderKind::HuggingFace,
        credential_env: "HUGGINGFACE_API_KEY",
        default_model: "tgi",
        required_options: &["base_url"],
    },
    ProviderDescriptor {
        name: "nani",
        kind: ProviderKind::Nani,
        credential_env: "NANI_API_KEY",
        default_model: "NaniDAO/deepseek-r1-qwen-2.5-32B-ablated",
        required_options: &["base_url"],
    },
];

/// Caller-supplied overrides for building one adapter.
/// Anything left `None` falls back to config, then environment, then the
/// descriptor default.
#[derive(Clone, Default)]
pub struct AdapterRequest {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub options: ProviderOptions,
}

impl std::fmt::Debug for AdapterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRequest")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("options", &self.options)
            .finish()
    }
}

/// Provider lookup and adapter construction, driven by an explicit [`Config`].
pub struct Registry {
    config: Config,
}

impl Registry {
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn list_providers(&self) -> impl Iterator<Item = &'static ProviderDescriptor> {
        PROVIDERS.iter()
    }

    pub fn get(&self, name: &str) -> Option<&'static ProviderDescriptor> {
        let name = name.trim().to_lowercase();
        PROVIDERS.iter().find(|d| d.name == name)
    }

    /// Look up a provider or fail with suggestions.
    pub fn descriptor(&self, name: &str) -> Result<&'static ProviderDescriptor, EvalError> {
        self.get(name).ok_or_else(|| EvalError::UnknownProvider {
            name: name.to_string(),
            suggestions: self.suggest_providers(name),
        })
    }

    /// Suggest similar provider names for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep error messages readable.
    pub fn suggest_providers(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = PROVIDERS
            .iter()
            .map(|d| d.name)
            .filter(|name| name.contains(&q) || q.contains(name))
            .map(str::to_string)
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }

    /// Resolve the credential: explicit value, then the captured environment.
    pub fn resolve_credential(
        &self,
        descriptor: &ProviderDescriptor,
        explicit: Option<&str>,
    ) -> Result<String, EvalError> {
        explicit
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.credentials.get(descriptor.name).cloned())
            .ok_or_else(|| {
                EvalError::config(
                    descriptor.name,
                    format!(
                        "no API key provided - set {} or pass api_key",
                        descriptor.credential_env
                    ),
                )
            })
    }

    /// Generation options configured for a provider (empty when none).
    pub fn generation_config(&self, name: &str) -> GenerationConfig {
        self.config
            .provider(name)
            .map(|s| s.generation.clone())
            .unwrap_or_default()
    }

    /// Collect per-provider overrides from `provider:value` items, keyed by
    /// canonical provider name. Only the first `:` separates, so URL values
    /// keep their scheme and port. A later item for the same provider wins.
    pub fn provider_overrides(
        &self,
        models: &[String],
        base_urls: &[String],
        api_keys: &[String],
    ) -> Result<HashMap<&'static str, AdapterRequest>, EvalError> {
        let mut overrides: HashMap<&'static str, AdapterRequest> = HashMap::new();
        for (items, field) in [(models, "model"), (base_urls, "base_url"), (api_keys, "api_key")] {
            for item in items {
                let (name, value) = item
                    .split_once(':')
                    .ok_or_else(|| EvalError::config(item, "expected provider:value"))?;
                let descriptor = self.descriptor(name)?;
                let value = value.trim().to_string();
                let request = overrides.entry(descriptor.name).or_default();
                match field {
                    "model" => request.model = Some(value),
                    "api_key" => request.api_key = Some(value),
                    _ => {
                        request.options.insert("base_url".to_string(), value);
                    }
                }
            }
        }
        Ok(overrides)
    }

    /// Build an adapter, failing fast on missing credentials or options.
    pub fn create_adapter(
        &self,
        name: &str,
        request: AdapterRequest,
    ) -> Result<Arc<dyn ProviderAdapter>, EvalError> {
        let descriptor = self.descriptor(name)?;
        let api_key = self.resolve_credential(descriptor, request.api_key.as_deref())?;
        let settings = self.config.provider(descriptor.name);

        let model = request
            .model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| settings.and_then(|s| s.model.clone()))
            .unwrap_or_else(|| descriptor.default_model.to_string());

        // Config file options first, then caller options on top.
        let mut options = ProviderOptions::new();
        if let Some(settings) = settings {
            options.extend(settings.options.clone());
            if let Some(url) = &settings.base_url {
                options.insert("base_url".to_string(), url.clone());
            }
        }
        options.extend(request.options);

        if let Some(missing) = descriptor
            .required_options
            .iter()
            .find(|key| options.get(**key).is_none_or(|v| v.trim().is_empty()))
        {
            return Err(EvalError::config(
                descriptor.name,
                format!("missing required option '{missing}'"),
            ));
        }

        tracing::info!(provider = descriptor.name, model = %model, "initializing provider");

        let adapter: Arc<dyn ProviderAdapter> = match descriptor.kind {
            ProviderKind::Gemini => Arc::new(GeminiAdapter::new(api_key, model, &options)?),
            ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(api_key, model, &options)?),
            ProviderKind::OpenAi => Arc::new(OpenAiAdapter::new(api_key, model, &options)?),
            ProviderKind::HuggingFace => {
                Arc::new(HuggingFaceAdapter::new(api_key, model, &options)?)
            }
            ProviderKind::Nani => Arc::new(NaniAdapter::new(api_key, model, &options)?),
        };
        Ok(adapter)
    }
}
