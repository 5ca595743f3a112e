use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::GenerationConfig;
use crate::dispatch::registry::PROVIDERS;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "nanieval.toml";
pub const DEFAULT_RATE_LIMIT: u32 = 5;
pub const DEFAULT_RATE_PERIOD_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rate: u32,
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE_LIMIT,
            period_secs: DEFAULT_RATE_PERIOD_SECS,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Per-provider overrides from the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Extra initialization options passed to the adapter verbatim.
    pub options: HashMap<String, String>,
    /// Generation options layered over the adapter defaults.
    pub generation: GenerationConfig,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub providers: HashMap<String, ProviderSettings>,
    /// Provider name → credential, captured from the environment.
    #[serde(skip)]
    pub credentials: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("out"),
            rate_limit: RateLimitConfig::default(),
            providers: HashMap::new(),
            credentials: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers_with_keys: Vec<&String> = self.credentials.keys().collect();
        providers_with_keys.sort();
        f.debug_struct("Config")
            .field("output_dir", &self.output_dir)
            .field("rate_limit", &self.rate_limit)
            .field("providers", &self.providers)
            .field("credentials", &format!("[REDACTED: {providers_with_keys:?}]"))
            .finish()
    }
}

impl Config {
    /// Load from a TOML file (if any), then layer the environment on top.
    ///
    /// An explicit `path` that can't be read or parsed is logged and replaced
    /// by defaults; a missing default file is silently skipped.
    pub fn load(path: Option<&Path>) -> Self {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text).unwrap_or_else(|e| {
                tracing::warn!("error loading config from {}: {e}", path.display());
                Self::default()
            }),
            Err(e) => {
                if explicit {
                    tracing::warn!("error loading config from {}: {e}", path.display());
                }
                Self::default()
            }
        };

        config.apply_env();
        config
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Environment-only configuration (no file).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Capture `<PROVIDER>_API_KEY` credentials and fill a missing `base_url`
    /// from `<PROVIDER>_BASE_URL`.
    fn apply_env(&mut self) {
        for descriptor in PROVIDERS {
            if let Ok(key) = env::var(descriptor.credential_env)
                && !key.trim().is_empty()
            {
                self.credentials.insert(descriptor.name.to_string(), key);
            }

            let url_var = format!("{}_BASE_URL", descriptor.name.to_uppercase());
            if let Ok(url) = env::var(&url_var) {
                let settings = self.providers.entry(descriptor.name.to_string()).or_default();
                if settings.base_url.is_none() {
                    settings.base_url = Some(url);
                }
            }
        }

        if self.credentials.is_empty() {
            tracing::warn!("no provider API keys found in environment");
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml(
            r#"
            output_dir = "results"

            [rate_limit]
            rate = 10
            period_secs = 30

            [providers.nani]
            base_url = "http://localhost:9000/generate"
            model = "custom"

            [providers.nani.generation]
            temperature = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("results"));
        assert_eq!(config.rate_limit.rate, 10);
        assert_eq!(config.rate_limit.period(), Duration::from_secs(30));
        let nani = config.provider("nani").unwrap();
        assert_eq!(nani.model.as_deref(), Some("custom"));
        assert_eq!(nani.generation.get("temperature"), Some(&serde_json::json!(0.2)));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn debug_redacts_credentials() {
        let mut config = Config::default();
        config
            .credentials
            .insert("openai".to_string(), "sk-secret".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
