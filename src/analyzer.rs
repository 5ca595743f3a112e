use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::config::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_PERIOD_SECS};
use crate::dispatch::registry::{AdapterRequest, Registry};
use crate::dispatch::{GenerationConfig, GenerationResult, ProviderAdapter, ProviderKind};
use crate::error::EvalError;
use crate::limiter::RateLimiter;
use crate::parsers;
use crate::repair::JsonRepair;
use crate::retry::RetryPolicy;

/// Cumulative usage for one analyzer session. Only ever increases.
#[derive(Debug, Default)]
pub struct UsageCounters {
    tokens: AtomicU64,
    requests: AtomicU64,
}

impl UsageCounters {
    fn record(&self, tokens: u64) -> UsageSnapshot {
        let total_tokens = self.tokens.fetch_add(tokens, Ordering::Relaxed) + tokens;
        let requests = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        UsageSnapshot {
            total_tokens,
            requests,
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            total_tokens: self.tokens.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub total_tokens: u64,
    pub requests: u64,
}

/// Session-level knobs for an [`Analyzer`].
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub system_prompt: Option<String>,
    /// Caller generation options; merged over the adapter defaults per request.
    pub config: GenerationConfig,
    pub rate: u32,
    pub period: Duration,
    pub retry: RetryPolicy,
    pub repair: JsonRepair,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            system_prompt: None,
            config: GenerationConfig::new(),
            rate: DEFAULT_RATE_LIMIT,
            period: Duration::from_secs(DEFAULT_RATE_PERIOD_SECS),
            retry: RetryPolicy::default(),
            repair: JsonRepair::default(),
        }
    }
}

/// Entry point for dispatching prompts to one provider.
///
/// Each call runs: rate limit → retry-wrapped generate → normalize → usage.
/// Structured calls add the JSON repair loop on top, and every resubmission
/// it makes is a full pipeline run of its own.
///
/// `Analyzer` is `Send + Sync`; share it behind an `Arc` to drive prompts
/// from several tasks against one limiter.
pub struct Analyzer {
    adapter: Arc<dyn ProviderAdapter>,
    system_prompt: Option<String>,
    config: GenerationConfig,
    limiter: RateLimiter,
    retry: RetryPolicy,
    repair: JsonRepair,
    usage: UsageCounters,
    prompt_seq: AtomicU64,
}

impl Analyzer {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, settings: AnalyzerSettings) -> Self {
        Self {
            limiter: RateLimiter::new(settings.rate, settings.period),
            adapter,
            system_prompt: settings.system_prompt,
            config: settings.config,
            retry: settings.retry,
            repair: settings.repair,
            usage: UsageCounters::default(),
            prompt_seq: AtomicU64::new(0),
        }
    }

    /// Build an analyzer for a registered provider. Config-file generation
    /// options are used when `settings.config` is empty.
    pub fn from_registry(
        registry: &Registry,
        provider: &str,
        request: AdapterRequest,
        mut settings: AnalyzerSettings,
    ) -> Result<Self, EvalError> {
        let adapter = registry.create_adapter(provider, request)?;
        if settings.config.is_empty() {
            settings.config = registry.generation_config(provider);
        }
        Ok(Self::new(adapter, settings))
    }

    pub fn provider(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn model(&self) -> &str {
        self.adapter.model()
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    /// Caller options merged over the adapter defaults.
    pub fn effective_config(&self) -> GenerationConfig {
        self.config.merged_over(&self.adapter.default_config())
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot()
    }

    /// Plain-text generation with the session config.
    pub async fn generate(&self, prompt: &str) -> Result<String, EvalError> {
        Ok(self.generate_detailed(prompt, &self.config).await?.text)
    }

    /// Plain-text generation with an explicit config for this call only.
    pub async fn generate_with(&self, prompt: &str, config: &GenerationConfig) -> Result<String, EvalError> {
        Ok(self.generate_detailed(prompt, config).await?.text)
    }

    /// Structured generation: the reply must parse as JSON, with bounded
    /// corrective re-prompting.
    pub async fn generate_json(&self, prompt: &str) -> Result<Value, EvalError> {
        let provider = self.provider();
        self.repair
            .run(provider.as_str(), prompt, |next| async move {
                self.generate_detailed(&next, &self.config)
                    .await
                    .map(|r| r.text)
            })
            .await
    }

    /// One full pipeline run, returning text and per-call usage.
    pub async fn generate_detailed(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<GenerationResult, EvalError> {
        let provider = self.provider();
        let seq = self.prompt_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let prompt_tokens = self.adapter.count_tokens(prompt).await;
        tracing::info!(%provider, prompt = seq, input_tokens = prompt_tokens, "sending prompt");

        let start = Instant::now();
        let response = self
            .retry
            .run(provider.as_str(), |_attempt| async move {
                self.limiter.acquire().await;
                self.adapter
                    .generate(prompt, self.system_prompt.as_deref(), config)
                    .await
            })
            .await?;
        let elapsed = start.elapsed();

        let result = parsers::normalize(&response, self.adapter.as_ref(), prompt_tokens).await?;
        let cumulative = self.usage.record(result.usage.total());

        tracing::info!(
            %provider,
            prompt = seq,
            elapsed_ms = elapsed.as_millis() as u64,
            input_tokens = result.usage.input,
            output_tokens = result.usage.output,
            total_tokens = result.usage.total(),
            cumulative_tokens = cumulative.total_tokens,
            "response received"
        );

        Ok(result)
    }
}
