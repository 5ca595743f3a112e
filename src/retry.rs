//! Exponential backoff around a single generation attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::EvalError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MULTIPLIER: Duration = Duration::from_secs(2);
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(4);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Retries transient failures (see [`EvalError::is_retryable`]) with a
/// deterministic exponential schedule. Fatal errors are returned unchanged
/// on the attempt that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            multiplier: DEFAULT_MULTIPLIER,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based):
    /// `clamp(multiplier * 2^(attempt-1), min_delay, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self.multiplier.saturating_mul(1u32 << exp);
        raw.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// Exhaustion yields `RetryExhausted` carrying the last error.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T, EvalError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, EvalError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut waited = Duration::ZERO;
        let mut attempt = 1;

        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::warn!(provider, attempt, "non-retryable error: {err}");
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::error!(
                    provider,
                    attempts = attempt,
                    waited_ms = waited.as_millis() as u64,
                    "retries exhausted: {err}"
                );
                return Err(EvalError::RetryExhausted {
                    provider: provider.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            tracing::warn!(
                provider,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "transient error, backing off: {err}"
            );
            tokio::time::sleep(delay).await;
            waited += delay;
            attempt += 1;
        }
    }
}
