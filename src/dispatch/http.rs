use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;

use crate::dispatch::ProviderKind;
use crate::error::{EvalError, preview};

pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Per-request ceiling for a single generation call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Characters of an error body kept in the surfaced message.
const ERROR_BODY_PREVIEW: usize = 500;

/// Shared JSON-over-HTTP transport for all adapters.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Result<Self, EvalError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, EvalError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self { client, timeout })
    }

    /// POST a JSON body and return the parsed JSON response.
    ///
    /// Exactly one request is made. Timeouts surface as `Timeout`, non-2xx
    /// statuses as `Request` with the status code leading the message so the
    /// retry classifier can see it.
    pub async fn post_json(
        &self,
        provider: ProviderKind,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, EvalError> {
        let start = Instant::now();

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(provider, e, start))?;

        let status = response.status();

        // Cap error body reads to MAX_RESPONSE_BYTES to prevent memory exhaustion
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            tracing::debug!(%provider, %status, "upstream returned error status");
            return Err(EvalError::Request {
                provider: provider.to_string(),
                message: format!("{status}: {}", preview(text.trim(), ERROR_BODY_PREVIEW)),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(provider, e, start))?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(EvalError::Request {
                provider: provider.to_string(),
                message: format!(
                    "response too large: {} bytes (max {})",
                    bytes.len(),
                    MAX_RESPONSE_BYTES
                ),
                status: None,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| EvalError::UnsupportedResponse {
            provider: provider.to_string(),
            detail: format!("body is not JSON: {e}"),
        })
    }
}

fn transport_error(provider: ProviderKind, err: reqwest::Error, start: Instant) -> EvalError {
    // The URL would otherwise end up in the message and in retry matching.
    let err = err.without_url();
    if err.is_timeout() {
        EvalError::Timeout {
            provider: provider.to_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    } else {
        EvalError::Request {
            provider: provider.to_string(),
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
