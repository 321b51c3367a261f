//! HTTP generation provider
//!
//! Talks to the generation gateway over JSON. One invocation is one
//! call: classification happens here, policy (retries, fallback,
//! revision advance) stays in the routing core.

use super::sanitize::sanitize_error_text;
use super::{FinishSignal, Provider, ProviderError, ProviderResponse, SafetySignal};
use crate::config::SamplingParams;
use crate::error::{RelayError, RelayResult};
use crate::types::TokenUsage;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the HTTP provider
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Gateway base URL
    pub base_url: String,
    /// Credential secret sent as `x-api-key`
    pub api_key: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// End-to-end request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gateway.relay.chat".to_string(),
            api_key: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

impl HttpProviderConfig {
    /// Set the gateway base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the credential secret
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the end-to-end request timeout
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    response_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireSafety {
    blocked: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    text: String,
    finish_reason: String,
    #[serde(default)]
    safety: Option<WireSafety>,
    usage: WireUsage,
}

impl WireResponse {
    fn into_response(self) -> ProviderResponse {
        let finish = match self.finish_reason.as_str() {
            "stop" => FinishSignal::Stop,
            "max_tokens" | "length" => FinishSignal::MaxTokens,
            other => FinishSignal::Other(other.to_string()),
        };
        let safety = match self.safety {
            Some(WireSafety { blocked: true, reason }) => SafetySignal::Blocked {
                reason: reason.unwrap_or_else(|| "content policy".to_string()),
            },
            _ => SafetySignal::Clear,
        };
        ProviderResponse {
            text: self.text,
            finish,
            safety,
            usage: TokenUsage {
                prompt_tokens: self.usage.prompt_tokens,
                response_tokens: self.usage.response_tokens,
            },
        }
    }
}

/// Classify a non-success gateway status into a [`ProviderError`]
fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
    revision: &str,
    request_timeout: Duration,
) -> ProviderError {
    let message = sanitize_error_text(body);
    match status.as_u16() {
        429 => ProviderError::RateLimited {
            message,
            retry_after,
        },
        503 | 529 => ProviderError::Overloaded { message },
        408 | 504 => ProviderError::Timeout {
            timeout: request_timeout,
        },
        400 if body.contains("unsupported_api_version") => ProviderError::VersionMismatch {
            revision: revision.to_string(),
        },
        _ => ProviderError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Generation provider over the gateway's JSON API
pub struct HttpProvider {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpProvider {
    /// Build a provider and its HTTP client
    pub fn new(config: HttpProviderConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RelayError::provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn generate(
        &self,
        model: &str,
        api_version: &str,
        sampling: &SamplingParams,
        prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/generate", self.config.base_url);

        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "temperature": sampling.temperature,
            "top_p": sampling.top_p,
            "max_output_tokens": sampling.max_output_tokens,
        });
        if let Some(top_k) = sampling.top_k {
            body["top_k"] = json!(top_k);
        }

        let mut request = self
            .client
            .post(&url)
            .header("x-api-version", api_version)
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("x-api-key", api_key);
        }

        debug!(model, api_version, "sending generation request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    timeout: self.request_timeout(),
                }
            } else {
                ProviderError::Upstream {
                    status: 0,
                    message: format!("transport error: {e}"),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                &text,
                retry_after,
                api_version,
                self.request_timeout(),
            ));
        }

        let wire: WireResponse = response.json().await.map_err(|e| ProviderError::Upstream {
            status: status.as_u16(),
            message: format!("malformed response body: {e}"),
        })?;

        Ok(wire.into_response())
    }
}
