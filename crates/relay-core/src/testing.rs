//! Shared test fixtures

use crate::config::SamplingParams;
use crate::provider::{
    FinishSignal, Provider, ProviderError, ProviderResponse, SafetySignal,
};
use crate::types::TokenUsage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Install a test log subscriber once; later calls are no-ops
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One recorded provider invocation
#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    pub model: String,
    pub api_version: String,
    pub sampling: SamplingParams,
}

/// Provider that replays a fixed script of results, recording each call.
///
/// The script is consumed front to back; running past its end returns a
/// distinctive upstream error so a miscounted test fails loudly.
pub(crate) struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the call log, usable after the provider moves into an Arc
    pub fn call_log(&self) -> Arc<Mutex<Vec<CallRecord>>> {
        Arc::clone(&self.calls)
    }

    pub fn ok(text: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: text.to_string(),
            finish: FinishSignal::Stop,
            safety: SafetySignal::Clear,
            usage: TokenUsage {
                prompt_tokens: 40,
                response_tokens: 12,
            },
        })
    }

    pub fn truncated(text: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: text.to_string(),
            finish: FinishSignal::MaxTokens,
            safety: SafetySignal::Clear,
            usage: TokenUsage {
                prompt_tokens: 40,
                response_tokens: text.len() as u64,
            },
        })
    }

    pub fn blocked(reason: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: String::new(),
            finish: FinishSignal::Stop,
            safety: SafetySignal::Blocked {
                reason: reason.to_string(),
            },
            usage: TokenUsage::default(),
        })
    }

    pub fn rate_limited(reset_secs: u64) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::RateLimited {
            message: "quota exceeded".to_string(),
            retry_after: Some(Duration::from_secs(reset_secs)),
        })
    }

    pub fn overloaded() -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Overloaded {
            message: "temporarily overloaded".to_string(),
        })
    }

    pub fn version_mismatch(revision: &str) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::VersionMismatch {
            revision: revision.to_string(),
        })
    }

    pub fn upstream(status: u16) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Upstream {
            status,
            message: "internal error".to_string(),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn generate(
        &self,
        model: &str,
        api_version: &str,
        sampling: &SamplingParams,
        _prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().push(CallRecord {
            model: model.to_string(),
            api_version: api_version.to_string(),
            sampling: *sampling,
        });
        self.script.lock().pop_front().unwrap_or_else(|| {
            Err(ProviderError::Upstream {
                status: 599,
                message: "scripted provider ran out of responses".to_string(),
            })
        })
    }
}
