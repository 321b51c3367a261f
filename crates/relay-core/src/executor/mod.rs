//! Generation execution
//!
//! One executor call is one attempt against one binding: it resolves
//! sampling parameters, walks the API revision ladder, and retries only
//! transient overload locally. Rate limits are never retried here —
//! that quota is already known to be gone, and burning more calls on it
//! helps nobody. Everything else bubbles to the orchestrator for
//! binding-level fallback.

mod revisions;

pub use revisions::{API_REVISIONS, ModelGeneration, model_generation, revision_ladder};

use crate::config::{RoutingConfig, SamplingConfig, SamplingParams};
use crate::provider::{Provider, ProviderError, ProviderResponse};
use crate::selector::SelectedBinding;
use crate::types::GenerationRequest;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Successful executor attempt
#[derive(Debug, Clone)]
pub struct Execution {
    /// Raw provider response, not yet validated
    pub response: ProviderResponse,
    /// Revision the call succeeded on
    pub api_version: String,
    /// Total provider calls this attempt made
    pub calls: u32,
    /// Calls beyond the first, spent on overload retries
    pub extra_calls: u32,
}

/// Failed executor attempt
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// Provider failure that local policy could not absorb
    #[error(transparent)]
    Provider(ProviderError),

    /// Every revision in the ladder was rejected
    #[error("model {model} accepted none of the API revisions {tried:?}")]
    NoSupportedRevision { model: String, tried: Vec<String> },

    /// The request was abandoned upstream
    #[error("execution cancelled")]
    Cancelled,
}

/// Executes one generation attempt against one binding
pub struct GenerationExecutor {
    provider: Arc<dyn Provider>,
    sampling: SamplingConfig,
    overload_retry_attempts: u32,
    overload_backoff: Vec<Duration>,
}

impl GenerationExecutor {
    /// Create an executor over the given provider
    pub fn new(provider: Arc<dyn Provider>, config: &RoutingConfig) -> Self {
        Self {
            provider,
            sampling: config.sampling.clone(),
            overload_retry_attempts: config.overload_retry_attempts,
            overload_backoff: config.overload_backoff(),
        }
    }

    /// Resolve effective sampling parameters for a request.
    ///
    /// Tenant defaults, then the per-message-type table entry, then any
    /// caller override — each layer only touching the fields it sets.
    pub fn build_sampling(&self, request: &GenerationRequest) -> SamplingParams {
        let base = self.sampling.params_for(request.message_type);
        match &request.sampling_overrides {
            Some(overrides) => base.apply(overrides),
            None => base,
        }
    }

    /// Run one attempt against `binding` with the given sampling.
    ///
    /// Walks the revision ladder for the binding's model: a rejected
    /// revision advances to the next entry, overload is retried in place
    /// under the bounded backoff schedule, and every other failure
    /// returns to the caller unchanged.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        binding: &SelectedBinding,
        sampling: &SamplingParams,
    ) -> Result<Execution, ExecutionError> {
        let ladder = revision_ladder(&binding.model_name);
        let mut calls = 0u32;
        let mut extra_calls = 0u32;

        'revisions: for revision in &ladder {
            let mut overload_attempt = 0u32;
            loop {
                if request.cancellation.is_cancelled() {
                    return Err(ExecutionError::Cancelled);
                }

                calls += 1;
                let result = self
                    .provider
                    .generate(&binding.model_name, revision, sampling, &request.prompt)
                    .await;

                match result {
                    Ok(response) => {
                        return Ok(Execution {
                            response,
                            api_version: revision.to_string(),
                            calls,
                            extra_calls,
                        });
                    }
                    Err(ProviderError::VersionMismatch { .. }) => {
                        debug!(
                            model = %binding.model_name,
                            revision,
                            "revision rejected, advancing the ladder"
                        );
                        continue 'revisions;
                    }
                    Err(ProviderError::Overloaded { message })
                        if overload_attempt < self.overload_retry_attempts =>
                    {
                        let backoff = self
                            .overload_backoff
                            .get(overload_attempt as usize)
                            .copied()
                            .unwrap_or(Duration::from_secs(1));
                        warn!(
                            model = %binding.model_name,
                            attempt = overload_attempt + 1,
                            max_attempts = self.overload_retry_attempts,
                            backoff_secs = backoff.as_secs(),
                            error = %message,
                            "provider overloaded, retrying locally"
                        );
                        overload_attempt += 1;
                        extra_calls += 1;
                        sleep(backoff).await;
                        continue;
                    }
                    Err(error) => return Err(ExecutionError::Provider(error)),
                }
            }
        }

        Err(ExecutionError::NoSupportedRevision {
            model: binding.model_name.clone(),
            tried: ladder.iter().map(|r| r.to_string()).collect(),
        })
    }
}

impl std::fmt::Debug for GenerationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationExecutor")
            .field("overload_retry_attempts", &self.overload_retry_attempts)
            .field("overload_backoff", &self.overload_backoff)
            .finish()
    }
}
