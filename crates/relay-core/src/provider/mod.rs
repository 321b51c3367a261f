//! Provider seam
//!
//! The routing core talks to the generation provider through one narrow
//! trait. Errors arrive pre-classified so the executor and orchestrator
//! can decide between local retry, revision advance and binding switch
//! without string-matching at every call site.

mod http;
mod sanitize;

pub use http::{HttpProvider, HttpProviderConfig};
pub use sanitize::sanitize_error_text;

use crate::config::SamplingParams;
use crate::types::TokenUsage;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// How the provider finished producing output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishSignal {
    /// Natural stop
    Stop,
    /// Output-length budget reached
    MaxTokens,
    /// Anything else the provider reported
    Other(String),
}

/// Provider content-safety verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetySignal {
    /// No objection
    Clear,
    /// Content policy block; the reason is surfaced, never retried
    Blocked {
        /// Provider-reported reason
        reason: String,
    },
}

/// Raw result of one provider call
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Generated text, possibly empty
    pub text: String,
    /// Stop condition
    pub finish: FinishSignal,
    /// Safety verdict
    pub safety: SafetySignal,
    /// Token accounting for this call
    pub usage: TokenUsage,
}

/// Classified provider call failure
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Rate or quota limit; carries the provider's reset hint when present
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Transient overload; eligible for bounded local retry
    #[error("provider overloaded: {message}")]
    Overloaded { message: String },

    /// The provider rejected the requested API revision
    #[error("unsupported API revision {revision}")]
    VersionMismatch { revision: String },

    /// The call exceeded its deadline
    #[error("provider call timed out after {}s", timeout.as_secs())]
    Timeout { timeout: Duration },

    /// Any other provider-side failure
    #[error("upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },
}

/// Generation provider seam.
///
/// Implementations perform exactly one call per invocation; all retry,
/// fallback and revision policy lives in the routing core.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Execute one generation call
    async fn generate(
        &self,
        model: &str,
        api_version: &str,
        sampling: &SamplingParams,
        prompt: &str,
    ) -> Result<ProviderResponse, ProviderError>;
}
