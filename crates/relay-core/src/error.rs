//! Error types for the Relay routing core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for routing core operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Terminal failure classes surfaced by the routing core.
///
/// These are the reason codes carried by failed [`GenerationOutcome`]s and
/// by failure events. They classify *why* a generation attempt chain ended
/// without usable text, not transport-level errors.
///
/// [`GenerationOutcome`]: crate::types::GenerationOutcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No eligible binding remains for the tenant
    CapacityExhausted,
    /// Provider reported a rate/quota limit
    RateLimited,
    /// Provider reported transient overload
    Overloaded,
    /// Provider blocked the content (never retried)
    BlockedContent,
    /// Output-length limit hit with no usable text
    TruncatedEmpty,
    /// Syntactically valid but informationally empty output (never retried)
    DegenerateOutput,
    /// Unclassified provider-side failure
    UpstreamError,
    /// Provider call timed out
    Timeout,
}

impl FailureKind {
    /// Stable string code, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapacityExhausted => "capacity_exhausted",
            Self::RateLimited => "rate_limited",
            Self::Overloaded => "overloaded",
            Self::BlockedContent => "blocked_content",
            Self::TruncatedEmpty => "truncated_empty",
            Self::DegenerateOutput => "degenerate_output",
            Self::UpstreamError => "upstream_error",
            Self::Timeout => "timeout",
        }
    }

    /// Whether the routing core recovers from this class by switching to
    /// another binding. Content blocks and degenerate output are not
    /// transient and never trigger a switch.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::BlockedContent | Self::DegenerateOutput)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the routing core.
///
/// Normal generation failures (rate limits, content blocks, capacity) are
/// *not* errors — they are reported as typed [`GenerationOutcome`]s. This
/// enum covers the cases where the core itself cannot proceed.
///
/// [`GenerationOutcome`]: crate::types::GenerationOutcome
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    /// Configuration is invalid or inconsistent
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<String>,
    },

    /// Credential store failure
    #[error("Credential store error: {message}")]
    Store {
        message: String,
        tenant_id: Option<String>,
        context: Option<String>,
    },

    /// Provider transport failure that the core could not classify
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        model: Option<String>,
        context: Option<String>,
    },

    /// The caller abandoned the request
    #[error("Generation was cancelled")]
    Cancelled,
}

impl RelayError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    /// Create a configuration error with context
    pub fn config_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    /// Create a new credential store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            tenant_id: None,
            context: None,
        }
    }

    /// Create a credential store error scoped to a tenant
    pub fn store_for_tenant(message: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            tenant_id: Some(tenant_id.into()),
            context: None,
        }
    }

    /// Create a new provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            model: None,
            context: None,
        }
    }

    /// Create a provider error with the model that produced it
    pub fn provider_with_model(message: impl Into<String>, model: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            model: Some(model.into()),
            context: None,
        }
    }
}
