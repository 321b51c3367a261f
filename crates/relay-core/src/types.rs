//! Request and outcome types for the routing core

use crate::config::SamplingOverride;
use crate::error::FailureKind;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Kind of reply the assistant is producing.
///
/// Keys the sampling-override table: different message kinds want
/// different creativity/length trade-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Ordinary conversational reply
    #[default]
    Reply,
    /// Conversation-opening greeting
    Greeting,
    /// Proactive follow-up nudge
    FollowUp,
    /// Conversation summary
    Summary,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Reply => "reply",
            Self::Greeting => "greeting",
            Self::FollowUp => "follow_up",
            Self::Summary => "summary",
        };
        write!(f, "{}", name)
    }
}

/// One unit of generation work.
///
/// The prompt arrives fully assembled; this core never inspects or
/// mutates its content.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Finished prompt text, opaque to the router
    pub prompt: String,
    /// Owning tenant
    pub tenant_id: String,
    /// Conversation the reply belongs to
    pub conversation_id: String,
    /// Kind of reply being produced
    pub message_type: MessageType,
    /// Caller-supplied sampling tweaks, applied on top of the per-type table
    pub sampling_overrides: Option<SamplingOverride>,
    /// Cancelled when the inbound request is abandoned upstream
    pub cancellation: CancellationToken,
}

impl GenerationRequest {
    /// Create a request with default message type and no overrides
    pub fn new(
        prompt: impl Into<String>,
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            message_type: MessageType::default(),
            sampling_overrides: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Set the message type
    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    /// Set caller sampling overrides
    pub fn with_sampling_overrides(mut self, overrides: SamplingOverride) -> Self {
        self.sampling_overrides = Some(overrides);
        self
    }

    /// Attach an upstream cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Token accounting for one or more provider calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u64,
    /// Tokens produced in the response
    pub response_tokens: u64,
}

impl TokenUsage {
    /// Total tokens across prompt and response
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.response_tokens
    }

    /// Accumulate another usage record into this one
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.response_tokens += other.response_tokens;
    }
}

/// Terminal state of a generation attempt chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Usable text produced
    Success,
    /// Provider blocked the content
    Blocked,
    /// Output-length limit hit with nothing usable, escalation exhausted
    Truncated,
    /// No binding had capacity left
    Exhausted,
    /// Any other terminal failure
    Error,
}

/// One binding-level attempt and how it ended; feeds the aggregate
/// diagnostic on capacity-exhausted outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Model the attempt ran against
    pub model_name: String,
    /// Why the attempt failed
    pub failure: FailureKind,
    /// Provider-supplied detail, if any
    pub detail: Option<String>,
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {} ({})", self.model_name, self.failure, detail),
            None => write!(f, "{}: {}", self.model_name, self.failure),
        }
    }
}

/// The sole result type of the routing core.
///
/// This core never fabricates a reply: on failure the outcome carries a
/// reason code and the attempt history, and the presentation layer decides
/// what (if anything) the end user sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    /// Terminal status of the chain
    pub status: OutcomeStatus,
    /// Generated text on success
    pub text: Option<String>,
    /// Model that produced the final result, if any call was made
    pub used_model: Option<String>,
    /// API revision the final call used
    pub api_version_used: Option<String>,
    /// Tokens consumed across the whole chain
    pub tokens_consumed: TokenUsage,
    /// Failure reason code on non-success
    pub reason: Option<FailureKind>,
    /// Every binding-level attempt and how it ended
    pub attempts: Vec<AttemptRecord>,
}

impl GenerationOutcome {
    /// Successful outcome
    pub fn success(
        text: impl Into<String>,
        used_model: impl Into<String>,
        api_version: impl Into<String>,
        tokens: TokenUsage,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            status: OutcomeStatus::Success,
            text: Some(text.into()),
            used_model: Some(used_model.into()),
            api_version_used: Some(api_version.into()),
            tokens_consumed: tokens,
            reason: None,
            attempts,
        }
    }

    /// Failed outcome with the status implied by the failure kind
    pub fn failure(kind: FailureKind, tokens: TokenUsage, attempts: Vec<AttemptRecord>) -> Self {
        let status = match kind {
            FailureKind::CapacityExhausted => OutcomeStatus::Exhausted,
            FailureKind::BlockedContent => OutcomeStatus::Blocked,
            FailureKind::TruncatedEmpty => OutcomeStatus::Truncated,
            _ => OutcomeStatus::Error,
        };
        Self {
            status,
            text: None,
            used_model: None,
            api_version_used: None,
            tokens_consumed: tokens,
            reason: Some(kind),
            attempts,
        }
    }

    /// Whether usable text was produced
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Human-readable summary of every attempt, for diagnostics
    pub fn attempts_summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&MessageType::FollowUp).unwrap();
        assert_eq!(json, "\"follow_up\"");
    }

    #[test]
    fn token_usage_totals() {
        let mut usage = TokenUsage {
            prompt_tokens: 100,
            response_tokens: 40,
        };
        assert_eq!(usage.total(), 140);
        usage.add(TokenUsage {
            prompt_tokens: 10,
            response_tokens: 5,
        });
        assert_eq!(usage.total(), 155);
    }

    #[test]
    fn failure_outcome_maps_status_from_kind() {
        let outcome =
            GenerationOutcome::failure(FailureKind::CapacityExhausted, TokenUsage::default(), vec![]);
        assert_eq!(outcome.status, OutcomeStatus::Exhausted);
        assert_eq!(outcome.reason, Some(FailureKind::CapacityExhausted));
        assert!(!outcome.is_success());

        let outcome =
            GenerationOutcome::failure(FailureKind::BlockedContent, TokenUsage::default(), vec![]);
        assert_eq!(outcome.status, OutcomeStatus::Blocked);

        let outcome =
            GenerationOutcome::failure(FailureKind::Overloaded, TokenUsage::default(), vec![]);
        assert_eq!(outcome.status, OutcomeStatus::Error);
    }

    #[test]
    fn attempts_summary_lists_every_model() {
        let outcome = GenerationOutcome::failure(
            FailureKind::CapacityExhausted,
            TokenUsage::default(),
            vec![
                AttemptRecord {
                    model_name: "aria-3-large".to_string(),
                    failure: FailureKind::RateLimited,
                    detail: None,
                },
                AttemptRecord {
                    model_name: "aria-3-mini".to_string(),
                    failure: FailureKind::Overloaded,
                    detail: Some("529".to_string()),
                },
            ],
        );
        let summary = outcome.attempts_summary();
        assert!(summary.contains("aria-3-large: rate_limited"));
        assert!(summary.contains("aria-3-mini: overloaded (529)"));
    }
}
