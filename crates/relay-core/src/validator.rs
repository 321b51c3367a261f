//! Response validation
//!
//! Providers occasionally return syntactically well-formed but
//! informationally empty text under some sampling settings. Classifying
//! that as a failure here keeps garbage from ever reaching an end user.
//! `validate` is pure and deterministic: identical input always yields
//! the identical classification.

use crate::provider::{FinishSignal, ProviderResponse, SafetySignal};
use std::collections::HashSet;

/// Symbols that carry no information on their own; a reply made of
/// nothing else is noise.
const DECORATIVE_CHARS: &[char] = &[
    '*', '#', '-', '_', '~', '`', '>', '|', '=', '+', '.', ',', '!', '?', ':', ';', '(', ')',
    '[', ']', '{', '}', '"', '\'', '•', '…', '·',
];

/// Classification of one provider response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Usable text
    Success {
        /// Trimmed reply text
        text: String,
    },
    /// Provider refused on content policy; not retryable
    Blocked {
        /// Provider-reported reason
        reason: String,
    },
    /// Output budget hit and nothing usable was produced
    TruncatedEmpty,
    /// Degenerate output; not retryable
    Noise {
        /// Which rule fired
        rule: &'static str,
    },
}

/// Classify a provider response.
///
/// Checks run in fixed priority order: content-policy block, then
/// empty-truncation, then the degenerate-text rules, then success. A
/// length-limited response that still carries non-trivial text counts as
/// a (partial) success.
pub fn validate(response: &ProviderResponse) -> Validation {
    if let SafetySignal::Blocked { reason } = &response.safety {
        return Validation::Blocked {
            reason: reason.clone(),
        };
    }

    let trimmed = response.text.trim();

    if response.finish == FinishSignal::MaxTokens && trimmed.is_empty() {
        return Validation::TruncatedEmpty;
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() < 3 {
        return Validation::Noise { rule: "too_short" };
    }

    let meaningful = chars
        .iter()
        .filter(|c| !c.is_whitespace() && !DECORATIVE_CHARS.contains(c))
        .count();
    if meaningful < 2 {
        return Validation::Noise {
            rule: "decorative_only",
        };
    }

    let distinct: HashSet<char> = chars.iter().copied().collect();
    if distinct.len() <= 2 && chars.len() < 10 {
        return Validation::Noise {
            rule: "repeated_chars",
        };
    }

    Validation::Success {
        text: trimmed.to_string(),
    }
}
