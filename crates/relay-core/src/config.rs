//! Routing configuration
//!
//! All tunables of the routing core live here: fallback and escalation
//! bounds, backoff schedule, cooldowns, and the sampling-parameter table.
//! Defaults match production behavior; `validate()` rejects inconsistent
//! combinations early.

use crate::error::{RelayError, RelayResult};
use crate::types::MessageType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Sampling parameters sent with one provider call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature (0.0 to 1.0)
    pub temperature: f32,
    /// Top-k sampling, where the model supports it
    pub top_k: Option<u32>,
    /// Nucleus sampling threshold
    pub top_p: f32,
    /// Output token budget
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: None,
            top_p: 0.95,
            max_output_tokens: 2048,
        }
    }
}

impl SamplingParams {
    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set top-k
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set top-p
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Set the output token budget
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = max;
        self
    }

    /// Apply a partial override on top of these parameters
    pub fn apply(&self, overrides: &SamplingOverride) -> Self {
        Self {
            temperature: overrides.temperature.unwrap_or(self.temperature),
            top_k: overrides.top_k.or(self.top_k),
            top_p: overrides.top_p.unwrap_or(self.top_p),
            max_output_tokens: overrides
                .max_output_tokens
                .unwrap_or(self.max_output_tokens),
        }
    }
}

/// Partial sampling adjustment; unset fields keep the base value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOverride {
    /// Replacement temperature
    pub temperature: Option<f32>,
    /// Replacement top-k
    pub top_k: Option<u32>,
    /// Replacement top-p
    pub top_p: Option<f32>,
    /// Replacement output budget
    pub max_output_tokens: Option<u32>,
}

impl SamplingOverride {
    /// Override only the temperature
    pub fn temperature(value: f32) -> Self {
        Self {
            temperature: Some(value),
            ..Self::default()
        }
    }

    /// Override only the output budget
    pub fn max_output_tokens(value: u32) -> Self {
        Self {
            max_output_tokens: Some(value),
            ..Self::default()
        }
    }
}

/// Tenant sampling defaults plus the per-message-type override table.
///
/// Per-type adjustments are data, not branching: resolution is a single
/// table lookup layered between the defaults and any caller override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Base parameters for every message type
    pub defaults: SamplingParams,
    /// Per-message-type adjustments
    pub overrides: HashMap<MessageType, SamplingOverride>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        let mut overrides = HashMap::new();
        overrides.insert(
            MessageType::Greeting,
            SamplingOverride {
                temperature: Some(0.9),
                max_output_tokens: Some(512),
                ..SamplingOverride::default()
            },
        );
        overrides.insert(
            MessageType::FollowUp,
            SamplingOverride {
                temperature: Some(0.6),
                max_output_tokens: Some(1024),
                ..SamplingOverride::default()
            },
        );
        overrides.insert(
            MessageType::Summary,
            SamplingOverride {
                temperature: Some(0.3),
                ..SamplingOverride::default()
            },
        );
        Self {
            defaults: SamplingParams::default(),
            overrides,
        }
    }
}

impl SamplingConfig {
    /// Resolve the effective parameters for a message type
    pub fn params_for(&self, message_type: MessageType) -> SamplingParams {
        match self.overrides.get(&message_type) {
            Some(overrides) => self.defaults.apply(overrides),
            None => self.defaults,
        }
    }
}

/// Top-level configuration of the routing core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Maximum bindings tried in one attempt chain
    #[serde(default = "RoutingConfig::default_max_fallback_attempts")]
    pub max_fallback_attempts: u32,

    /// Maximum budget escalations on one binding after empty-truncated output
    #[serde(default = "RoutingConfig::default_max_budget_retries")]
    pub max_budget_retries: u32,

    /// Output-budget multipliers per escalation, applied to the base budget
    #[serde(default = "RoutingConfig::default_budget_escalation_factors")]
    pub budget_escalation_factors: Vec<u32>,

    /// Temperature reduction per escalation (floor 0.1)
    #[serde(default = "RoutingConfig::default_escalation_temperature_step")]
    pub escalation_temperature_step: f32,

    /// Extra attempts allowed locally when the provider reports overload
    #[serde(default = "RoutingConfig::default_overload_retry_attempts")]
    pub overload_retry_attempts: u32,

    /// Backoff before each local overload retry, in seconds
    #[serde(default = "RoutingConfig::default_overload_backoff_secs")]
    pub overload_backoff_secs: Vec<u64>,

    /// Cooldown applied when a rate-limit error carries no reset hint
    #[serde(default = "RoutingConfig::default_cooldown_secs")]
    pub default_cooldown_secs: u64,

    /// Length of the quota counting window
    #[serde(default = "RoutingConfig::default_quota_window_secs")]
    pub quota_window_secs: u64,

    /// Idle TTL for attempt-chain exclusion state
    #[serde(default = "RoutingConfig::default_exclusion_ttl_secs")]
    pub exclusion_ttl_secs: u64,

    /// Sampling defaults and per-message-type table
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl RoutingConfig {
    const fn default_max_fallback_attempts() -> u32 {
        5
    }

    const fn default_max_budget_retries() -> u32 {
        2
    }

    fn default_budget_escalation_factors() -> Vec<u32> {
        vec![2, 3]
    }

    const fn default_escalation_temperature_step() -> f32 {
        0.2
    }

    const fn default_overload_retry_attempts() -> u32 {
        2
    }

    fn default_overload_backoff_secs() -> Vec<u64> {
        vec![1, 2]
    }

    const fn default_cooldown_secs() -> u64 {
        60
    }

    const fn default_quota_window_secs() -> u64 {
        60
    }

    const fn default_exclusion_ttl_secs() -> u64 {
        300
    }

    /// Cooldown as a Duration
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_secs)
    }

    /// Quota window as a Duration
    pub fn quota_window(&self) -> Duration {
        Duration::from_secs(self.quota_window_secs)
    }

    /// Exclusion TTL as a Duration
    pub fn exclusion_ttl(&self) -> Duration {
        Duration::from_secs(self.exclusion_ttl_secs)
    }

    /// Backoff schedule as Durations
    pub fn overload_backoff(&self) -> Vec<Duration> {
        self.overload_backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    /// Validate the configuration.
    ///
    /// Rejects zero bounds, a missing escalation factor per retry, and a
    /// backoff schedule shorter than the overload retry budget.
    pub fn validate(&self) -> RelayResult<()> {
        if self.max_fallback_attempts == 0 {
            return Err(RelayError::config(
                "max_fallback_attempts must be at least 1",
            ));
        }
        if self.budget_escalation_factors.len() < self.max_budget_retries as usize {
            return Err(RelayError::config(format!(
                "budget_escalation_factors needs {} entries, has {}",
                self.max_budget_retries,
                self.budget_escalation_factors.len()
            )));
        }
        let mut last = 1;
        for factor in &self.budget_escalation_factors {
            if *factor <= last {
                return Err(RelayError::config(
                    "budget_escalation_factors must be strictly increasing and above 1",
                ));
            }
            last = *factor;
        }
        if (self.overload_backoff_secs.len() as u32) < self.overload_retry_attempts {
            return Err(RelayError::config(format!(
                "overload_backoff_secs needs {} entries, has {}",
                self.overload_retry_attempts,
                self.overload_backoff_secs.len()
            )));
        }
        if self.default_cooldown_secs == 0 || self.quota_window_secs == 0 {
            return Err(RelayError::config(
                "cooldown and quota window must be non-zero",
            ));
        }
        Ok(())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_fallback_attempts: Self::default_max_fallback_attempts(),
            max_budget_retries: Self::default_max_budget_retries(),
            budget_escalation_factors: Self::default_budget_escalation_factors(),
            escalation_temperature_step: Self::default_escalation_temperature_step(),
            overload_retry_attempts: Self::default_overload_retry_attempts(),
            overload_backoff_secs: Self::default_overload_backoff_secs(),
            default_cooldown_secs: Self::default_cooldown_secs(),
            quota_window_secs: Self::default_quota_window_secs(),
            exclusion_ttl_secs: Self::default_exclusion_ttl_secs(),
            sampling: SamplingConfig::default(),
        }
    }
}
