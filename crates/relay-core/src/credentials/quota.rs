//! Quota accounting
//!
//! The tracker is the only writer of binding counters and exhaustion
//! flags. Counters move only after a confirmed successful call; nothing
//! is charged speculatively. Every update runs under the binding's shard
//! lock, and no lock is ever held across an await.

use super::pool::{CredentialPool, ModelBinding};
use super::store::UsageDelta;
use crate::clock::SharedClock;
use crate::types::TokenUsage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mutator of per-binding quota state
#[derive(Clone)]
pub struct QuotaTracker {
    pool: Arc<CredentialPool>,
    clock: SharedClock,
    window: Duration,
    default_cooldown: Duration,
}

impl QuotaTracker {
    /// Create a tracker over the given pool
    pub fn new(
        pool: Arc<CredentialPool>,
        clock: SharedClock,
        window: Duration,
        default_cooldown: Duration,
    ) -> Self {
        Self {
            pool,
            clock,
            window,
            default_cooldown,
        }
    }

    /// Record a confirmed successful call against a binding.
    ///
    /// Rolls the counting window forward when elapsed, then increments
    /// the request and token counters. A window that reaches either limit
    /// bars the binding until the window rolls, so the selector stops
    /// handing out capacity the provider would reject anyway.
    ///
    /// Returns the delta to forward to the external store, or `None` for
    /// an unknown binding.
    pub fn record_success(&self, binding_id: Uuid, usage: TokenUsage) -> Option<UsageDelta> {
        let now = self.clock.now();
        let window = self.window;
        let tokens = usage.total();

        self.pool.with_binding(binding_id, |binding| {
            binding.roll_window(now, window);
            binding.rpm_used += 1;
            binding.tpm_used += tokens;

            if binding.window_saturated() && !binding.is_exhausted(now) {
                let until = binding
                    .window_start
                    .map(|start| start + window)
                    .unwrap_or(now + window);
                binding.exhausted_until = Some(until);
                debug!(
                    binding = %binding.id,
                    model = %binding.model_name,
                    rpm_used = binding.rpm_used,
                    tpm_used = binding.tpm_used,
                    "window saturated, holding binding until the window rolls"
                );
            }

            UsageDelta {
                requests: 1,
                tokens,
            }
        })
    }

    /// Record a provider-reported rate/quota failure.
    ///
    /// When the failing binding is known precisely, only that binding is
    /// marked. When the provider error named only the model, every
    /// binding sharing that model name for the tenant is marked — a
    /// degraded fallback that may over-penalize sibling credentials, so
    /// it is logged loudly.
    ///
    /// The cooldown comes from the provider's reset hint when present,
    /// else a fixed conservative default. A binding that is already
    /// exhausted is not re-marked. Returns how many bindings were marked.
    pub fn record_rate_limit(
        &self,
        tenant_id: &str,
        model_name: &str,
        reset_hint: Option<Duration>,
        binding_id: Option<Uuid>,
    ) -> usize {
        let now = self.clock.now();
        let until = now + reset_hint.unwrap_or(self.default_cooldown);

        if let Some(id) = binding_id {
            let marked = self
                .pool
                .with_binding(id, |binding| Self::mark_exhausted(binding, now, until))
                .unwrap_or(false);
            if marked {
                debug!(
                    binding = %id,
                    model = model_name,
                    cooldown_secs = (until - now).as_secs(),
                    "binding exhausted by provider rate limit"
                );
            }
            return usize::from(marked);
        }

        warn!(
            tenant = tenant_id,
            model = model_name,
            "rate limit did not identify a credential; degraded broad exhaustion marking for every binding of this model"
        );

        let mut marked = 0;
        for binding in self.pool.snapshot(tenant_id) {
            if binding.model_name != model_name {
                continue;
            }
            let did = self
                .pool
                .with_binding(binding.id, |b| Self::mark_exhausted(b, now, until))
                .unwrap_or(false);
            if did {
                marked += 1;
            }
        }
        marked
    }

    fn mark_exhausted(binding: &mut ModelBinding, now: Instant, until: Instant) -> bool {
        if binding.is_exhausted(now) {
            return false;
        }
        binding.exhausted_until = Some(until);
        true
    }
}

impl std::fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("window", &self.window)
            .field("default_cooldown", &self.default_cooldown)
            .finish()
    }
}
