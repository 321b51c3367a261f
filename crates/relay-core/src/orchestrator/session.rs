//! Attempt-chain exclusion state
//!
//! Each inbound customer message gets its own exclusion set tracking the
//! models already tried in that chain. The set only grows within one
//! chain, is dropped at the terminal outcome, and is never shared across
//! unrelated turns. A TTL sweep reclaims sets left behind by abandoned
//! chains.

use crate::cache::TtlCache;
use crate::clock::SharedClock;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Models already tried within one attempt chain
#[derive(Debug, Clone)]
pub struct SessionExclusion {
    /// Chain identifier, one per inbound customer message
    pub conversation_turn_id: Uuid,
    /// Owning tenant
    pub tenant_id: String,
    /// Model names barred from re-selection in this chain
    pub excluded_model_names: HashSet<String>,
    /// When the chain started
    pub created_at: Instant,
}

/// Registry of live exclusion sets, TTL-bounded
pub(crate) struct SessionExclusions {
    cache: TtlCache<Uuid, SessionExclusion>,
    clock: SharedClock,
}

impl SessionExclusions {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            cache: TtlCache::with_clock(ttl, SharedClock::clone(&clock)),
            clock,
        }
    }

    /// Start a chain and return its turn id
    pub fn begin(&self, tenant_id: &str) -> Uuid {
        let turn_id = Uuid::new_v4();
        self.cache.insert(
            turn_id,
            SessionExclusion {
                conversation_turn_id: turn_id,
                tenant_id: tenant_id.to_string(),
                excluded_model_names: HashSet::new(),
                created_at: self.clock.now(),
            },
        );
        turn_id
    }

    /// Bar a model from re-selection within the chain
    pub fn exclude(&self, turn_id: Uuid, model_name: &str) {
        self.cache.update(&turn_id, |exclusion| {
            exclusion
                .excluded_model_names
                .insert(model_name.to_string());
        });
    }

    /// Copy of the chain's excluded set; empty if the chain is unknown
    pub fn snapshot(&self, turn_id: Uuid) -> HashSet<String> {
        self.cache
            .get(&turn_id)
            .map(|e| e.excluded_model_names)
            .unwrap_or_default()
    }

    /// End the chain, dropping its state
    pub fn finish(&self, turn_id: Uuid) {
        self.cache.remove(&turn_id);
    }

    /// Reclaim sets from abandoned chains
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
    }

    /// Number of chains currently held
    pub fn len(&self) -> usize {
        self.cache.len()
    }
}
