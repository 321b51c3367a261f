//! Binding selection
//!
//! Pure choice of the next (credential, model) pair for a tenant.
//! Returning `None` is not an error: it is the signal that the tenant's
//! capacity is exhausted for this attempt chain.

use crate::clock::SharedClock;
use crate::credentials::CredentialPool;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Lightweight handle to a chosen binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedBinding {
    /// Binding identifier
    pub id: Uuid,
    /// Model to call
    pub model_name: String,
    /// Priority it was chosen at
    pub priority: u32,
}

/// Chooses the best eligible binding for a tenant
#[derive(Clone)]
pub struct ModelSelector {
    pool: Arc<CredentialPool>,
    clock: SharedClock,
}

impl ModelSelector {
    /// Create a selector over the given pool
    pub fn new(pool: Arc<CredentialPool>, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Pick the best eligible binding.
    ///
    /// A binding is eligible when it is not exhausted and its model name
    /// is not in the attempt chain's excluded set. Candidates are ordered
    /// by priority (lower wins); ties fall to configuration order.
    pub fn select(&self, tenant_id: &str, excluded: &HashSet<String>) -> Option<SelectedBinding> {
        let now = self.clock.now();
        let mut candidates: Vec<_> = self
            .pool
            .snapshot(tenant_id)
            .into_iter()
            .filter(|b| !b.is_exhausted(now) && !excluded.contains(&b.model_name))
            .collect();
        candidates.sort_by_key(|b| b.priority);

        match candidates.into_iter().next() {
            Some(binding) => {
                debug!(
                    tenant = tenant_id,
                    model = %binding.model_name,
                    binding = %binding.id,
                    "selected binding"
                );
                Some(SelectedBinding {
                    id: binding.id,
                    model_name: binding.model_name,
                    priority: binding.priority,
                })
            }
            None => {
                debug!(tenant = tenant_id, "no eligible binding");
                None
            }
        }
    }
}

impl std::fmt::Debug for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSelector").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::credentials::ModelBinding;
    use std::time::Duration;

    fn selector_fixture() -> (ModelSelector, Arc<CredentialPool>, ManualClock) {
        let pool = Arc::new(CredentialPool::new());
        let clock = ManualClock::new();
        let selector = ModelSelector::new(Arc::clone(&pool), Arc::new(clock.clone()));
        (selector, pool, clock)
    }

    #[test]
    fn picks_lowest_priority_first() {
        let (selector, pool, _clock) = selector_fixture();
        pool.install(
            "acme",
            vec![
                ModelBinding::new("acme", "aria-3-mini").with_priority(2),
                ModelBinding::new("acme", "aria-3-large").with_priority(0),
                ModelBinding::new("acme", "aria-2-standard").with_priority(1),
            ],
        );

        let chosen = selector.select("acme", &HashSet::new()).unwrap();
        assert_eq!(chosen.model_name, "aria-3-large");
    }

    #[test]
    fn skips_excluded_models() {
        let (selector, pool, _clock) = selector_fixture();
        pool.install(
            "acme",
            vec![
                ModelBinding::new("acme", "aria-3-large").with_priority(0),
                ModelBinding::new("acme", "aria-3-mini").with_priority(1),
            ],
        );

        let excluded: HashSet<String> = ["aria-3-large".to_string()].into_iter().collect();
        let chosen = selector.select("acme", &excluded).unwrap();
        assert_eq!(chosen.model_name, "aria-3-mini");
    }

    #[test]
    fn skips_exhausted_bindings_until_cooldown_elapses() {
        let (selector, pool, clock) = selector_fixture();
        let primary = ModelBinding::new("acme", "aria-3-large").with_priority(0);
        let backup = ModelBinding::new("acme", "aria-3-mini").with_priority(1);
        let primary_id = primary.id;
        pool.install("acme", vec![primary, backup]);

        pool.with_binding(primary_id, |b| {
            b.exhausted_until = Some(clock.now() + Duration::from_secs(60));
        });

        let chosen = selector.select("acme", &HashSet::new()).unwrap();
        assert_eq!(chosen.model_name, "aria-3-mini");

        clock.advance(Duration::from_secs(61));
        let chosen = selector.select("acme", &HashSet::new()).unwrap();
        assert_eq!(chosen.model_name, "aria-3-large");
    }

    #[test]
    fn none_when_everything_is_ineligible() {
        let (selector, pool, clock) = selector_fixture();
        let binding = ModelBinding::new("acme", "aria-3-large");
        let id = binding.id;
        pool.install("acme", vec![binding]);
        pool.with_binding(id, |b| {
            b.exhausted_until = Some(clock.now() + Duration::from_secs(60));
        });

        assert!(selector.select("acme", &HashSet::new()).is_none());
        assert!(selector.select("unknown-tenant", &HashSet::new()).is_none());
    }

    #[test]
    fn ties_fall_to_configuration_order() {
        let (selector, pool, _clock) = selector_fixture();
        pool.install(
            "acme",
            vec![
                ModelBinding::new("acme", "aria-3-large").with_priority(1),
                ModelBinding::new("acme", "aria-3-mini").with_priority(1),
            ],
        );

        let chosen = selector.select("acme", &HashSet::new()).unwrap();
        assert_eq!(chosen.model_name, "aria-3-large");
    }
}
