//! External credential store seam

use super::pool::ModelBinding;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Usage accumulated by one confirmed successful call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    /// Requests to add
    pub requests: u32,
    /// Tokens to add
    pub tokens: u64,
}

/// Source of truth for tenant credential configuration.
///
/// Implemented outside this core (database, config service). The pool is
/// loaded from `get_bindings`; confirmed usage flows back through
/// `update_usage`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the tenant's configured bindings with fresh counters
    async fn get_bindings(&self, tenant_id: &str) -> RelayResult<Vec<ModelBinding>>;

    /// Record confirmed usage against a binding
    async fn update_usage(&self, binding_id: Uuid, delta: UsageDelta) -> RelayResult<()>;
}

/// Map-backed store for tests and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    bindings: DashMap<String, Vec<ModelBinding>>,
    usage: DashMap<Uuid, UsageDelta>,
}

impl InMemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a tenant's binding set
    pub fn put_bindings(&self, tenant_id: impl Into<String>, bindings: Vec<ModelBinding>) {
        self.bindings.insert(tenant_id.into(), bindings);
    }

    /// Total usage recorded against a binding
    pub fn recorded_usage(&self, binding_id: Uuid) -> UsageDelta {
        self.usage
            .get(&binding_id)
            .map(|d| *d)
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_bindings(&self, tenant_id: &str) -> RelayResult<Vec<ModelBinding>> {
        self.bindings
            .get(tenant_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| {
                RelayError::store_for_tenant("no bindings configured", tenant_id)
            })
    }

    async fn update_usage(&self, binding_id: Uuid, delta: UsageDelta) -> RelayResult<()> {
        let mut entry = self.usage.entry(binding_id).or_default();
        entry.requests += delta.requests;
        entry.tokens += delta.tokens;
        Ok(())
    }
}
