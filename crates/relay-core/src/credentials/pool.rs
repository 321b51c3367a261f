//! Binding state and the per-tenant credential pool

use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One (credential, model) pair and its live quota state.
///
/// Counters and the exhaustion flag are mutated in place by the quota
/// tracker; tenant configuration creates and removes bindings.
#[derive(Debug, Clone)]
pub struct ModelBinding {
    /// Stable binding identifier
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: String,
    /// Model this credential is bound to
    pub model_name: String,
    /// Selection priority, lower wins
    pub priority: u32,
    /// Requests allowed per counting window
    pub rpm_limit: u32,
    /// Tokens allowed per counting window
    pub tpm_limit: u64,
    /// Requests used in the current window
    pub rpm_used: u32,
    /// Tokens used in the current window
    pub tpm_used: u64,
    /// Start of the current counting window
    pub window_start: Option<Instant>,
    /// Barred from selection until this instant, if set
    pub exhausted_until: Option<Instant>,
}

impl ModelBinding {
    /// Create a binding with fresh counters and generous limits
    pub fn new(tenant_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            model_name: model_name.into(),
            priority: 0,
            rpm_limit: 60,
            tpm_limit: 100_000,
            rpm_used: 0,
            tpm_used: 0,
            window_start: None,
            exhausted_until: None,
        }
    }

    /// Set selection priority (lower wins)
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-window request limit
    pub fn with_rpm_limit(mut self, limit: u32) -> Self {
        self.rpm_limit = limit;
        self
    }

    /// Set the per-window token limit
    pub fn with_tpm_limit(mut self, limit: u64) -> Self {
        self.tpm_limit = limit;
        self
    }

    /// Whether the binding is currently barred from selection
    pub fn is_exhausted(&self, now: Instant) -> bool {
        match self.exhausted_until {
            Some(until) => now < until,
            None => false,
        }
    }

    /// Roll the counting window forward when it has elapsed
    pub(crate) fn roll_window(&mut self, now: Instant, window: Duration) {
        let elapsed = match self.window_start {
            Some(start) => now.saturating_duration_since(start) >= window,
            None => true,
        };
        if elapsed {
            self.window_start = Some(now);
            self.rpm_used = 0;
            self.tpm_used = 0;
        }
    }

    /// Whether the current window's counters sit at either limit
    pub(crate) fn window_saturated(&self) -> bool {
        self.rpm_used >= self.rpm_limit || self.tpm_used >= self.tpm_limit
    }
}

/// Read-only view of one binding's accounting, for observability
#[derive(Debug, Clone)]
pub struct BindingStats {
    /// Binding identifier
    pub id: Uuid,
    /// Model name
    pub model_name: String,
    /// Selection priority
    pub priority: u32,
    /// Requests used in the current window
    pub rpm_used: u32,
    /// Tokens used in the current window
    pub tpm_used: u64,
    /// Whether the binding is currently barred
    pub exhausted: bool,
}

/// Passive store of bindings, partitioned per binding key.
///
/// Lookups and mutations go through `DashMap` shards, so two tasks
/// updating different bindings never contend and updates to one binding
/// serialize. Closures passed to [`with_binding`] run under the shard
/// lock and must not suspend or perform I/O.
///
/// [`with_binding`]: CredentialPool::with_binding
#[derive(Debug, Default)]
pub struct CredentialPool {
    bindings: DashMap<Uuid, ModelBinding>,
    tenants: DashMap<String, Vec<Uuid>>,
}

impl CredentialPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any bindings are loaded for the tenant
    pub fn has_tenant(&self, tenant_id: &str) -> bool {
        self.tenants
            .get(tenant_id)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    /// Install the tenant's binding set, replacing the previous one.
    ///
    /// Live quota state survives the refresh: an incoming binding whose id
    /// is already present keeps the existing counters and exhaustion flag.
    /// Bindings absent from the incoming set are removed.
    pub fn install(&self, tenant_id: &str, incoming: Vec<ModelBinding>) {
        let mut ids = Vec::with_capacity(incoming.len());
        for binding in incoming {
            ids.push(binding.id);
            match self.bindings.get_mut(&binding.id) {
                Some(mut existing) => {
                    // keep counters, refresh configuration
                    existing.model_name = binding.model_name;
                    existing.priority = binding.priority;
                    existing.rpm_limit = binding.rpm_limit;
                    existing.tpm_limit = binding.tpm_limit;
                }
                None => {
                    self.bindings.insert(binding.id, binding);
                }
            }
        }

        let stale: Vec<Uuid> = self
            .tenants
            .get(tenant_id)
            .map(|old| old.iter().filter(|id| !ids.contains(id)).copied().collect())
            .unwrap_or_default();
        for id in stale {
            self.bindings.remove(&id);
        }

        self.tenants.insert(tenant_id.to_string(), ids);
    }

    /// Clone out every binding of a tenant
    pub fn snapshot(&self, tenant_id: &str) -> Vec<ModelBinding> {
        let Some(ids) = self.tenants.get(tenant_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.bindings.get(id).map(|b| b.value().clone()))
            .collect()
    }

    /// Clone out a single binding
    pub fn get(&self, id: Uuid) -> Option<ModelBinding> {
        self.bindings.get(&id).map(|b| b.value().clone())
    }

    /// Run a mutation against one binding under its shard lock.
    ///
    /// The closure must be fast, CPU-bound and free of awaits.
    pub fn with_binding<R>(&self, id: Uuid, f: impl FnOnce(&mut ModelBinding) -> R) -> Option<R> {
        self.bindings.get_mut(&id).map(|mut b| f(&mut b))
    }

    /// Accounting snapshot for every binding of a tenant
    pub fn stats(&self, tenant_id: &str, now: Instant) -> Vec<BindingStats> {
        self.snapshot(tenant_id)
            .into_iter()
            .map(|b| BindingStats {
                id: b.id,
                model_name: b.model_name.clone(),
                priority: b.priority,
                rpm_used: b.rpm_used,
                tpm_used: b.tpm_used,
                exhausted: b.is_exhausted(now),
            })
            .collect()
    }
}
