//! Fallback orchestration
//!
//! The top-level state machine of the routing core. One call to
//! [`FallbackOrchestrator::generate`] runs a single bounded loop:
//!
//! ```text
//! Select -> Execute -> Validate -> { Done | EscalateBudget | SwitchModel | Fail }
//! ```
//!
//! Empty-truncated output escalates the output budget on the same
//! binding; rate limits and overload switch to the next binding; content
//! blocks and degenerate output fail immediately. The loop tries at most
//! `max_fallback_attempts` bindings with at most `max_budget_retries`
//! escalations each, so the chain always terminates.

mod session;

pub use session::SessionExclusion;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{RoutingConfig, SamplingParams};
use crate::credentials::{BindingStats, CredentialPool, CredentialStore, QuotaTracker};
use crate::error::{FailureKind, RelayError, RelayResult};
use crate::events::{EventBus, RoutingEvent};
use crate::executor::{ExecutionError, GenerationExecutor};
use crate::provider::{Provider, ProviderError};
use crate::selector::{ModelSelector, SelectedBinding};
use crate::types::{AttemptRecord, GenerationOutcome, GenerationRequest, TokenUsage};
use crate::validator::{Validation, validate};
use chrono::Utc;
use session::SessionExclusions;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How one binding-level attempt ended, before the switch decision
enum BindingVerdict {
    Done(GenerationOutcome),
    Failed {
        kind: FailureKind,
        detail: Option<String>,
    },
    Cancelled,
}

/// Top-level generation routing state machine
pub struct FallbackOrchestrator {
    config: RoutingConfig,
    pool: Arc<CredentialPool>,
    store: Arc<dyn CredentialStore>,
    selector: ModelSelector,
    quota: QuotaTracker,
    executor: GenerationExecutor,
    events: EventBus,
    exclusions: SessionExclusions,
    clock: SharedClock,
}

impl FallbackOrchestrator {
    /// Create an orchestrator on the system clock
    pub fn new(
        config: RoutingConfig,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn Provider>,
    ) -> RelayResult<Self> {
        Self::with_clock(config, store, provider, Arc::new(SystemClock))
    }

    /// Create an orchestrator reading time from `clock`
    pub fn with_clock(
        config: RoutingConfig,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn Provider>,
        clock: SharedClock,
    ) -> RelayResult<Self> {
        config.validate()?;
        let pool = Arc::new(CredentialPool::new());
        let selector = ModelSelector::new(Arc::clone(&pool), SharedClock::clone(&clock));
        let quota = QuotaTracker::new(
            Arc::clone(&pool),
            SharedClock::clone(&clock),
            config.quota_window(),
            config.default_cooldown(),
        );
        let executor = GenerationExecutor::new(provider, &config);
        let exclusions = SessionExclusions::new(config.exclusion_ttl(), SharedClock::clone(&clock));

        Ok(Self {
            config,
            pool,
            store,
            selector,
            quota,
            executor,
            events: EventBus::default(),
            exclusions,
            clock,
        })
    }

    /// Event bus carrying structured routing events
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Accounting snapshot for a tenant's bindings
    pub fn stats(&self, tenant_id: &str) -> Vec<BindingStats> {
        self.pool.stats(tenant_id, self.clock.now())
    }

    /// Reclaim exclusion state from abandoned chains.
    ///
    /// Normally chains clean up after themselves; this exists for a
    /// periodic maintenance task to catch the ones that never returned.
    pub fn sweep_sessions(&self) -> usize {
        self.exclusions.sweep()
    }

    /// Force a reload of a tenant's bindings from the store
    pub async fn refresh_tenant(&self, tenant_id: &str) -> RelayResult<()> {
        let bindings = self.store.get_bindings(tenant_id).await?;
        self.pool.install(tenant_id, bindings);
        Ok(())
    }

    /// Produce a reply for one inbound customer message.
    ///
    /// Always returns a terminal [`GenerationOutcome`]; an `Err` is
    /// reserved for upstream cancellation and credential-store failures.
    /// This core never fabricates a reply — a failed outcome carries a
    /// reason code and the attempt history, and presentation is the
    /// caller's concern.
    #[instrument(
        skip(self, request),
        fields(tenant = %request.tenant_id, conversation = %request.conversation_id)
    )]
    pub async fn generate(&self, request: GenerationRequest) -> RelayResult<GenerationOutcome> {
        self.ensure_tenant_loaded(&request.tenant_id).await?;

        let turn_id = self.exclusions.begin(&request.tenant_id);
        let result = self.run_chain(&request, turn_id).await;
        self.exclusions.finish(turn_id);

        match &result {
            Ok(outcome) if outcome.is_success() => {
                self.events.publish(RoutingEvent::GenerationSucceeded {
                    tenant_id: request.tenant_id.clone(),
                    conversation_id: request.conversation_id.clone(),
                    model: outcome.used_model.clone().unwrap_or_default(),
                    tokens: outcome.tokens_consumed.total(),
                    occurred_at: Utc::now(),
                });
            }
            Ok(outcome) => {
                self.events.publish(RoutingEvent::GenerationFailed {
                    error_type: outcome.reason.unwrap_or(FailureKind::UpstreamError),
                    tenant_id: request.tenant_id.clone(),
                    conversation_id: request.conversation_id.clone(),
                    models_attempted: outcome
                        .attempts
                        .iter()
                        .map(|a| a.model_name.clone())
                        .collect(),
                    occurred_at: Utc::now(),
                });
                info!(
                    reason = %outcome.reason.map(|k| k.as_str()).unwrap_or("unknown"),
                    attempts = %outcome.attempts_summary(),
                    "generation failed"
                );
            }
            Err(RelayError::Cancelled) => {
                debug!("generation cancelled upstream");
            }
            Err(error) => {
                warn!(error = %error, "generation aborted");
            }
        }

        result
    }

    async fn ensure_tenant_loaded(&self, tenant_id: &str) -> RelayResult<()> {
        if self.pool.has_tenant(tenant_id) {
            return Ok(());
        }
        self.refresh_tenant(tenant_id).await
    }

    async fn run_chain(
        &self,
        request: &GenerationRequest,
        turn_id: Uuid,
    ) -> RelayResult<GenerationOutcome> {
        let base_sampling = self.executor.build_sampling(request);
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut tokens = TokenUsage::default();

        loop {
            if request.cancellation.is_cancelled() {
                return Err(RelayError::Cancelled);
            }

            let excluded = self.exclusions.snapshot(turn_id);
            let Some(binding) = self.selector.select(&request.tenant_id, &excluded) else {
                info!(
                    tried = attempts.len(),
                    "no eligible binding left, capacity exhausted"
                );
                return Ok(GenerationOutcome::failure(
                    FailureKind::CapacityExhausted,
                    tokens,
                    attempts,
                ));
            };

            self.events.publish(RoutingEvent::AttemptStarted {
                tenant_id: request.tenant_id.clone(),
                conversation_id: request.conversation_id.clone(),
                model: binding.model_name.clone(),
            });

            let verdict = self
                .try_binding(request, &binding, &base_sampling, &mut tokens, &attempts)
                .await;

            let (kind, detail) = match verdict {
                BindingVerdict::Done(outcome) => return Ok(outcome),
                BindingVerdict::Cancelled => return Err(RelayError::Cancelled),
                BindingVerdict::Failed { kind, detail } => (kind, detail),
            };

            attempts.push(AttemptRecord {
                model_name: binding.model_name.clone(),
                failure: kind,
                detail,
            });

            if !kind.is_recoverable() {
                return Ok(GenerationOutcome::failure(kind, tokens, attempts));
            }

            self.exclusions.exclude(turn_id, &binding.model_name);
            self.events.publish(RoutingEvent::ModelSwitched {
                tenant_id: request.tenant_id.clone(),
                conversation_id: request.conversation_id.clone(),
                from_model: binding.model_name.clone(),
                reason: kind,
            });

            if attempts.len() as u32 >= self.config.max_fallback_attempts {
                info!(
                    attempts = attempts.len(),
                    "fallback attempt bound reached"
                );
                return Ok(GenerationOutcome::failure(
                    FailureKind::CapacityExhausted,
                    tokens,
                    attempts,
                ));
            }
        }
    }

    /// Run the Execute/Validate/EscalateBudget cycle on one binding
    async fn try_binding(
        &self,
        request: &GenerationRequest,
        binding: &SelectedBinding,
        base_sampling: &SamplingParams,
        tokens: &mut TokenUsage,
        attempts: &[AttemptRecord],
    ) -> BindingVerdict {
        let mut escalation = 0u32;

        loop {
            if request.cancellation.is_cancelled() {
                return BindingVerdict::Cancelled;
            }

            let sampling = self.escalated_sampling(base_sampling, escalation);
            let execution = match self.executor.execute(request, binding, &sampling).await {
                Ok(execution) => execution,
                Err(ExecutionError::Cancelled) => return BindingVerdict::Cancelled,
                Err(ExecutionError::Provider(error)) => {
                    return self.classify_provider_failure(request, binding, error);
                }
                Err(error @ ExecutionError::NoSupportedRevision { .. }) => {
                    return BindingVerdict::Failed {
                        kind: FailureKind::UpstreamError,
                        detail: Some(error.to_string()),
                    };
                }
            };

            tokens.add(execution.response.usage);

            match validate(&execution.response) {
                Validation::Success { text } => {
                    if let Some(delta) =
                        self.quota.record_success(binding.id, execution.response.usage)
                    {
                        if let Err(error) = self.store.update_usage(binding.id, delta).await {
                            // bookkeeping only; the reply is already confirmed
                            warn!(
                                binding = %binding.id,
                                error = %error,
                                "failed to forward usage to the credential store"
                            );
                        }
                    }
                    return BindingVerdict::Done(GenerationOutcome::success(
                        text,
                        binding.model_name.clone(),
                        execution.api_version,
                        *tokens,
                        attempts.to_vec(),
                    ));
                }
                Validation::Blocked { reason } => {
                    return BindingVerdict::Failed {
                        kind: FailureKind::BlockedContent,
                        detail: Some(reason),
                    };
                }
                Validation::Noise { rule } => {
                    return BindingVerdict::Failed {
                        kind: FailureKind::DegenerateOutput,
                        detail: Some(rule.to_string()),
                    };
                }
                Validation::TruncatedEmpty => {
                    if escalation >= self.config.max_budget_retries {
                        return BindingVerdict::Failed {
                            kind: FailureKind::TruncatedEmpty,
                            detail: None,
                        };
                    }
                    escalation += 1;
                    let next = self.escalated_sampling(base_sampling, escalation);
                    warn!(
                        model = %binding.model_name,
                        escalation,
                        max_output_tokens = next.max_output_tokens,
                        "empty truncated output, escalating budget"
                    );
                    self.events.publish(RoutingEvent::BudgetEscalated {
                        tenant_id: request.tenant_id.clone(),
                        conversation_id: request.conversation_id.clone(),
                        model: binding.model_name.clone(),
                        escalation,
                        max_output_tokens: next.max_output_tokens,
                    });
                }
            }
        }
    }

    fn classify_provider_failure(
        &self,
        request: &GenerationRequest,
        binding: &SelectedBinding,
        error: ProviderError,
    ) -> BindingVerdict {
        match error {
            ProviderError::RateLimited {
                message,
                retry_after,
            } => {
                self.quota.record_rate_limit(
                    &request.tenant_id,
                    &binding.model_name,
                    retry_after,
                    Some(binding.id),
                );
                BindingVerdict::Failed {
                    kind: FailureKind::RateLimited,
                    detail: Some(message),
                }
            }
            ProviderError::Overloaded { message } => BindingVerdict::Failed {
                kind: FailureKind::Overloaded,
                detail: Some(message),
            },
            ProviderError::Timeout { timeout } => BindingVerdict::Failed {
                kind: FailureKind::Timeout,
                detail: Some(format!("after {}s", timeout.as_secs())),
            },
            ProviderError::Upstream { status, message } => BindingVerdict::Failed {
                kind: FailureKind::UpstreamError,
                detail: Some(format!("status {status}: {message}")),
            },
            // the executor resolves mismatches against its ladder; one
            // leaking through is an upstream contract violation
            error @ ProviderError::VersionMismatch { .. } => BindingVerdict::Failed {
                kind: FailureKind::UpstreamError,
                detail: Some(error.to_string()),
            },
        }
    }

    /// Sampling for the given escalation step: multiplied output budget,
    /// stepped-down temperature, everything else untouched.
    fn escalated_sampling(&self, base: &SamplingParams, escalation: u32) -> SamplingParams {
        if escalation == 0 {
            return *base;
        }
        let factor = self
            .config
            .budget_escalation_factors
            .get(escalation as usize - 1)
            .copied()
            .unwrap_or(escalation + 1);
        let temperature = (base.temperature
            - self.config.escalation_temperature_step * escalation as f32)
            .max(0.1);
        SamplingParams {
            temperature,
            max_output_tokens: base.max_output_tokens.saturating_mul(factor),
            ..*base
        }
    }
}

impl std::fmt::Debug for FallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackOrchestrator")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests;
