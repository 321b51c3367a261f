//! End-to-end chain behavior against a scripted provider

use super::*;
use crate::clock::ManualClock;
use crate::credentials::{InMemoryCredentialStore, MockCredentialStore, ModelBinding};
use crate::provider::ProviderResponse;
use crate::testing::{CallRecord, ScriptedProvider};
use crate::types::OutcomeStatus;
use parking_lot::Mutex;
use std::time::Duration;

struct Harness {
    orchestrator: FallbackOrchestrator,
    store: Arc<InMemoryCredentialStore>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    clock: ManualClock,
}

fn harness(
    bindings: Vec<ModelBinding>,
    script: Vec<Result<ProviderResponse, ProviderError>>,
) -> Harness {
    crate::testing::init_tracing();
    let store = Arc::new(InMemoryCredentialStore::new());
    store.put_bindings("acme", bindings);

    let provider = ScriptedProvider::new(script);
    let calls = provider.call_log();
    let clock = ManualClock::new();

    let orchestrator = FallbackOrchestrator::with_clock(
        RoutingConfig::default(),
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        Arc::new(provider),
        Arc::new(clock.clone()),
    )
    .expect("valid default config");

    Harness {
        orchestrator,
        store,
        calls,
        clock,
    }
}

fn request() -> GenerationRequest {
    GenerationRequest::new("customer asked about order 1182", "acme", "conv-1")
}

fn two_bindings() -> Vec<ModelBinding> {
    vec![
        ModelBinding::new("acme", "aria-3-large").with_priority(0),
        ModelBinding::new("acme", "aria-3-mini").with_priority(1),
    ]
}

// Scenario A: two overloads inside the local retry budget, then success
// on the same binding.
#[tokio::test(start_paused = true)]
async fn overload_recovers_locally_on_the_same_binding() {
    let h = harness(
        two_bindings(),
        vec![
            ScriptedProvider::overloaded(),
            ScriptedProvider::overloaded(),
            ScriptedProvider::ok("your order shipped on Monday"),
        ],
    );

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.used_model.as_deref(), Some("aria-3-large"));
    // first call plus exactly two local retries
    assert_eq!(h.calls.lock().len(), 3);
    assert!(outcome.attempts.is_empty());
}

// Scenario B: rate limit with a reset hint exhausts binding 1; binding 2
// completes the chain.
#[tokio::test]
async fn rate_limit_switches_binding_and_marks_exhaustion() {
    let bindings = two_bindings();
    let first_id = bindings[0].id;
    let h = harness(
        bindings,
        vec![
            ScriptedProvider::rate_limited(120),
            ScriptedProvider::ok("happy to help with that"),
        ],
    );

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.used_model.as_deref(), Some("aria-3-mini"));
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].failure, FailureKind::RateLimited);

    let stats = h.orchestrator.stats("acme");
    let first = stats.iter().find(|s| s.id == first_id).unwrap();
    assert!(first.exhausted);

    // the hint, not the default cooldown, governs recovery
    h.clock.advance(Duration::from_secs(61));
    assert!(h.orchestrator.stats("acme")[0].exhausted);
    h.clock.advance(Duration::from_secs(60));
    assert!(!h.orchestrator.stats("acme")[0].exhausted);
}

// Scenario C: empty truncation escalates the budget twice on the same
// binding, third attempt succeeds.
#[tokio::test]
async fn empty_truncation_escalates_budget_then_succeeds() {
    let h = harness(
        vec![ModelBinding::new("acme", "aria-3-large")],
        vec![
            ScriptedProvider::truncated(""),
            ScriptedProvider::truncated(""),
            ScriptedProvider::ok("the long-form answer finally came through"),
        ],
    );

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert!(outcome.is_success());
    let calls = h.calls.lock();
    let budgets: Vec<u32> = calls.iter().map(|c| c.sampling.max_output_tokens).collect();
    assert_eq!(budgets, vec![2048, 4096, 6144]);

    // temperature steps down with each escalation
    let temps: Vec<f32> = calls.iter().map(|c| c.sampling.temperature).collect();
    assert!((temps[0] - 0.7).abs() < 1e-6);
    assert!((temps[1] - 0.5).abs() < 1e-6);
    assert!((temps[2] - 0.3).abs() < 1e-6);
}

// Scenario D: a content-policy block fails immediately, no retries.
#[tokio::test]
async fn content_block_fails_immediately() {
    let h = harness(two_bindings(), vec![ScriptedProvider::blocked("harassment")]);

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Blocked);
    assert_eq!(outcome.reason, Some(FailureKind::BlockedContent));
    assert_eq!(outcome.attempts[0].detail.as_deref(), Some("harassment"));
    assert_eq!(h.calls.lock().len(), 1);
}

// Scenario E: with every binding exhausted, the chain fails before any
// provider call.
#[tokio::test]
async fn exhausted_pool_fails_with_zero_calls() {
    let h = harness(
        two_bindings(),
        vec![
            ScriptedProvider::rate_limited(300),
            ScriptedProvider::rate_limited(300),
        ],
    );

    // first chain burns through both bindings
    let first = h.orchestrator.generate(request()).await.unwrap();
    assert_eq!(first.reason, Some(FailureKind::CapacityExhausted));
    assert_eq!(first.attempts.len(), 2);
    let calls_after_first = h.calls.lock().len();
    assert_eq!(calls_after_first, 2);

    // both bindings are still cooling down: zero further provider calls
    let second = h.orchestrator.generate(request()).await.unwrap();
    assert_eq!(second.status, OutcomeStatus::Exhausted);
    assert_eq!(second.reason, Some(FailureKind::CapacityExhausted));
    assert!(second.attempts.is_empty());
    assert_eq!(h.calls.lock().len(), calls_after_first);
}

// Scenario F: four identical symbol characters classify as degenerate
// output and are never retried.
#[tokio::test]
async fn degenerate_output_fails_without_retry() {
    let h = harness(two_bindings(), vec![ScriptedProvider::ok("♦♦♦♦")]);

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert_eq!(outcome.reason, Some(FailureKind::DegenerateOutput));
    assert_eq!(h.calls.lock().len(), 1);
}

#[tokio::test]
async fn exhausted_escalations_feed_into_a_switch() {
    let h = harness(
        two_bindings(),
        vec![
            ScriptedProvider::truncated(""),
            ScriptedProvider::truncated(""),
            ScriptedProvider::truncated(""),
            ScriptedProvider::ok("picked up by the backup model"),
        ],
    );

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.used_model.as_deref(), Some("aria-3-mini"));
    assert_eq!(outcome.attempts[0].failure, FailureKind::TruncatedEmpty);
}

#[tokio::test]
async fn truncation_with_partial_text_is_a_success() {
    let h = harness(
        two_bindings(),
        vec![ScriptedProvider::truncated(
            "here is the first part of a fairly detailed explanation",
        )],
    );

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(h.calls.lock().len(), 1);
}

#[tokio::test]
async fn chain_never_reselects_a_tried_model() {
    let h = harness(
        two_bindings(),
        vec![
            ScriptedProvider::upstream(500),
            ScriptedProvider::upstream(500),
        ],
    );

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert_eq!(outcome.reason, Some(FailureKind::CapacityExhausted));
    let calls = h.calls.lock();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].model, calls[1].model);
}

// Termination property: a pathological provider cannot push the chain
// past max_fallback_attempts bindings x (1 + max_budget_retries)
// attempts each.
#[tokio::test]
async fn call_volume_is_bounded_with_a_pathological_provider() {
    let bindings: Vec<ModelBinding> = (0..8)
        .map(|i| ModelBinding::new("acme", format!("aria-3-variant-{i}")).with_priority(i))
        .collect();
    let script = (0..64).map(|_| ScriptedProvider::truncated("")).collect();
    let h = harness(bindings, script);

    let outcome = h.orchestrator.generate(request()).await.unwrap();

    assert_eq!(outcome.reason, Some(FailureKind::CapacityExhausted));
    // 5 bindings tried at most, each 1 + 2 escalations
    assert_eq!(outcome.attempts.len(), 5);
    assert_eq!(h.calls.lock().len(), 15);
}

#[tokio::test]
async fn confirmed_success_forwards_usage_to_the_store() {
    let bindings = two_bindings();
    let first_id = bindings[0].id;
    let h = harness(bindings, vec![ScriptedProvider::ok("all sorted")]);

    h.orchestrator.generate(request()).await.unwrap();

    let usage = h.store.recorded_usage(first_id);
    assert_eq!(usage.requests, 1);
    assert_eq!(usage.tokens, 52);
}

#[tokio::test]
async fn failures_forward_nothing_to_the_store() {
    let bindings = two_bindings();
    let first_id = bindings[0].id;
    let second_id = bindings[1].id;
    let h = harness(
        bindings,
        vec![
            ScriptedProvider::rate_limited(60),
            ScriptedProvider::rate_limited(60),
        ],
    );

    h.orchestrator.generate(request()).await.unwrap();

    assert_eq!(h.store.recorded_usage(first_id).requests, 0);
    assert_eq!(h.store.recorded_usage(second_id).requests, 0);
}

#[tokio::test]
async fn cancellation_before_selection_makes_no_calls() {
    let h = harness(two_bindings(), vec![ScriptedProvider::ok("never sent")]);

    let request = request();
    request.cancellation.cancel();
    let result = h.orchestrator.generate(request).await;

    assert!(matches!(result, Err(RelayError::Cancelled)));
    assert!(h.calls.lock().is_empty());
}

#[tokio::test]
async fn events_trace_the_chain() {
    let h = harness(
        two_bindings(),
        vec![
            ScriptedProvider::rate_limited(60),
            ScriptedProvider::ok("done"),
        ],
    );
    let mut rx = h.orchestrator.events().subscribe();

    h.orchestrator.generate(request()).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert!(matches!(
        seen[0],
        RoutingEvent::AttemptStarted { ref model, .. } if model == "aria-3-large"
    ));
    assert!(matches!(
        seen[1],
        RoutingEvent::ModelSwitched { reason: FailureKind::RateLimited, .. }
    ));
    assert!(matches!(
        seen[2],
        RoutingEvent::AttemptStarted { ref model, .. } if model == "aria-3-mini"
    ));
    assert!(matches!(
        seen[3],
        RoutingEvent::GenerationSucceeded { ref model, tokens: 52, .. } if model == "aria-3-mini"
    ));
}

#[tokio::test]
async fn store_failure_surfaces_as_an_error() {
    let mut store = MockCredentialStore::new();
    store
        .expect_get_bindings()
        .returning(|tenant| Err(RelayError::store_for_tenant("backend down", tenant)));

    let orchestrator = FallbackOrchestrator::new(
        RoutingConfig::default(),
        Arc::new(store),
        Arc::new(ScriptedProvider::new(vec![])),
    )
    .unwrap();

    let result = orchestrator.generate(request()).await;
    assert!(matches!(result, Err(RelayError::Store { .. })));
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let config = RoutingConfig {
        max_fallback_attempts: 0,
        ..RoutingConfig::default()
    };
    let result = FallbackOrchestrator::new(
        config,
        Arc::new(InMemoryCredentialStore::new()),
        Arc::new(ScriptedProvider::new(vec![])),
    );
    assert!(matches!(result, Err(RelayError::Config { .. })));
}
