//! End-to-end policy engine tests: configuration in, composed execution out.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use outrigger_core::error::{PipelineError, PipelineResult};
use outrigger_core::policy::{
    CircuitBreakerConfig, PolicyDescriptor, PolicyExecutor, PolicyRegistry, RetryConfig,
    TimeoutConfig,
};
use outrigger_core::PipelineConfig;

/// Route policy-layer tracing into the test harness; `RUST_LOG` selects.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn executor_with(
    entries: &[(&str, PolicyDescriptor)],
) -> (Arc<PolicyRegistry>, PolicyExecutor) {
    let registry = Arc::new(PolicyRegistry::new());
    for (name, descriptor) in entries {
        registry.register(*name, descriptor).expect("fresh name");
    }
    (Arc::clone(&registry), PolicyExecutor::new(registry))
}

#[tokio::test]
async fn breaker_outside_retry_short_circuits_the_whole_retry_group() {
    init_tracing();
    let (_, executor) = executor_with(&[
        (
            "breaker",
            PolicyDescriptor::CircuitBreaker(CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            }),
        ),
        (
            "retry",
            PolicyDescriptor::Retry(
                RetryConfig::builder()
                    .max_attempts(3)
                    .fixed_backoff(Duration::from_millis(1))
                    .build()
                    .expect("valid config"),
            ),
        ),
    ]);

    let calls = Arc::new(AtomicU32::new(0));

    // First run: the inner retry burns its full budget, the breaker sees one
    // (exhausted) failure and opens.
    let counting = Arc::clone(&calls);
    let result: PipelineResult<()> = executor
        .run(&["breaker", "retry"], move || {
            let counting = Arc::clone(&counting);
            async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::transport("connection refused"))
            }
        })
        .await;
    assert!(matches!(result, Err(PipelineError::RetryExhausted { attempts: 3, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Second run: the open breaker rejects before any attempt is made.
    let counting = Arc::clone(&calls);
    let result: PipelineResult<()> = executor
        .run(&["breaker", "retry"], move || {
            let counting = Arc::clone(&counting);
            async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::transport("connection refused"))
            }
        })
        .await;
    assert!(matches!(result, Err(PipelineError::CircuitOpen)));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "no attempt reaches the operation");
}

#[tokio::test]
async fn repeated_composition_shares_the_registered_instances() {
    init_tracing();
    let (registry, _) = executor_with(&[
        (
            "breaker",
            PolicyDescriptor::CircuitBreaker(CircuitBreakerConfig {
                failure_threshold: 1,
                break_duration: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            }),
        ),
    ]);

    // Composing twice from the same names yields composites backed by the
    // same instances, so state carries across composites.
    let first = registry.compose(&["breaker"]).expect("registered");
    let second = registry.compose(&["breaker"]).expect("registered");

    let result: PipelineResult<()> =
        first.execute(|| async { Err(PipelineError::transport("down")) }).await;
    assert!(result.is_err());

    // The breaker opened via `first`; `second` observes it.
    let result: PipelineResult<()> = second.execute(|| async { Ok(()) }).await;
    assert!(matches!(result, Err(PipelineError::CircuitOpen)));
}

#[tokio::test]
async fn toml_configuration_drives_composed_execution() {
    init_tracing();
    let document = r#"
        [policies.bound]
        kind = "timeout"
        timeout_ms = 50

        [policies.page-fallback]
        kind = "fallback"
        value = { items = [], truncated = true }
    "#;

    let config = PipelineConfig::from_toml_str(document).expect("valid document");
    let registry = Arc::new(PolicyRegistry::new());
    config.apply_policies(&registry).expect("fresh names");
    let executor = PolicyExecutor::new(registry);

    // Fallback outside the timeout rescues the timed-out call.
    let value: serde_json::Value = executor
        .run(&["page-fallback", "bound"], || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(serde_json::json!({"items": [1, 2, 3]}))
        })
        .await
        .expect("fallback rescues the timeout");
    assert_eq!(value, serde_json::json!({"items": [], "truncated": true}));
}

#[tokio::test]
async fn unknown_name_fails_before_the_operation_runs() {
    init_tracing();
    let (_, executor) =
        executor_with(&[("bound", PolicyDescriptor::Timeout(TimeoutConfig::new(Duration::from_secs(1))))]);

    let ran = Arc::new(AtomicU32::new(0));
    let counting = Arc::clone(&ran);
    let result: PipelineResult<()> = executor
        .run(&["bound", "ghost"], move || {
            let counting = Arc::clone(&counting);
            async move {
                counting.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(matches!(result, Err(PipelineError::NotFound { .. })));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn sync_composition_matches_async_semantics() {
    init_tracing();
    let (_, executor) = executor_with(&[
        (
            "retry",
            PolicyDescriptor::Retry(
                RetryConfig::builder()
                    .max_attempts(2)
                    .fixed_backoff(Duration::from_millis(1))
                    .build()
                    .expect("valid config"),
            ),
        ),
    ]);

    let calls = Arc::new(AtomicU32::new(0));
    let counting = Arc::clone(&calls);
    let result: PipelineResult<()> = executor.run_sync(&["retry"], move || {
        counting.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::transport("down"))
    });

    assert!(matches!(result, Err(PipelineError::RetryExhausted { attempts: 2, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
