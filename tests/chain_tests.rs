mod common;

use common::Scripted;
use domintel::chain::{ChainOutcome, Outcome, ResolverChain};
use domintel::error::SourceError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn chain() -> ResolverChain<str, String> {
    ResolverChain::new("test", Duration::from_secs(10))
}

#[tokio::test]
async fn test_first_valid_alternate_wins() {
    let first = Scripted::ok("first", "one".to_string());
    let second = Scripted::ok("second", "two".to_string());
    let second_calls = second.calls();

    let outcome = chain()
        .with_alternate(Arc::new(first))
        .with_alternate(Arc::new(second))
        .resolve("example.cl", |_| true)
        .await;

    assert_eq!(
        outcome,
        ChainOutcome::Resolved {
            value: "one".to_string(),
            source: "first".to_string()
        }
    );
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failure_then_success_equals_direct_success() {
    let direct = chain()
        .with_alternate(Arc::new(Scripted::ok("good", "value".to_string())))
        .resolve("example.cl", |_| true)
        .await;

    let after_failures = chain()
        .with_alternate(Arc::new(Scripted::<String>::failing("down-1")))
        .with_alternate(Arc::new(Scripted::<String>::failing("down-2")))
        .with_alternate(Arc::new(Scripted::ok("good", "value".to_string())))
        .resolve("example.cl", |_| true)
        .await;

    assert_eq!(direct, after_failures);
}

#[tokio::test]
async fn test_invalid_value_moves_on_and_is_kept_as_partial() {
    let outcome = chain()
        .with_alternate(Arc::new(Scripted::ok("empty", String::new())))
        .with_alternate(Arc::new(Scripted::<String>::failing("down")))
        .resolve("example.cl", |value| !value.is_empty())
        .await;

    match outcome {
        ChainOutcome::Exhausted {
            last_error,
            partial,
            fallback,
        } => {
            assert_eq!(last_error.source_name(), "down");
            assert_eq!(partial, Some(String::new()));
            assert_eq!(fallback, None);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_alternate_times_out_and_next_is_tried() {
    let slow = Scripted::ok("slow", "late".to_string()).after(Duration::from_secs(30));
    let fast = Scripted::ok("fast", "quick".to_string());

    let started = tokio::time::Instant::now();
    let outcome = chain()
        .with_alternate(Arc::new(slow))
        .with_alternate(Arc::new(fast))
        .resolve("example.cl", |_| true)
        .await;

    assert_eq!(
        outcome,
        ChainOutcome::Resolved {
            value: "quick".to_string(),
            source: "fast".to_string()
        }
    );
    // bounded by the per-attempt timeout, not the slow source
    assert!(started.elapsed() < Duration::from_secs(11));
}

#[tokio::test]
async fn test_exhausted_chain_reports_fallback() {
    let outcome = chain()
        .with_alternate(Arc::new(Scripted::<String>::failing("down")))
        .with_fallback(|domain: &str| format!("placeholder for {}", domain))
        .resolve("example.cl", |_| true)
        .await;

    assert!(!outcome.is_resolved());
    match outcome.into_outcome(String::new) {
        Outcome::Degraded { value, cause } => {
            assert_eq!(value, "placeholder for example.cl");
            assert!(matches!(cause, SourceError::Unavailable { .. }));
        }
        other => panic!("expected degraded outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_chain_is_exhausted_not_panicking() {
    let outcome = chain().resolve("example.cl", |_| true).await;
    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.source_name(), "test");
}

#[tokio::test]
async fn test_outcome_degradation_notes() {
    let success: Outcome<u8> = Outcome::Success(1);
    let default_only: Outcome<u8> = Outcome::DefaultOnly(0);
    let degraded: Outcome<u8> = Outcome::Degraded {
        value: 0,
        cause: SourceError::rejected("ip-api", "rate limited (HTTP 429)"),
    };

    assert_eq!(success.degradation("operator"), None);
    assert!(default_only.degradation("operator").unwrap().starts_with("operator:"));
    assert_eq!(
        degraded.degradation("operator").unwrap(),
        "operator: ip-api rejected the request: rate limited (HTTP 429)"
    );
}
