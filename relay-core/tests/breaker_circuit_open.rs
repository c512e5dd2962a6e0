//! Five consecutive upstream failures trip the breaker open; a call issued
//! while still within `reset_timeout` must reject without ever invoking the
//! guarded closure (no network I/O).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::{BreakerConfig, BreakerState, CircuitBreaker};
use relay_types::RelayError;

fn config() -> BreakerConfig {
    BreakerConfig {
        max_failures: 5,
        reset_timeout: Duration::from_secs(30),
        half_open_max_calls: 3,
        call_timeout: Duration::from_secs(1),
        failure_threshold: 0.9,
        latency_threshold: Duration::from_secs(5),
        window_size: 50,
        min_requests_threshold: 1000,
    }
}

#[tokio::test]
async fn five_consecutive_failures_trip_the_breaker_open() {
    let breaker = CircuitBreaker::new("test-upstream", config());

    for _ in 0..5 {
        let result: relay_types::RelayResult<()> = breaker
            .call(|| async { Err(RelayError::Upstream("connection refused".into())) })
            .await;
        assert!(result.is_err());
    }

    assert_eq!(breaker.state(), BreakerState::Open);

    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked_clone = invoked.clone();
    let result = breaker
        .call(|| async move {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RelayError>(())
        })
        .await;

    assert!(matches!(result, Err(RelayError::CircuitOpen { name }) if name == "test-upstream"));
    assert_eq!(invoked.load(Ordering::SeqCst), 0, "guarded call must not run while breaker is open");
}

#[tokio::test]
async fn breaker_goes_half_open_after_reset_timeout_with_no_calls_attempted() {
    let mut cfg = config();
    cfg.reset_timeout = Duration::from_millis(50);
    let breaker = CircuitBreaker::new("test-upstream", cfg);

    for _ in 0..5 {
        let _: relay_types::RelayResult<()> =
            breaker.call(|| async { Err(RelayError::Upstream("down".into())) }).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(75)).await;

    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked_clone = invoked.clone();
    let result = breaker
        .call(|| async move {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RelayError>(())
        })
        .await;

    assert!(result.is_ok(), "a call after reset_timeout must be let through, not rejected");
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
}
