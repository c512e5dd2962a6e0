//! Repeated failures against the same endpoint grow the reconnect backoff
//! 10m -> 15m -> 22m30s under the default multiplier, then cap out, and a
//! single success resets it.

use std::time::Duration;

use relay_core::{EndpointHealth, HealthConfig};
use url::Url;

#[test]
fn backoff_grows_by_the_configured_multiplier_then_caps() {
    let health = EndpointHealth::new(HealthConfig::default());
    let url: Url = "https://node.example.com:8332".parse().unwrap();
    health.register(url.clone());

    health.record_failure(&url);
    let after_first = health.status(&url).unwrap().current_backoff;
    assert_eq!(after_first, Duration::from_secs(15 * 60));

    health.record_failure(&url);
    let after_second = health.status(&url).unwrap().current_backoff;
    assert_eq!(after_second, Duration::from_secs(22 * 60 + 30));

    for _ in 0..10 {
        health.record_failure(&url);
    }
    let capped = health.status(&url).unwrap().current_backoff;
    assert_eq!(capped, Duration::from_secs(30 * 60));

    health.record_success(&url);
    let reset = health.status(&url).unwrap();
    assert_eq!(reset.current_backoff, Duration::from_secs(10 * 60));
    assert!(reset.next_retry.is_none());
    assert_eq!(reset.consecutive_failures, 0);
}

#[test]
fn three_consecutive_failures_marks_endpoint_problematic() {
    let cfg = HealthConfig::default();
    let health = EndpointHealth::new(cfg.clone());
    let url: Url = "https://node.example.com:8332".parse().unwrap();
    health.register(url.clone());

    health.record_failure(&url);
    health.record_failure(&url);
    assert!(!health.status(&url).unwrap().is_problematic(&cfg));

    health.record_failure(&url);
    assert!(health.status(&url).unwrap().is_problematic(&cfg));
    assert!(!health.is_healthy(&url), "endpoint in backoff is not healthy");
}
