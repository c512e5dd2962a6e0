//! Exercises the same resolve-then-check sequence the WS handshake runs:
//! an unknown key is rejected before rate limiting is even consulted, and a
//! known key that bursts past its hourly budget is throttled.

use relay_api::{ApiKeyStore, RateLimiter};
use relay_types::{RelayError, Tier};

#[test]
fn unknown_key_never_reaches_the_rate_limiter() {
    let store = ApiKeyStore::new(vec![("good-key".into(), "acme".into(), Tier::Business)]);
    let limiter = RateLimiter::new();

    let resolved = store.resolve(Some("bad-key"));
    assert!(matches!(resolved, Err(RelayError::AuthRejected)));

    // A handshake implementation must short-circuit here; confirm the
    // limiter has no bucket for a subject that was never resolved.
    assert!(limiter.check("acme", Tier::Business, 0).is_ok());
}

#[test]
fn resolved_subject_is_throttled_once_its_burst_is_spent() {
    let store = ApiKeyStore::new(vec![("good-key".into(), "acme".into(), Tier::Free)]);
    let limiter = RateLimiter::new();

    let (subject, tier) = store.resolve(Some("good-key")).unwrap();
    assert_eq!(subject, "acme");

    // Free tier gets 3600/hour, i.e. a burst of one token per second with
    // no time advancing between checks here.
    assert!(limiter.check(&subject, tier, 0).is_ok());
    for _ in 0..3_600 {
        let _ = limiter.check(&subject, tier, 0);
    }
    assert!(matches!(
        limiter.check(&subject, tier, 0),
        Err(RelayError::RateLimited { .. })
    ));

    // An hour later the bucket has refilled.
    assert!(limiter.check(&subject, tier, 3_600_000).is_ok());
}
