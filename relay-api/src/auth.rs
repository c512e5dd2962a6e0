//! API key resolution and per-subject rate limiting (C8).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use relay_types::{RelayError, RelayResult, Tier};

/// Resolves an API key to the caller's tier and a stable subject id for
/// rate-limit bucketing. Missing or unknown keys are rejected.
pub struct ApiKeyStore {
    keys: HashMap<String, (String, Tier)>,
}

impl ApiKeyStore {
    /// `entries` is `(api_key, subject_id, tier)`. In practice every
    /// configured key gets a tier; this relay does not distinguish
    /// per-key tiers beyond what `Settings` hands it.
    pub fn new(entries: Vec<(String, String, Tier)>) -> Self {
        let keys = entries
            .into_iter()
            .map(|(key, subject, tier)| (key, (subject, tier)))
            .collect();
        Self { keys }
    }

    pub fn resolve(&self, api_key: Option<&str>) -> RelayResult<(String, Tier)> {
        let key = api_key.ok_or(RelayError::AuthRejected)?;
        self.keys
            .get(key)
            .cloned()
            .ok_or(RelayError::AuthRejected)
    }
}

/// A token bucket per subject, refilled at `tier.rate_limit_per_hour / 3600`
/// tokens per second, capped at the hourly limit.
struct Bucket {
    tokens: AtomicI64,
    capacity: i64,
    refill_per_sec: f64,
    last_refill_millis: AtomicI64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Returns `Ok(())` if the subject has a token available (consuming
    /// one), or `RateLimited` with the seconds until the next token.
    pub fn check(&self, subject_id: &str, tier: Tier, now_millis: i64) -> RelayResult<()> {
        let capacity = tier.config().rate_limit_per_hour.min(i64::MAX as u64) as i64;
        let refill_per_sec = capacity as f64 / 3_600.0;

        let mut entry = self.buckets.entry(subject_id.to_string()).or_insert_with(|| Bucket {
            tokens: AtomicI64::new(capacity),
            capacity,
            refill_per_sec,
            last_refill_millis: AtomicI64::new(now_millis),
        });

        let last = entry.last_refill_millis.swap(now_millis, Ordering::SeqCst);
        let elapsed_secs = ((now_millis - last).max(0) as f64) / 1_000.0;
        let refill = (elapsed_secs * entry.refill_per_sec) as i64;
        if refill > 0 {
            let current = entry.tokens.load(Ordering::SeqCst);
            let refilled = (current + refill).min(entry.capacity);
            entry.tokens.store(refilled, Ordering::SeqCst);
        }

        let current = entry.tokens.load(Ordering::SeqCst);
        if current <= 0 {
            let retry_after_secs = if entry.refill_per_sec > 0.0 {
                (1.0 / entry.refill_per_sec).ceil() as u64
            } else {
                3_600
            };
            return Err(RelayError::RateLimited { retry_after_secs });
        }

        entry.tokens.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_is_rejected() {
        let store = ApiKeyStore::new(vec![("real-key".into(), "sub-1".into(), Tier::Free)]);
        assert!(matches!(
            store.resolve(Some("wrong-key")),
            Err(RelayError::AuthRejected)
        ));
    }

    #[test]
    fn missing_key_is_rejected() {
        let store = ApiKeyStore::new(vec![]);
        assert!(matches!(store.resolve(None), Err(RelayError::AuthRejected)));
    }

    #[test]
    fn known_key_resolves_tier_and_subject() {
        let store = ApiKeyStore::new(vec![("k".into(), "sub-1".into(), Tier::Business)]);
        let (subject, tier) = store.resolve(Some("k")).unwrap();
        assert_eq!(subject, "sub-1");
        assert_eq!(tier, Tier::Business);
    }

    #[test]
    fn rate_limiter_rejects_once_capacity_exhausted() {
        let limiter = RateLimiter::new();
        // Free tier: 3600/hour = 1/sec capacity; spend it immediately.
        let subject = "sub-rl";
        assert!(limiter.check(subject, Tier::Free, 0).is_ok());
        // Exhaust remaining burst capacity without time passing.
        for _ in 0..3_600 {
            let _ = limiter.check(subject, Tier::Free, 0);
        }
        assert!(matches!(
            limiter.check(subject, Tier::Free, 0),
            Err(RelayError::RateLimited { .. })
        ));
    }
}
