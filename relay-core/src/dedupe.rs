//! Block deduplication (C3): a bounded, TTL'd set of `(chain, hash)` keys.

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use relay_types::Chain;

const DEFAULT_MAX_ENTRIES: usize = 50_000;

struct DeduperEntry {
    first_seen: DateTime<Utc>,
}

/// Deduplicates `(chain, hash)` pairs within a chain-specific TTL window.
/// Backed by an LRU so capacity overflow evicts oldest-by-insertion first,
/// same as the entries the cache worker (C10) keeps for height lookups.
pub struct Deduper {
    inner: Mutex<LruCache<(Chain, String), DeduperEntry>>,
}

impl Deduper {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns `true` and marks the key seen if it is unseen within `ttl`,
    /// `false` if it is a live duplicate. Linearizable per key: the whole
    /// check-then-insert runs under one lock acquisition.
    pub fn seen(&self, chain: Chain, hash: &str, ttl: Duration) -> bool {
        let now = Utc::now();
        let key = (chain, hash.to_string());
        let mut cache = self.inner.lock();

        if let Some(entry) = cache.get(&key) {
            let age = now - entry.first_seen;
            if age.to_std().unwrap_or(Duration::ZERO) <= ttl {
                return false;
            }
        }

        cache.put(key, DeduperEntry { first_seen: now });
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let deduper = Deduper::new();
        assert!(deduper.seen(Chain::Bitcoin, "abc", Duration::from_secs(60)));
    }

    #[test]
    fn repeat_within_ttl_is_suppressed() {
        let deduper = Deduper::new();
        assert!(deduper.seen(Chain::Ethereum, "0xdead", Duration::from_secs(60)));
        assert!(!deduper.seen(Chain::Ethereum, "0xdead", Duration::from_secs(60)));
    }

    #[test]
    fn same_hash_different_chain_is_independent() {
        let deduper = Deduper::new();
        assert!(deduper.seen(Chain::Bitcoin, "shared", Duration::from_secs(60)));
        assert!(deduper.seen(Chain::Ethereum, "shared", Duration::from_secs(60)));
    }

    #[test]
    fn capacity_overflow_evicts_oldest() {
        let deduper = Deduper::with_capacity(2);
        assert!(deduper.seen(Chain::Solana, "slot:1", Duration::from_secs(600)));
        assert!(deduper.seen(Chain::Solana, "slot:2", Duration::from_secs(600)));
        assert!(deduper.seen(Chain::Solana, "slot:3", Duration::from_secs(600)));
        assert_eq!(deduper.len(), 2);
        // slot:1 was evicted, so it is observed as unseen again.
        assert!(deduper.seen(Chain::Solana, "slot:1", Duration::from_secs(600)));
    }
}
