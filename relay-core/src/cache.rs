//! Cache / prefetch worker (C10): an LRU of recent blocks keyed by
//! `(chain, height)`, with a secondary `(chain, hash)` index, that serves
//! reads before falling back to the live relay.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use relay_types::{BlockEvent, Chain};
use tracing::debug;

use crate::chains::SharedRelayClient;

pub const DEFAULT_CACHE_CAPACITY: usize = 64;

struct Inner {
    by_height: LruCache<(Chain, u64), BlockEvent>,
    by_hash: HashMap<(Chain, String), u64>,
}

/// Caches the most recently seen blocks per chain and opportunistically
/// prefetches the next couple of heights. Prefetch is a hint: failures are
/// swallowed and logged at debug, never surfaced to callers.
pub struct BlockCache {
    inner: Mutex<Inner>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(Inner {
                by_height: LruCache::new(cap),
                by_hash: HashMap::new(),
            }),
        }
    }

    pub fn insert(&self, event: BlockEvent) {
        let mut inner = self.inner.lock();
        inner.by_hash.insert((event.chain, event.hash.clone()), event.height);
        inner.by_height.put((event.chain, event.height), event);
    }

    pub fn get_by_height(&self, chain: Chain, height: u64) -> Option<BlockEvent> {
        self.inner.lock().by_height.get(&(chain, height)).cloned()
    }

    pub fn get_by_hash(&self, chain: Chain, hash: &str) -> Option<BlockEvent> {
        let mut inner = self.inner.lock();
        let height = *inner.by_hash.get(&(chain, hash.to_string()))?;
        inner.by_height.get(&(chain, height)).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fires a best-effort fetch of `height+1` and `height+2` against the
    /// given relay client and caches whatever comes back. Never returns an
    /// error to the caller; any failure is logged at debug.
    pub async fn prefetch_following(self: &Arc<Self>, client: SharedRelayClient, chain: Chain, height: u64) {
        for offset in [1u64, 2u64] {
            let target = height + offset;
            if self.get_by_height(chain, target).is_some() {
                continue;
            }
            match client.get_block_by_height(target).await {
                Ok(event) => self.insert(event),
                Err(err) => debug!(%chain, target, %err, "prefetch miss, ignoring"),
            }
        }
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::Tier;

    fn event(chain: Chain, height: u64, hash: &str) -> BlockEvent {
        BlockEvent {
            chain,
            hash: hash.to_string(),
            height,
            timestamp: None,
            detected_at: Utc::now(),
            source: "test".into(),
            tier_hint: Tier::Free,
            relay_time_ms: Some(1),
        }
    }

    #[test]
    fn serves_by_height_and_hash() {
        let cache = BlockCache::new(4);
        cache.insert(event(Chain::Bitcoin, 100, "abc"));

        assert_eq!(cache.get_by_height(Chain::Bitcoin, 100).unwrap().hash, "abc");
        assert_eq!(cache.get_by_hash(Chain::Bitcoin, "abc").unwrap().height, 100);
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let cache = BlockCache::new(2);
        cache.insert(event(Chain::Ethereum, 1, "a"));
        cache.insert(event(Chain::Ethereum, 2, "b"));
        cache.insert(event(Chain::Ethereum, 3, "c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get_by_height(Chain::Ethereum, 1).is_none());
        assert!(cache.get_by_height(Chain::Ethereum, 3).is_some());
    }
}
