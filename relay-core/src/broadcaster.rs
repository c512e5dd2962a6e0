//! Tier-aware broadcaster (C6): fans a single event stream out to many
//! subscribers, each with its own bounded ring buffer and overflow policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_types::{BlockEvent, Chain, Tier};
use tokio::sync::Notify;

use crate::metrics::RelayMetrics;

pub type SubscriberId = u64;

/// The ring buffer backing a single subscription. Shared between the
/// `Subscription` entry the broadcaster holds (the producer side, which
/// can push and drop the oldest entry on overflow) and the `Subscriber`
/// handed back to the caller (the consumer side, which pops and awaits).
struct RingBuffer {
    queue: Mutex<VecDeque<BlockEvent>>,
    capacity: usize,
    notify: Notify,
    consumer_dropped: AtomicBool,
    producer_dropped: AtomicBool,
}

enum PushOutcome {
    Delivered,
    Overwrote,
    Skipped,
    ConsumerGone,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            consumer_dropped: AtomicBool::new(false),
            producer_dropped: AtomicBool::new(false),
        }
    }

    /// Pushes `event`, applying the overflow policy when full. Never
    /// blocks: on a full non-overwriting buffer the event is dropped.
    fn push(&self, event: BlockEvent, overwrite_on_full: bool) -> PushOutcome {
        if self.consumer_dropped.load(Ordering::Acquire) {
            return PushOutcome::ConsumerGone;
        }

        let outcome = {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                if overwrite_on_full {
                    queue.pop_front();
                    queue.push_back(event);
                    PushOutcome::Overwrote
                } else {
                    return PushOutcome::Skipped;
                }
            } else {
                queue.push_back(event);
                PushOutcome::Delivered
            }
        };
        self.notify.notify_one();
        outcome
    }

    fn close_producer(&self) {
        self.producer_dropped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// The consumer-facing half of a subscription. Mirrors the `recv` shape of
/// a `tokio::sync::mpsc::Receiver` so callers can keep using it in a
/// `tokio::select!` or a plain `.recv().await` loop.
pub struct Subscriber {
    buffer: Arc<RingBuffer>,
}

impl Subscriber {
    pub async fn recv(&mut self) -> Option<BlockEvent> {
        loop {
            let notified = self.buffer.notify.notified();
            if let Some(event) = self.buffer.queue.lock().pop_front() {
                return Some(event);
            }
            if self.buffer.producer_dropped.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.buffer.consumer_dropped.store(true, Ordering::Release);
    }
}

struct Subscription {
    tier: Tier,
    chain_filter: Option<Chain>,
    buffer: Arc<RingBuffer>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.buffer.close_producer();
    }
}

/// A lightweight handle a caller keeps to identify and later unsubscribe
/// a registered subscription.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    pub tier: Tier,
    pub buffer_capacity: usize,
    pub created_at: DateTime<Utc>,
}

/// Holds every active subscription and fans out published events.
///
/// Subscribe/unsubscribe take the table's write path; publish only reads.
/// publish is guaranteed to never block on a slow subscriber: full buffers
/// are either drained-and-overwritten (turbo/enterprise) or skipped.
pub struct Broadcaster {
    next_id: AtomicU64,
    subscriptions: DashMap<SubscriberId, Subscription>,
    metrics: Arc<RelayMetrics>,
}

impl Broadcaster {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            metrics,
        }
    }

    pub fn subscribe(&self, tier: Tier, chain_filter: Option<Chain>) -> (SubscriberHandle, Subscriber) {
        let cfg = tier.config();
        let buffer = Arc::new(RingBuffer::new(cfg.buffer_size));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = Utc::now();

        self.subscriptions.insert(
            id,
            Subscription {
                tier,
                chain_filter,
                buffer: buffer.clone(),
            },
        );

        let handle = SubscriberHandle {
            id,
            tier,
            buffer_capacity: cfg.buffer_size,
            created_at,
        };
        self.metrics.set_subscribers_active(self.subscriptions.len() as i64);
        (handle, Subscriber { buffer })
    }

    pub fn unsubscribe(&self, handle: &SubscriberHandle) {
        self.subscriptions.remove(&handle.id);
        self.metrics.set_subscribers_active(self.subscriptions.len() as i64);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Delivers `event` to every matching subscriber, applying each
    /// subscriber's tier overflow policy independently. Never awaits a
    /// full subscriber buffer.
    pub fn publish(&self, event: &BlockEvent) {
        for entry in self.subscriptions.iter() {
            let sub = entry.value();
            if let Some(filter) = sub.chain_filter {
                if filter != event.chain {
                    continue;
                }
            }

            match sub.buffer.push(event.clone(), sub.tier.allow_overwrite_on_full()) {
                PushOutcome::Delivered => {}
                PushOutcome::Overwrote => self.metrics.broadcaster_overwrite(sub.tier),
                PushOutcome::Skipped => self.metrics.broadcaster_skip(sub.tier),
                PushOutcome::ConsumerGone => {
                    // unsubscribe path will reap the entry.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(height: u64) -> BlockEvent {
        BlockEvent {
            chain: Chain::Bitcoin,
            hash: format!("h{height}"),
            height,
            timestamp: None,
            detected_at: Utc::now(),
            source: "test".into(),
            tier_hint: Tier::Free,
            relay_time_ms: Some(1),
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order_per_subscriber() {
        let metrics = Arc::new(RelayMetrics::new());
        let broadcaster = Broadcaster::new(metrics);
        let (_handle, mut rx) = broadcaster.subscribe(Tier::Free, None);

        broadcaster.publish(&event(1));
        broadcaster.publish(&event(2));
        broadcaster.publish(&event(3));

        assert_eq!(rx.recv().await.unwrap().height, 1);
        assert_eq!(rx.recv().await.unwrap().height, 2);
        assert_eq!(rx.recv().await.unwrap().height, 3);
    }

    #[tokio::test]
    async fn chain_filter_excludes_other_chains() {
        let metrics = Arc::new(RelayMetrics::new());
        let broadcaster = Broadcaster::new(metrics);
        let (_handle, mut rx) = broadcaster.subscribe(Tier::Free, Some(Chain::Ethereum));

        broadcaster.publish(&event(1));
        let mut eth_event = event(2);
        eth_event.chain = Chain::Ethereum;
        broadcaster.publish(&eth_event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.chain, Chain::Ethereum);
    }

    #[tokio::test]
    async fn turbo_overwrites_oldest_when_full() {
        let metrics = Arc::new(RelayMetrics::new());
        let broadcaster = Broadcaster::new(metrics);
        let (_handle, mut rx) = broadcaster.subscribe(Tier::Turbo, None);
        let capacity = Tier::Turbo.config().buffer_size;

        for height in 0..(capacity as u64 + 1) {
            broadcaster.publish(&event(height));
        }

        let first_received = rx.recv().await.unwrap();
        assert_eq!(first_received.height, 1);
    }

    #[tokio::test]
    async fn free_tier_skips_instead_of_overwriting_when_full() {
        let metrics = Arc::new(RelayMetrics::new());
        let broadcaster = Broadcaster::new(metrics);
        let (_handle, mut rx) = broadcaster.subscribe(Tier::Free, None);
        let capacity = Tier::Free.config().buffer_size;

        for height in 0..(capacity as u64 + 1) {
            broadcaster.publish(&event(height));
        }

        let first_received = rx.recv().await.unwrap();
        assert_eq!(first_received.height, 0, "free tier must keep the oldest, not overwrite it");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let metrics = Arc::new(RelayMetrics::new());
        let broadcaster = Broadcaster::new(metrics);
        let (handle, _rx) = broadcaster.subscribe(Tier::Free, None);
        broadcaster.unsubscribe(&handle);
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.publish(&event(1));
    }

    #[tokio::test]
    async fn recv_returns_none_after_unsubscribe_drains_buffer() {
        let metrics = Arc::new(RelayMetrics::new());
        let broadcaster = Broadcaster::new(metrics);
        let (handle, mut rx) = broadcaster.subscribe(Tier::Free, None);

        broadcaster.publish(&event(1));
        broadcaster.unsubscribe(&handle);

        assert_eq!(rx.recv().await.unwrap().height, 1);
        assert!(rx.recv().await.is_none());
    }
}
