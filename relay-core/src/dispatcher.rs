//! Relay dispatcher (C7): enforces the per-tier delivery deadline on top
//! of the broadcaster's fan-out and reports deadline misses as metrics,
//! never as a failure the publisher has to handle.

use std::sync::Arc;
use std::time::Instant;

use relay_types::{BlockEvent, Tier};
use tracing::{debug, warn};

use crate::metrics::RelayMetrics;

/// Wraps a single delivery attempt with the tier's write deadline.
///
/// Free/pro/business deadlines are advisory (the underlying broadcaster
/// send is already non-blocking): exceeding them only logs at debug.
/// Turbo enforces its deadline as a hard timeout and reports a metric.
/// Enterprise has no strict deadline and only logs at warn if delivery
/// is unusually slow.
pub struct Dispatcher {
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    pub fn new(metrics: Arc<RelayMetrics>) -> Self {
        Self { metrics }
    }

    /// Times a delivery (the actual send already happened inside the
    /// broadcaster; this wraps whatever additional per-subscriber work —
    /// serialization, framing — the API layer does before it) and applies
    /// tier policy to the outcome.
    pub async fn deliver<F, Fut>(&self, tier: Tier, event: &BlockEvent, deliver_fn: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let deadline = tier.config().write_deadline;
        let started = Instant::now();

        let outcome = tokio::time::timeout(deadline, deliver_fn()).await;
        let elapsed = started.elapsed();
        self.metrics.record_dispatcher_latency(tier, elapsed.as_millis() as f64);

        match (tier, outcome) {
            (_, Ok(())) => {}
            (Tier::Free | Tier::Pro | Tier::Business, Err(_)) => {
                debug!(?tier, chain = %event.chain, "dispatcher deadline exceeded");
            }
            (Tier::Turbo, Err(_)) => {
                self.metrics.record_dispatcher_deadline_miss(tier);
                warn!(?tier, chain = %event.chain, "turbo delivery missed write deadline");
            }
            (Tier::Enterprise, Err(_)) => {
                warn!(?tier, chain = %event.chain, "enterprise delivery unusually slow");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::Chain;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn event() -> BlockEvent {
        BlockEvent {
            chain: Chain::Bitcoin,
            hash: "h".into(),
            height: 1,
            timestamp: None,
            detected_at: Utc::now(),
            source: "test".into(),
            tier_hint: Tier::Free,
            relay_time_ms: Some(1),
        }
    }

    #[tokio::test]
    async fn fast_delivery_runs_to_completion() {
        let metrics = Arc::new(RelayMetrics::new());
        let dispatcher = Dispatcher::new(metrics);
        let ran = AtomicBool::new(false);

        dispatcher
            .deliver(Tier::Free, &event(), || async {
                ran.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn turbo_deadline_miss_is_recorded() {
        let metrics = Arc::new(RelayMetrics::new());
        let dispatcher = Dispatcher::new(metrics.clone());

        dispatcher
            .deliver(Tier::Turbo, &event(), || async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            })
            .await;

        assert!(metrics.render().contains("relay_dispatcher_deadline_misses_total"));
    }
}
