//! Ingestion pipeline (C5): merges per-chain relay streams into one bounded
//! central channel, deduplicates, and fans out to the broadcaster and the
//! cache worker without ever blocking on either.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_types::BlockEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcaster::Broadcaster;
use crate::cache::BlockCache;
use crate::chains::SharedRelayClient;
use crate::config::DeduperConfig;
use crate::dedupe::Deduper;
use crate::metrics::RelayMetrics;

pub const DEFAULT_CENTRAL_CHANNEL_SIZE: usize = 1500;

/// Opaque sink for the Bitcoin mempool hint store. The pipeline calls this
/// for every Bitcoin event but never inspects what it does with it.
pub trait MempoolHintSink: Send + Sync {
    fn notify(&self, event: &BlockEvent);
}

pub struct NoopMempoolHintSink;

impl MempoolHintSink for NoopMempoolHintSink {
    fn notify(&self, _event: &BlockEvent) {}
}

/// Owns the central channel and the deduper. Per-chain relay tasks are the
/// producers; `run` is the single consumer.
pub struct IngestionPipeline {
    sender: mpsc::Sender<BlockEvent>,
    receiver: Mutex<Option<mpsc::Receiver<BlockEvent>>>,
    deduper: Arc<Deduper>,
    deduper_cfg: DeduperConfig,
    metrics: Arc<RelayMetrics>,
    mempool_hints: Arc<dyn MempoolHintSink>,
}

impl IngestionPipeline {
    pub fn new(capacity: usize, deduper: Arc<Deduper>, metrics: Arc<RelayMetrics>, mempool_hints: Arc<dyn MempoolHintSink>) -> Self {
        Self::with_deduper_config(capacity, deduper, DeduperConfig::default(), metrics, mempool_hints)
    }

    /// Like [`Self::new`] but with per-chain dedup TTLs sourced from
    /// configuration instead of each chain's hardcoded default.
    pub fn with_deduper_config(
        capacity: usize,
        deduper: Arc<Deduper>,
        deduper_cfg: DeduperConfig,
        metrics: Arc<RelayMetrics>,
        mempool_hints: Arc<dyn MempoolHintSink>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            deduper,
            deduper_cfg,
            metrics,
            mempool_hints,
        }
    }

    /// Producer handle for relay tasks; send blocks (back-pressures the
    /// relay) if the central channel is momentarily full.
    pub fn sender(&self) -> mpsc::Sender<BlockEvent> {
        self.sender.clone()
    }

    /// Consumes and relays every event until the channel closes or `ctx`
    /// is cancelled. Only one caller may run this at a time; it takes
    /// ownership of the receiver on first call.
    pub async fn run(
        &self,
        ctx: CancellationToken,
        broadcaster: Arc<Broadcaster>,
        cache: Arc<BlockCache>,
        relay_for_prefetch: impl Fn(relay_types::Chain) -> Option<SharedRelayClient>,
    ) {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .expect("IngestionPipeline::run called more than once");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!("ingestion pipeline cancelled, draining remaining events");
                    receiver.close();
                    while let Some(event) = receiver.recv().await {
                        self.handle_event(event, &broadcaster, &cache, &relay_for_prefetch).await;
                    }
                    return;
                }
                event = receiver.recv() => {
                    match event {
                        Some(event) => self.handle_event(event, &broadcaster, &cache, &relay_for_prefetch).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_event(
        &self,
        event: BlockEvent,
        broadcaster: &Arc<Broadcaster>,
        cache: &Arc<BlockCache>,
        relay_for_prefetch: &impl Fn(relay_types::Chain) -> Option<SharedRelayClient>,
    ) {
        let ttl = self.deduper_cfg.ttl_for(event.chain);
        if !self.deduper.seen(event.chain, &event.hash, ttl) {
            self.metrics.record_deduped(event.chain);
            debug!(chain = %event.chain, hash = %event.hash, "duplicate suppressed");
            return;
        }

        self.metrics.record_ingested(event.chain, event.relay_time_ms);

        if event.chain == relay_types::Chain::Bitcoin {
            self.mempool_hints.notify(&event);
        }

        broadcaster.publish(&event);
        cache.insert(event.clone());

        if let Some(client) = relay_for_prefetch(event.chain) {
            let cache = cache.clone();
            let chain = event.chain;
            let height = event.height;
            tokio::spawn(async move {
                cache.prefetch_following(client, chain, height).await;
            });
        }
    }
}

pub fn default_ingestion_timeout() -> Duration {
    Duration::from_secs(30)
}
