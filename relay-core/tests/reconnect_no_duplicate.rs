//! A relay client that drops and reconnects typically re-announces whatever
//! block it last saw before the disconnect. The ingestion pipeline must not
//! re-broadcast it a second time within the chain's dedup TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_core::ingestion::NoopMempoolHintSink;
use relay_core::{BlockCache, Broadcaster, Deduper, IngestionPipeline, RelayMetrics};
use relay_types::{BlockEvent, Chain, Tier};
use tokio_util::sync::CancellationToken;

fn event(hash: &str, height: u64, source: &str) -> BlockEvent {
    BlockEvent {
        chain: Chain::Solana,
        hash: hash.into(),
        height,
        timestamp: None,
        detected_at: Utc::now(),
        source: source.into(),
        tier_hint: Tier::Free,
        relay_time_ms: Some(3),
    }
}

#[tokio::test]
async fn resubscribe_after_reconnect_does_not_redeliver_the_same_block() {
    let metrics = Arc::new(RelayMetrics::new());
    let deduper = Arc::new(Deduper::new());
    let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));
    let cache = Arc::new(BlockCache::new(64));
    let pipeline = Arc::new(IngestionPipeline::new(16, deduper, metrics.clone(), Arc::new(NoopMempoolHintSink)));

    let (_handle, mut rx) = broadcaster.subscribe(Tier::Free, None);

    let ctx = CancellationToken::new();
    let run_ctx = ctx.clone();
    let run_broadcaster = broadcaster.clone();
    let run_cache = cache.clone();
    let run_pipeline = pipeline.clone();
    let runner = tokio::spawn(async move {
        run_pipeline.run(run_ctx, run_broadcaster, run_cache, |_| None).await;
    });

    let sender = pipeline.sender();

    // Initial sighting from the live connection.
    sender.send(event("slot:500", 500, "solana-ws-1")).await.unwrap();
    let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("first event delivered")
        .unwrap();
    assert_eq!(first.height, 500);

    // Connection drops and the client reconnects, re-announcing the same
    // last-known slot before it resumes forward progress.
    sender.send(event("slot:500", 500, "solana-ws-1")).await.unwrap();
    let replay = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(replay.is_err(), "replayed slot from reconnect must be suppressed");

    // Forward progress after the reconnect still gets through.
    sender.send(event("slot:501", 501, "solana-ws-1")).await.unwrap();
    let next = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("next event delivered")
        .unwrap();
    assert_eq!(next.height, 501);

    ctx.cancel();
    drop(sender);
    let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;
}
