//! Two endpoints racing to report the same block: the ingestion pipeline
//! must publish it exactly once, attributed to whichever arrived first.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_core::ingestion::NoopMempoolHintSink;
use relay_core::{Broadcaster, BlockCache, Deduper, IngestionPipeline, RelayMetrics};
use relay_types::{BlockEvent, Chain, Tier};
use tokio_util::sync::CancellationToken;

fn event(source: &str, relay_time_ms: u64) -> BlockEvent {
    BlockEvent {
        chain: Chain::Ethereum,
        hash: "0xabc".into(),
        height: 100,
        timestamp: None,
        detected_at: Utc::now(),
        source: source.into(),
        tier_hint: Tier::Free,
        relay_time_ms: Some(relay_time_ms),
    }
}

#[tokio::test]
async fn duplicate_block_from_second_endpoint_is_suppressed() {
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
    sender.send(event("endpoint-a", 12)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    sender.send(event("endpoint-b", 5)).await.unwrap();

    let first = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("first event delivered")
        .unwrap();
    assert_eq!(first.source, "endpoint-a");
    assert_eq!(first.relay_time_ms, Some(12));

    let second = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(second.is_err(), "no second delivery for the duplicate hash");

    ctx.cancel();
    drop(sender);
    let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;
}
