//! Solana relay client: JSON-RPC over WebSocket, `slotSubscribe`.
//!
//! Solana slots do not carry a block hash until the block is actually
//! produced, so the emitted `hash` is `"slot:<n>"` until a real block hash
//! can be resolved via `get_block`. Lookups by hash are not supported.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use relay_types::{BlockEvent, Chain, RelayError, RelayFeature, RelayResult, Tier};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::health::EndpointHealth;

use super::{jittered_backoff, ClientMetrics, HealthInfo, NetworkInfo, RelayClient, SyncStatus};

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(20);

pub struct SolanaClient {
    ws_endpoints: Vec<url::Url>,
    rpc_url: String,
    health: Arc<EndpointHealth>,
    breaker: Arc<CircuitBreaker>,
    connected: AtomicBool,
    reconnects: AtomicU64,
    events_emitted: AtomicU64,
}

impl SolanaClient {
    pub fn new(
        ws_endpoints: Vec<url::Url>,
        rpc_url: String,
        health: Arc<EndpointHealth>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        for url in &ws_endpoints {
            health.register(url.clone());
        }
        Self {
            ws_endpoints,
            rpc_url,
            health,
            breaker,
            connected: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    fn rpc(&self) -> RpcClient {
        RpcClient::new(self.rpc_url.clone())
    }

    fn pick_endpoint(&self) -> RelayResult<url::Url> {
        self.health.pick_best(&self.ws_endpoints, "solana")
    }

    /// Dials the pubsub client at `url`, guarded by the circuit breaker
    /// (C2) and scored into endpoint health (C1). A rejection from an
    /// already-open breaker does not count against the endpoint's own
    /// success rate, since the dial was never attempted.
    async fn dial(&self, url: &url::Url) -> RelayResult<PubsubClient> {
        let result = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(HANDSHAKE_DEADLINE, PubsubClient::new(url.as_str())).await {
                    Ok(Ok(client)) => Ok(client),
                    Ok(Err(err)) => Err(RelayError::HandshakeFailure {
                        url: url.to_string(),
                        reason: err.to_string(),
                    }),
                    Err(_) => Err(RelayError::Timeout {
                        millis: HANDSHAKE_DEADLINE.as_millis() as u64,
                    }),
                }
            })
            .await;

        match result {
            Ok(client) => {
                self.health.record_success(url);
                Ok(client)
            }
            Err(err @ RelayError::CircuitOpen { .. }) => Err(err),
            Err(err) => {
                self.health.record_failure(url);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl RelayClient for SolanaClient {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    async fn connect(&self, _ctx: CancellationToken) -> RelayResult<()> {
        let url = self.pick_endpoint()?;
        self.dial(&url).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn stream_blocks(&self, ctx: CancellationToken, out: mpsc::Sender<BlockEvent>) -> RelayResult<()> {
        let mut attempt = 0u32;
        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }

            let url = match self.pick_endpoint() {
                Ok(url) => url,
                Err(err) => {
                    warn!(chain = "solana", %err, "no healthy endpoint, backing off");
                    tokio::time::sleep(jittered_backoff(attempt, true)).await;
                    attempt += 1;
                    continue;
                }
            };

            let client = match self.dial(&url).await {
                Ok(client) => client,
                Err(err) => {
                    warn!(chain = "solana", url = %url, %err, "dial failed, reconnecting");
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(jittered_backoff(attempt, true)).await;
                    attempt += 1;
                    continue;
                }
            };

            let subscription = match client
                .slot_subscribe()
                .await
            {
                Ok(sub) => sub,
                Err(err) => {
                    warn!(chain = "solana", %err, "slotSubscribe failed");
                    continue;
                }
            };
            let (mut stream, _unsub) = subscription;

            self.connected.store(true, Ordering::SeqCst);
            attempt = 0;
            info!(chain = "solana", url = %url, "subscribed to slots");

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        self.connected.store(false, Ordering::SeqCst);
                        return Ok(());
                    }
                    slot_info = stream.next() => {
                        match slot_info {
                            Some(info) => {
                                let started = Instant::now();
                                let mut event = BlockEvent {
                                    chain: Chain::Solana,
                                    hash: format!("slot:{}", info.slot),
                                    height: info.slot,
                                    timestamp: None,
                                    detected_at: Utc::now(),
                                    source: url.to_string(),
                                    tier_hint: Tier::Free,
                                    relay_time_ms: None,
                                };
                                self.events_emitted.fetch_add(1, Ordering::Relaxed);
                                event.relay_time_ms = Some(started.elapsed().as_millis() as u64);
                                if out.send(event).await.is_err() {
                                    debug!(chain = "solana", "central channel closed");
                                    return Ok(());
                                }
                            }
                            None => {
                                warn!(chain = "solana", "slot stream ended");
                                self.health.record_failure(&url);
                                break;
                            }
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::SeqCst);
        }
    }

    async fn get_latest_block(&self) -> RelayResult<BlockEvent> {
        let rpc = self.rpc();
        let slot = rpc
            .get_slot()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        self.get_block_by_height(slot).await
    }

    async fn get_block_by_height(&self, height: u64) -> RelayResult<BlockEvent> {
        let rpc = self.rpc();
        match rpc.get_block(height).await {
            Ok(block) => Ok(BlockEvent {
                chain: Chain::Solana,
                hash: block.blockhash,
                height,
                timestamp: block
                    .block_time
                    .and_then(|t| chrono::DateTime::<Utc>::from_timestamp(t, 0)),
                detected_at: Utc::now(),
                source: self.rpc_url.clone(),
                tier_hint: Tier::Free,
                relay_time_ms: None,
            }),
            Err(_) => Ok(BlockEvent {
                chain: Chain::Solana,
                hash: format!("slot:{height}"),
                height,
                timestamp: None,
                detected_at: Utc::now(),
                source: self.rpc_url.clone(),
                tier_hint: Tier::Free,
                relay_time_ms: None,
            }),
        }
    }

    async fn get_block_by_hash(&self, _hash: &str) -> RelayResult<BlockEvent> {
        Err(RelayError::Unsupported {
            what: "solana does not support lookup by block hash".into(),
        })
    }

    async fn get_network_info(&self) -> RelayResult<NetworkInfo> {
        let rpc = self.rpc();
        let slot = rpc
            .get_slot()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(NetworkInfo {
            chain: "solana".into(),
            network: "mainnet-beta".into(),
            peer_count: None,
            latest_height: Some(slot),
        })
    }

    async fn get_peer_count(&self) -> RelayResult<u64> {
        Err(RelayError::Unsupported {
            what: "solana cluster node count is not exposed over this client".into(),
        })
    }

    async fn get_sync_status(&self) -> RelayResult<SyncStatus> {
        let rpc = self.rpc();
        let health = rpc.get_health().await;
        Ok(SyncStatus {
            syncing: health.is_err(),
            current_height: None,
            target_height: None,
        })
    }

    async fn get_health(&self) -> RelayResult<HealthInfo> {
        let rpc = self.rpc();
        match rpc.get_health().await {
            Ok(()) => Ok(HealthInfo {
                healthy: true,
                detail: None,
            }),
            Err(err) => Ok(HealthInfo {
                healthy: false,
                detail: Some(err.to_string()),
            }),
        }
    }

    async fn get_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            connected: self.is_connected(),
            reconnect_count: self.reconnects.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
        }
    }

    fn supports_feature(&self, feature: RelayFeature) -> bool {
        matches!(
            feature,
            RelayFeature::BlockStreaming | RelayFeature::Historical | RelayFeature::WebSocket | RelayFeature::Rest
        )
    }
}
