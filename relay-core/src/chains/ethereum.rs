//! Ethereum relay client: JSON-RPC over WebSocket, `eth_subscribe("newHeads")`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use relay_types::{BlockEvent, Chain, RelayError, RelayFeature, RelayResult, Tier};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::breaker::CircuitBreaker;
use crate::health::EndpointHealth;

use super::{jittered_backoff, ClientMetrics, HealthInfo, NetworkInfo, RelayClient, SyncStatus};

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(20);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(50);

pub struct EthereumClient {
    endpoints: Vec<Url>,
    health: Arc<EndpointHealth>,
    breaker: Arc<CircuitBreaker>,
    connected: AtomicBool,
    reconnects: AtomicU64,
    events_emitted: AtomicU64,
}

impl EthereumClient {
    pub fn new(endpoints: Vec<Url>, health: Arc<EndpointHealth>, breaker: Arc<CircuitBreaker>) -> Self {
        for url in &endpoints {
            health.register(url.clone());
        }
        Self {
            endpoints,
            health,
            breaker,
            connected: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    fn pick_endpoint(&self) -> RelayResult<Url> {
        self.health.pick_best(&self.endpoints, "ethereum")
    }

    /// Dials `url`, guarded by the circuit breaker (C2) and scored into
    /// endpoint health (C1). A rejection from an already-open breaker does
    /// not count against the endpoint's own success rate, since the dial
    /// was never attempted.
    async fn dial(&self, url: &Url) -> RelayResult<impl Provider + Clone> {
        let result = self
            .breaker
            .call(|| async {
                let connect = WsConnect::new(url.as_str());
                let fut = ProviderBuilder::new().on_ws(connect);
                match tokio::time::timeout(HANDSHAKE_DEADLINE, fut).await {
                    Ok(Ok(provider)) => Ok(provider),
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
            Ok(provider) => {
                self.health.record_success(url);
                Ok(provider)
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
impl RelayClient for EthereumClient {
    fn chain(&self) -> Chain {
        Chain::Ethereum
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
                    warn!(chain = "ethereum", %err, "no healthy endpoint, backing off");
                    tokio::time::sleep(jittered_backoff(attempt, true)).await;
                    attempt += 1;
                    continue;
                }
            };

            let provider = match self.dial(&url).await {
                Ok(p) => p,
                Err(err) => {
                    warn!(chain = "ethereum", url = %url, %err, "dial failed, reconnecting");
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    let problematic = self
                        .health
                        .status(&url)
                        .map(|s| s.success_rate() < 0.9)
                        .unwrap_or(false);
                    tokio::time::sleep(jittered_backoff(attempt, problematic)).await;
                    attempt += 1;
                    continue;
                }
            };

            self.connected.store(true, Ordering::SeqCst);
            attempt = 0;

            let sub = match provider.subscribe_blocks().await {
                Ok(sub) => sub,
                Err(err) => {
                    self.health.record_failure(&url);
                    warn!(chain = "ethereum", %err, "newHeads subscribe failed");
                    continue;
                }
            };
            let mut stream = sub.into_stream();

            info!(chain = "ethereum", url = %url, "subscribed to newHeads");
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        self.connected.store(false, Ordering::SeqCst);
                        return Ok(());
                    }
                    _ = heartbeat.tick() => {
                        if provider.get_block_number().await.is_err() {
                            warn!(chain = "ethereum", "heartbeat failed, forcing reconnect");
                            self.health.record_failure(&url);
                            break;
                        }
                    }
                    header = stream.next() => {
                        match header {
                            Some(header) => {
                                let started = Instant::now();
                                let mut event = BlockEvent {
                                    chain: Chain::Ethereum,
                                    hash: header.hash.to_string(),
                                    height: header.number,
                                    timestamp: DateTime::<Utc>::from_timestamp(header.timestamp as i64, 0),
                                    detected_at: Utc::now(),
                                    source: url.to_string(),
                                    tier_hint: Tier::Free,
                                    relay_time_ms: None,
                                };
                                self.events_emitted.fetch_add(1, Ordering::Relaxed);
                                event.relay_time_ms = Some(started.elapsed().as_millis() as u64);
                                if out.send(event).await.is_err() {
                                    debug!(chain = "ethereum", "central channel closed");
                                    return Ok(());
                                }
                            }
                            None => {
                                warn!(chain = "ethereum", "subscription stream ended");
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
        let url = self.pick_endpoint()?;
        let provider = self.dial(&url).await?;
        let number = provider
            .get_block_number()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        self.get_block_by_height_via(&provider, &url, number).await
    }

    async fn get_block_by_height(&self, height: u64) -> RelayResult<BlockEvent> {
        let url = self.pick_endpoint()?;
        let provider = self.dial(&url).await?;
        self.get_block_by_height_via(&provider, &url, height).await
    }

    async fn get_block_by_hash(&self, hash: &str) -> RelayResult<BlockEvent> {
        use alloy::primitives::B256;
        use std::str::FromStr;

        let url = self.pick_endpoint()?;
        let provider = self.dial(&url).await?;
        let hash = B256::from_str(hash).map_err(|e| RelayError::Upstream(e.to_string()))?;
        let block = provider
            .get_block_by_hash(hash)
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?
            .ok_or_else(|| RelayError::Upstream("block not found".into()))?;
        Ok(BlockEvent {
            chain: Chain::Ethereum,
            hash: block.header.hash.to_string(),
            height: block.header.number,
            timestamp: DateTime::<Utc>::from_timestamp(block.header.timestamp as i64, 0),
            detected_at: Utc::now(),
            source: url.to_string(),
            tier_hint: Tier::Free,
            relay_time_ms: None,
        })
    }

    async fn get_network_info(&self) -> RelayResult<NetworkInfo> {
        let url = self.pick_endpoint()?;
        let provider = self.dial(&url).await?;
        let height = provider
            .get_block_number()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(NetworkInfo {
            chain: "ethereum".into(),
            network: "mainnet".into(),
            peer_count: None,
            latest_height: Some(height),
        })
    }

    async fn get_peer_count(&self) -> RelayResult<u64> {
        Err(RelayError::Unsupported {
            what: "eth_peerCount not exposed over the pooled WS client".into(),
        })
    }

    async fn get_sync_status(&self) -> RelayResult<SyncStatus> {
        Ok(SyncStatus {
            syncing: false,
            current_height: None,
            target_height: None,
        })
    }

    async fn get_health(&self) -> RelayResult<HealthInfo> {
        Ok(HealthInfo {
            healthy: self.is_connected(),
            detail: None,
        })
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
            RelayFeature::BlockStreaming
                | RelayFeature::SmartContracts
                | RelayFeature::StateQueries
                | RelayFeature::EventLogs
                | RelayFeature::WebSocket
                | RelayFeature::Rest
                | RelayFeature::Historical
        )
    }
}

impl EthereumClient {
    async fn get_block_by_height_via(
        &self,
        provider: &(impl Provider + Clone),
        url: &Url,
        height: u64,
    ) -> RelayResult<BlockEvent> {
        use alloy::eips::BlockNumberOrTag;

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?
            .ok_or_else(|| RelayError::Upstream("block not found".into()))?;
        Ok(BlockEvent {
            chain: Chain::Ethereum,
            hash: block.header.hash.to_string(),
            height: block.header.number,
            timestamp: DateTime::<Utc>::from_timestamp(block.header.timestamp as i64, 0),
            detected_at: Utc::now(),
            source: url.to_string(),
            tier_hint: Tier::Free,
            relay_time_ms: None,
        })
    }
}
