//! Bitcoin relay client: ZMQ `hashblock` subscription plus Core JSON-RPC.
//!
//! When ZMQ is disabled or unreachable, falls back to an enhanced mock
//! that emits synthetic blocks at a realistic (or accelerated, for
//! `mock_fast_blocks`) cadence so the rest of the pipeline runs end to end.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bitcoincore_rpc::{Auth, Client as RpcClient, RpcApi};
use chrono::Utc;
use relay_types::{BlockEvent, Chain, RelayError, RelayFeature, RelayResult, Tier};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::health::EndpointHealth;

use super::{ClientMetrics, HealthInfo, NetworkInfo, RelayClient, SyncStatus};

#[derive(Debug, Clone)]
pub struct BitcoinConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub zmq_endpoint: Option<String>,
    pub mock_fast_blocks: bool,
}

pub struct BitcoinClient {
    cfg: BitcoinConfig,
    rpc_url: url::Url,
    health: Arc<EndpointHealth>,
    breaker: Arc<CircuitBreaker>,
    connected: AtomicBool,
    reconnects: AtomicU64,
    events_emitted: AtomicU64,
}

impl BitcoinClient {
    pub fn new(cfg: BitcoinConfig, health: Arc<EndpointHealth>, breaker: Arc<CircuitBreaker>) -> Self {
        let rpc_url = url::Url::parse(&cfg.rpc_url).unwrap_or_else(|_| {
            url::Url::parse("http://127.0.0.1:8332").expect("fallback rpc url is valid")
        });
        health.register(rpc_url.clone());
        Self {
            cfg,
            rpc_url,
            health,
            breaker,
            connected: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
        }
    }

    /// Opens a fresh RPC connection, guarded by the circuit breaker (C2)
    /// and scored into endpoint health (C1). A rejection from an
    /// already-open breaker does not count against the endpoint's own
    /// success rate, since the call was never attempted.
    async fn rpc(&self) -> RelayResult<RpcClient> {
        let result = self
            .breaker
            .call(|| async {
                RpcClient::new(
                    &self.cfg.rpc_url,
                    Auth::UserPass(self.cfg.rpc_user.clone(), self.cfg.rpc_pass.clone()),
                )
                .map_err(|e| RelayError::Upstream(e.to_string()))
            })
            .await;

        match result {
            Ok(client) => {
                self.health.record_success(&self.rpc_url);
                Ok(client)
            }
            Err(err @ RelayError::CircuitOpen { .. }) => Err(err),
            Err(err) => {
                self.health.record_failure(&self.rpc_url);
                Err(err)
            }
        }
    }

    fn block_event_from_hash(&self, client: &RpcClient, hash: bitcoincore_rpc::bitcoin::BlockHash) -> RelayResult<BlockEvent> {
        let header = client
            .get_block_header_info(&hash)
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(BlockEvent {
            chain: Chain::Bitcoin,
            hash: hash.to_string(),
            height: header.height as u64,
            timestamp: chrono::DateTime::<Utc>::from_timestamp(header.time as i64, 0),
            detected_at: Utc::now(),
            source: self.cfg.rpc_url.clone(),
            tier_hint: Tier::Free,
            relay_time_ms: None,
        })
    }

    /// Runs the ZMQ `hashblock` read loop, reconnecting on any transport
    /// error. Falls back to [`Self::run_mock_stream`] if ZMQ isn't
    /// configured for this instance.
    async fn run_zmq_stream(&self, ctx: CancellationToken, out: mpsc::Sender<BlockEvent>, endpoint: String) -> RelayResult<()> {
        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }

            let endpoint_clone = endpoint.clone();
            let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);

            let blocking = tokio::task::spawn_blocking(move || -> Result<(), String> {
                let zctx = zmq::Context::new();
                let socket = zctx.socket(zmq::SUB).map_err(|e| e.to_string())?;
                socket.connect(&endpoint_clone).map_err(|e| e.to_string())?;
                socket.set_subscribe(b"hashblock").map_err(|e| e.to_string())?;
                loop {
                    let parts = socket.recv_multipart(0).map_err(|e| e.to_string())?;
                    if let Some(hash) = parts.get(1) {
                        if tx.blocking_send(hash.clone()).is_err() {
                            return Ok(());
                        }
                    }
                }
            });

            let client = self.rpc().await?;
            self.connected.store(true, Ordering::SeqCst);

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        self.connected.store(false, Ordering::SeqCst);
                        blocking.abort();
                        return Ok(());
                    }
                    raw = rx.recv() => {
                        match raw {
                            Some(raw_hash) => {
                                let hash = bitcoincore_rpc::bitcoin::BlockHash::from_slice(&raw_hash)
                                    .map_err(|e| RelayError::Upstream(e.to_string()))?;
                                match self.block_event_from_hash(&client, hash) {
                                    Ok(event) => {
                                        self.events_emitted.fetch_add(1, Ordering::Relaxed);
                                        if out.send(event).await.is_err() {
                                            return Ok(());
                                        }
                                    }
                                    Err(err) => warn!(chain = "bitcoin", %err, "failed to resolve block header"),
                                }
                            }
                            None => {
                                warn!(chain = "bitcoin", "zmq reader task ended, reconnecting");
                                self.reconnects.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Synthetic block generator used when ZMQ is unavailable.
    async fn run_mock_stream(&self, ctx: CancellationToken, out: mpsc::Sender<BlockEvent>) -> RelayResult<()> {
        let interval = if self.cfg.mock_fast_blocks {
            Duration::from_millis(200)
        } else {
            Duration::from_secs(600)
        };
        let mut height: u64 = 800_000;
        self.connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {
                    height += 1;
                    let started = Instant::now();
                    let event = BlockEvent {
                        chain: Chain::Bitcoin,
                        hash: format!("mock-{height:016x}"),
                        height,
                        timestamp: Some(Utc::now()),
                        detected_at: Utc::now(),
                        source: "mock".into(),
                        tier_hint: Tier::Free,
                        relay_time_ms: Some(started.elapsed().as_millis() as u64),
                    };
                    self.events_emitted.fetch_add(1, Ordering::Relaxed);
                    if out.send(event).await.is_err() {
                        return Ok(());
                    }
                    debug!(chain = "bitcoin", height, "emitted mock block");
                }
            }
        }
    }
}

#[async_trait]
impl RelayClient for BitcoinClient {
    fn chain(&self) -> Chain {
        Chain::Bitcoin
    }

    async fn connect(&self, _ctx: CancellationToken) -> RelayResult<()> {
        if self.cfg.zmq_endpoint.is_some() {
            let _ = self.rpc().await?;
        }
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
        match self.cfg.zmq_endpoint.clone() {
            Some(endpoint) => {
                info!(chain = "bitcoin", %endpoint, "starting zmq hashblock stream");
                self.run_zmq_stream(ctx, out, endpoint).await
            }
            None => {
                info!(chain = "bitcoin", "zmq disabled, running mock block stream");
                self.run_mock_stream(ctx, out).await
            }
        }
    }

    async fn get_latest_block(&self) -> RelayResult<BlockEvent> {
        let client = self.rpc().await?;
        let hash = client
            .get_best_block_hash()
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        self.block_event_from_hash(&client, hash)
    }

    async fn get_block_by_height(&self, height: u64) -> RelayResult<BlockEvent> {
        let client = self.rpc().await?;
        let hash = client
            .get_block_hash(height)
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        self.block_event_from_hash(&client, hash)
    }

    async fn get_block_by_hash(&self, hash: &str) -> RelayResult<BlockEvent> {
        use std::str::FromStr;
        let client = self.rpc().await?;
        let hash = bitcoincore_rpc::bitcoin::BlockHash::from_str(hash)
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        self.block_event_from_hash(&client, hash)
    }

    async fn get_network_info(&self) -> RelayResult<NetworkInfo> {
        let client = self.rpc().await?;
        let info = client
            .get_blockchain_info()
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(NetworkInfo {
            chain: "bitcoin".into(),
            network: info.chain.to_string(),
            peer_count: None,
            latest_height: Some(info.blocks),
        })
    }

    async fn get_peer_count(&self) -> RelayResult<u64> {
        let client = self.rpc().await?;
        let count = client
            .get_connection_count()
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(count as u64)
    }

    async fn get_sync_status(&self) -> RelayResult<SyncStatus> {
        let client = self.rpc().await?;
        let info = client
            .get_blockchain_info()
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(SyncStatus {
            syncing: info.blocks < info.headers,
            current_height: Some(info.blocks),
            target_height: Some(info.headers),
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
                | RelayFeature::Historical
                | RelayFeature::Rest
                | RelayFeature::CompactBlocks
        )
    }
}
