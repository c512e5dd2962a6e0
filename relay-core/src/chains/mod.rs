//! Per-chain upstream relay clients (C4).
//!
//! Each chain gets its own module implementing the shared [`RelayClient`]
//! contract; the dispatcher and API layer only ever see the trait object.

pub mod bitcoin;
pub mod ethereum;
pub mod solana;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_types::{BlockEvent, RelayFeature, RelayResult};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Point-in-time network info, shape varies slightly by chain but the
/// fields below cover every chain this relay speaks to.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub chain: String,
    pub network: String,
    pub peer_count: Option<u64>,
    pub latest_height: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub syncing: bool,
    pub current_height: Option<u64>,
    pub target_height: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub healthy: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    pub connected: bool,
    pub reconnect_count: u64,
    pub events_emitted: u64,
}

/// Common contract every chain-specific client satisfies. The dispatcher,
/// cache worker, and API layer depend only on this, never a concrete type.
#[async_trait]
pub trait RelayClient: Send + Sync {
    fn chain(&self) -> relay_types::Chain;

    async fn connect(&self, ctx: CancellationToken) -> RelayResult<()>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;

    /// Begins pushing `BlockEvent`s into `out` until `ctx` is cancelled.
    async fn stream_blocks(&self, ctx: CancellationToken, out: mpsc::Sender<BlockEvent>) -> RelayResult<()>;

    async fn get_latest_block(&self) -> RelayResult<BlockEvent>;
    async fn get_block_by_height(&self, height: u64) -> RelayResult<BlockEvent>;
    async fn get_block_by_hash(&self, hash: &str) -> RelayResult<BlockEvent>;

    async fn get_network_info(&self) -> RelayResult<NetworkInfo>;
    async fn get_peer_count(&self) -> RelayResult<u64>;
    async fn get_sync_status(&self) -> RelayResult<SyncStatus>;
    async fn get_health(&self) -> RelayResult<HealthInfo>;
    async fn get_metrics(&self) -> ClientMetrics;

    fn supports_feature(&self, feature: RelayFeature) -> bool;
}

pub type SharedRelayClient = Arc<dyn RelayClient>;

/// Base for the reconnect backoff shared by the ETH/SOL WebSocket clients:
/// 2s base, doubling, capped at 30s, with up to 256s when the endpoint is
/// flagged problematic by C1.
pub fn reconnect_backoff(attempt: u32, problematic: bool) -> Duration {
    let base = Duration::from_secs(2);
    let cap = if problematic {
        Duration::from_secs(256)
    } else {
        Duration::from_secs(30)
    };
    let scaled = base.saturating_mul(1u32 << attempt.min(16));
    scaled.min(cap)
}

/// Jittered variant of [`reconnect_backoff`], used by the actual dial loop.
pub fn jittered_backoff(attempt: u32, problematic: bool) -> Duration {
    use rand::Rng;
    let base = reconnect_backoff(attempt, problematic);
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    base + Duration::from_millis(jitter_ms)
}
