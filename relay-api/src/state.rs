//! Shared application state behind the HTTP/WS surface (C8).
//!
//! Wrapped in `async_lock::RwLock` and served via `tide_disco::App`, whose
//! blanket `ReadState`/`WriteState` impls for `RwLock<T>` this relies on,
//! following the usual `App::<RwLock<State>, ServerError>` wiring.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use relay_core::{BlockCache, Broadcaster, CircuitBreaker, EndpointHealth, RelayMetrics, SharedRelayClient};
use relay_types::{BlockEvent, Chain, RelayError, RelayResult};
use serde::Serialize;

use crate::auth::{ApiKeyStore, RateLimiter};

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub url: String,
    pub success_rate: f64,
    pub in_backoff: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChainHealthSnapshot {
    pub chain: String,
    pub breaker_state: String,
    pub endpoints: Vec<EndpointSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub chains: Vec<ChainHealthSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub active_subscribers: usize,
    pub connected_relays: Vec<String>,
}

pub struct ChainContext {
    pub client: SharedRelayClient,
    pub health: Arc<EndpointHealth>,
    pub breaker: Arc<CircuitBreaker>,
    pub endpoints: Vec<url::Url>,
}

/// Everything a request handler needs to answer a query or serve a
/// subscription, keyed by the chain it targets.
pub struct RelayServerState {
    pub chains: HashMap<Chain, ChainContext>,
    pub cache: Arc<BlockCache>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Arc<RelayMetrics>,
    pub api_keys: Arc<ApiKeyStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

/// Query and admin operations the API layer needs; kept as a trait so the
/// route handlers in `http.rs` depend on behavior, not the concrete
/// `RelayServerState` shape.
#[async_trait]
pub trait RelayDataSource {
    async fn latest_block(&self, chain: Chain) -> RelayResult<BlockEvent>;
    async fn block_by_height(&self, chain: Chain, height: u64) -> RelayResult<BlockEvent>;
    async fn block_by_hash(&self, chain: Chain, hash: &str) -> RelayResult<BlockEvent>;
    async fn network_info(&self, chain: Chain) -> RelayResult<relay_core::chains::NetworkInfo>;
    fn health_snapshot(&self) -> HealthSnapshot;
    fn version_info(&self) -> VersionInfo;
    fn status_info(&self) -> StatusInfo;
}

#[async_trait]
impl RelayDataSource for RelayServerState {
    async fn latest_block(&self, chain: Chain) -> RelayResult<BlockEvent> {
        let ctx = self.chain_ctx(chain)?;
        let client = ctx.client.clone();
        ctx.breaker.call(|| async move { client.get_latest_block().await }).await
    }

    async fn block_by_height(&self, chain: Chain, height: u64) -> RelayResult<BlockEvent> {
        if let Some(cached) = self.cache.get_by_height(chain, height) {
            return Ok(cached);
        }
        let ctx = self.chain_ctx(chain)?;
        let client = ctx.client.clone();
        let event = ctx
            .breaker
            .call(|| async move { client.get_block_by_height(height).await })
            .await?;
        self.cache.insert(event.clone());
        Ok(event)
    }

    async fn block_by_hash(&self, chain: Chain, hash: &str) -> RelayResult<BlockEvent> {
        if let Some(cached) = self.cache.get_by_hash(chain, hash) {
            return Ok(cached);
        }
        let ctx = self.chain_ctx(chain)?;
        let client = ctx.client.clone();
        let hash = hash.to_string();
        let event = ctx
            .breaker
            .call(|| async move { client.get_block_by_hash(&hash).await })
            .await?;
        self.cache.insert(event.clone());
        Ok(event)
    }

    async fn network_info(&self, chain: Chain) -> RelayResult<relay_core::chains::NetworkInfo> {
        let ctx = self.chain_ctx(chain)?;
        let client = ctx.client.clone();
        ctx.breaker.call(|| async move { client.get_network_info().await }).await
    }

    fn health_snapshot(&self) -> HealthSnapshot {
        let chains = self
            .chains
            .iter()
            .map(|(chain, ctx)| ChainHealthSnapshot {
                chain: chain.to_string(),
                breaker_state: format!("{:?}", ctx.breaker.state()),
                endpoints: ctx
                    .endpoints
                    .iter()
                    .filter_map(|url| ctx.health.status(url).map(|s| EndpointSnapshot {
                        url: url.to_string(),
                        success_rate: s.success_rate(),
                        in_backoff: s.in_backoff(chrono::Utc::now()),
                    }))
                    .collect(),
            })
            .collect();
        HealthSnapshot { chains }
    }

    fn version_info(&self) -> VersionInfo {
        VersionInfo {
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    fn status_info(&self) -> StatusInfo {
        StatusInfo {
            active_subscribers: self.broadcaster.subscriber_count(),
            connected_relays: self
                .chains
                .iter()
                .filter(|(_, ctx)| ctx.client.is_connected())
                .map(|(chain, _)| chain.to_string())
                .collect(),
        }
    }
}

impl RelayServerState {
    fn chain_ctx(&self, chain: Chain) -> RelayResult<&ChainContext> {
        self.chains.get(&chain).ok_or(RelayError::EndpointUnavailable {
            chain: chain.to_string(),
        })
    }
}
