//! Bootstrap entrypoint (C11): parse CLI opts, load layered settings, wire
//! C1-C10 together and serve the C8 HTTP/WS surface until signalled to stop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use relay_api::settings::{Options, Settings};
use relay_api::state::{ChainContext, RelayServerState};
use relay_api::ws::WsState;
use relay_api::{ApiKeyStore, RateLimiter};
use relay_core::chains::bitcoin::{BitcoinClient, BitcoinConfig};
use relay_core::chains::ethereum::EthereumClient;
use relay_core::chains::solana::SolanaClient;
use relay_core::chains::{RelayClient, SharedRelayClient};
use relay_core::{
    BreakerConfig, Broadcaster, CircuitBreaker, Deduper, Dispatcher, EndpointHealth, HealthConfig,
    IngestionPipeline, RelayMetrics,
};
use relay_core::cache::BlockCache;
use relay_core::ingestion::NoopMempoolHintSink;
use relay_types::{Chain, Tier};
use tokio_util::sync::CancellationToken;
use vbs::version::StaticVersionType;

/// Grace period allotted to in-flight ingestion draining after a shutdown
/// signal before the process exits regardless.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn parse_tier(raw: &str) -> Option<Tier> {
    Tier::ALL.iter().copied().find(|t| t.as_str() == raw)
}

/// `key:subject:tier`, e.g. `sk_live_abc:acme-corp:business`.
fn parse_api_key_entry(raw: &str) -> Option<(String, String, Tier)> {
    let mut parts = raw.splitn(3, ':');
    let key = parts.next()?.to_string();
    let subject = parts.next()?.to_string();
    let tier = parse_tier(parts.next()?)?;
    Some((key, subject, tier))
}

fn init_tracing() {
    let is_tty = atty_stdout();
    let filter = tracing_subscriber::EnvFilter::try_from_env("SPRINT_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if is_tty {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let opts = Options::parse();

    let settings = Settings::load(opts.config.as_deref())?;
    let settings = opts.apply(settings);

    init_tracing();

    let tuned = relay_api::tuner::apply(&settings);
    let runtime = relay_api::tuner::build_runtime(&tuned)?;
    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let metrics = Arc::new(RelayMetrics::new());
    let cache = Arc::new(BlockCache::new(settings.block_buffer_size));
    let deduper = Arc::new(Deduper::with_capacity(settings.deduper.max_entries));
    let broadcaster = Arc::new(Broadcaster::new(metrics.clone()));
    let dispatcher = Arc::new(Dispatcher::new(metrics.clone()));

    let health_cfg: HealthConfig = (&settings.throttle).into();
    let breaker_cfg: BreakerConfig = (&settings.breaker).into();

    let rpc_user = settings.rpc_user.clone().unwrap_or_default();
    let rpc_pass = settings.rpc_pass.clone().map(|s| s.0).unwrap_or_default();

    let bitcoin_health = Arc::new(EndpointHealth::with_metrics(health_cfg.clone(), metrics.clone()));
    let bitcoin_breaker = Arc::new(CircuitBreaker::with_metrics("bitcoin", breaker_cfg.clone(), metrics.clone()));
    for url in &settings.rpc_nodes {
        bitcoin_health.register(url.clone());
    }
    let bitcoin_client: SharedRelayClient = Arc::new(BitcoinClient::new(
        BitcoinConfig {
            rpc_url: settings
                .rpc_nodes
                .first()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "http://127.0.0.1:8332".to_string()),
            rpc_user,
            rpc_pass,
            zmq_endpoint: settings.zmq_nodes.first().cloned(),
            mock_fast_blocks: settings.mock_fast_blocks,
        },
        bitcoin_health.clone(),
        bitcoin_breaker.clone(),
    ));

    let ethereum_health = Arc::new(EndpointHealth::with_metrics(health_cfg.clone(), metrics.clone()));
    let ethereum_breaker = Arc::new(CircuitBreaker::with_metrics("ethereum", breaker_cfg.clone(), metrics.clone()));
    let ethereum_client: SharedRelayClient = Arc::new(EthereumClient::new(
        settings.ws_endpoints_eth.clone(),
        ethereum_health.clone(),
        ethereum_breaker.clone(),
    ));

    let solana_health = Arc::new(EndpointHealth::with_metrics(health_cfg.clone(), metrics.clone()));
    let solana_breaker = Arc::new(CircuitBreaker::with_metrics("solana", breaker_cfg.clone(), metrics.clone()));
    let solana_rpc_url = settings
        .ws_endpoints_sol
        .first()
        .map(|u| u.as_str().replacen("wss://", "https://", 1).replacen("ws://", "http://", 1))
        .unwrap_or_else(|| "http://127.0.0.1:8899".to_string());
    let solana_client: SharedRelayClient = Arc::new(SolanaClient::new(
        settings.ws_endpoints_sol.clone(),
        solana_rpc_url,
        solana_health.clone(),
        solana_breaker.clone(),
    ));

    let mut chains = HashMap::new();
    chains.insert(
        Chain::Bitcoin,
        ChainContext {
            client: bitcoin_client.clone(),
            health: bitcoin_health,
            breaker: bitcoin_breaker,
            endpoints: settings.rpc_nodes.clone(),
        },
    );
    chains.insert(
        Chain::Ethereum,
        ChainContext {
            client: ethereum_client.clone(),
            health: ethereum_health,
            breaker: ethereum_breaker,
            endpoints: settings.ws_endpoints_eth.clone(),
        },
    );
    chains.insert(
        Chain::Solana,
        ChainContext {
            client: solana_client.clone(),
            health: solana_health,
            breaker: solana_breaker,
            endpoints: settings.ws_endpoints_sol.clone(),
        },
    );

    let api_key_entries = settings
        .api_keys
        .iter()
        .filter_map(|s| parse_api_key_entry(&s.0))
        .collect::<Vec<_>>();
    let api_keys = Arc::new(ApiKeyStore::new(api_key_entries));
    let rate_limiter = Arc::new(RateLimiter::new());

    let deduper_cfg: relay_core::DeduperConfig = (&settings.deduper).into();
    let ingestion = Arc::new(IngestionPipeline::with_deduper_config(
        settings.central_channel_size,
        deduper,
        deduper_cfg,
        metrics.clone(),
        Arc::new(NoopMempoolHintSink),
    ));

    let root_ctx = CancellationToken::new();

    let mut relay_tasks = tokio::task::JoinSet::new();
    for (chain, ctx) in &chains {
        let client = ctx.client.clone();
        let sender = ingestion.sender();
        let ctx_token = root_ctx.child_token();
        let chain = *chain;
        relay_tasks.spawn(async move {
            let mut attempt = 0u32;
            loop {
                if ctx_token.is_cancelled() {
                    return;
                }
                match client.connect(ctx_token.clone()).await {
                    Ok(()) => {
                        attempt = 0;
                        if let Err(err) = client.stream_blocks(ctx_token.clone(), sender.clone()).await {
                            tracing::warn!(%chain, error = %err, "relay stream ended");
                        }
                        client.disconnect().await;
                    }
                    Err(err) => {
                        tracing::warn!(%chain, error = %err, "relay connect failed");
                    }
                }
                if ctx_token.is_cancelled() {
                    return;
                }
                let backoff = relay_core::chains::jittered_backoff(attempt, false);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(backoff).await;
            }
        });
    }

    let ingestion_handle = {
        let ingestion = ingestion.clone();
        let broadcaster = broadcaster.clone();
        let cache = cache.clone();
        let chains_for_prefetch: HashMap<Chain, SharedRelayClient> = chains
            .iter()
            .map(|(chain, ctx)| (*chain, ctx.client.clone()))
            .collect();
        let ctx_token = root_ctx.child_token();
        tokio::spawn(async move {
            ingestion
                .run(ctx_token, broadcaster, cache, move |chain| chains_for_prefetch.get(&chain).cloned())
                .await;
        })
    };

    let state = RelayServerState {
        chains,
        cache: cache.clone(),
        broadcaster: broadcaster.clone(),
        metrics: metrics.clone(),
        api_keys: api_keys.clone(),
        rate_limiter: rate_limiter.clone(),
        started_at: Instant::now(),
    };

    let ws_state = WsState {
        broadcaster: broadcaster.clone(),
        cache: cache.clone(),
        dispatcher,
        metrics: metrics.clone(),
        api_keys,
        rate_limiter,
    };

    let mut rest_app = relay_api::http::build_app(state)?;
    let ws_server = relay_api::ws::build_ws_server(ws_state.clone());
    let metrics_server = relay_api::ws::build_metrics_server(ws_state);

    let api_addr = SocketAddr::new(settings.api_host, settings.api_port);
    let ws_addr = SocketAddr::new(settings.api_host, settings.ws_port);
    let metrics_addr = SocketAddr::new(settings.api_host, settings.metrics_port);

    let api_url: url::Url = format!("http://{api_addr}").parse()?;

    tracing::info!(%api_url, %ws_addr, %metrics_addr, "serving relay");

    tokio::select! {
        res = rest_app.serve(api_url, relay_api::http::ApiVer::instance()) => {
            if let Err(err) = res {
                tracing::error!(%err, "rest server exited");
            }
        }
        res = ws_server.listen(ws_addr.to_string()) => {
            if let Err(err) = res {
                tracing::error!(%err, "ws server exited");
            }
        }
        res = metrics_server.listen(metrics_addr.to_string()) => {
            if let Err(err) = res {
                tracing::error!(%err, "metrics server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    root_ctx.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, ingestion_handle).await;
    relay_tasks.shutdown().await;

    Ok(())
}
