//! Layered configuration (C11): TOML file < `SPRINT_`-prefixed environment
//! variables (`__` as the nested separator) < CLI flags, generalized from
//! the sibling world-id relay's `Config::load`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use url::Url;

use relay_core::{BreakerConfig, HealthConfig};
use relay_types::Tier;

/// Opaque secrets never get a `Debug` impl that prints their value.
#[derive(Clone, Deserialize, Serialize, Default)]
pub struct Secret(pub String);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierOverride {
    pub write_deadline_ms: Option<u64>,
    pub rate_limit_per_hour: Option<u64>,
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThrottleSettings {
    #[serde(default = "default::min_success_rate")]
    pub min_success_rate: f64,
    #[serde(default = "default::initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default::max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default::backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default::health_window")]
    pub health_window: usize,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            min_success_rate: default::min_success_rate(),
            initial_backoff_secs: default::initial_backoff_secs(),
            max_backoff_secs: default::max_backoff_secs(),
            backoff_multiplier: default::backoff_multiplier(),
            health_window: default::health_window(),
        }
    }
}

impl From<&ThrottleSettings> for HealthConfig {
    fn from(t: &ThrottleSettings) -> Self {
        HealthConfig {
            min_success_rate: t.min_success_rate,
            initial_backoff: Duration::from_secs(t.initial_backoff_secs),
            max_backoff: Duration::from_secs(t.max_backoff_secs),
            backoff_multiplier: t.backoff_multiplier,
            health_window: t.health_window,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerSettings {
    #[serde(default = "default::max_failures")]
    pub max_failures: u32,
    #[serde(default = "default::reset_timeout_secs")]
    pub reset_timeout_secs: u64,
    #[serde(default = "default::half_open_max_calls")]
    pub half_open_max_calls: u32,
    #[serde(default = "default::call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default::failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default = "default::latency_threshold_ms")]
    pub latency_threshold_ms: u64,
    #[serde(default = "default::window_size")]
    pub window_size: usize,
    #[serde(default = "default::min_requests_threshold")]
    pub min_requests_threshold: usize,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: default::max_failures(),
            reset_timeout_secs: default::reset_timeout_secs(),
            half_open_max_calls: default::half_open_max_calls(),
            call_timeout_secs: default::call_timeout_secs(),
            failure_threshold: default::failure_threshold(),
            latency_threshold_ms: default::latency_threshold_ms(),
            window_size: default::window_size(),
            min_requests_threshold: default::min_requests_threshold(),
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(b: &BreakerSettings) -> Self {
        BreakerConfig {
            max_failures: b.max_failures,
            reset_timeout: Duration::from_secs(b.reset_timeout_secs),
            half_open_max_calls: b.half_open_max_calls,
            call_timeout: Duration::from_secs(b.call_timeout_secs),
            failure_threshold: b.failure_threshold,
            latency_threshold: Duration::from_millis(b.latency_threshold_ms),
            window_size: b.window_size,
            min_requests_threshold: b.min_requests_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeduperSettings {
    #[serde(default = "default::ttl_bitcoin_secs")]
    pub ttl_bitcoin_secs: u64,
    #[serde(default = "default::ttl_ethereum_secs")]
    pub ttl_ethereum_secs: u64,
    #[serde(default = "default::ttl_solana_secs")]
    pub ttl_solana_secs: u64,
    #[serde(default = "default::max_entries")]
    pub max_entries: usize,
}

impl Default for DeduperSettings {
    fn default() -> Self {
        Self {
            ttl_bitcoin_secs: default::ttl_bitcoin_secs(),
            ttl_ethereum_secs: default::ttl_ethereum_secs(),
            ttl_solana_secs: default::ttl_solana_secs(),
            max_entries: default::max_entries(),
        }
    }
}

impl From<&DeduperSettings> for relay_core::DeduperConfig {
    fn from(d: &DeduperSettings) -> Self {
        relay_core::DeduperConfig {
            ttl_bitcoin: Duration::from_secs(d.ttl_bitcoin_secs),
            ttl_ethereum: Duration::from_secs(d.ttl_ethereum_secs),
            ttl_solana: Duration::from_secs(d.ttl_solana_secs),
            max_entries: d.max_entries,
        }
    }
}

/// Top-level settings tree. Deserializable directly from the merged
/// TOML/env/CLI layers.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub tier: HashMap<String, TierOverride>,
    #[serde(default)]
    pub rpc_nodes: Vec<Url>,
    #[serde(default)]
    pub zmq_nodes: Vec<String>,
    #[serde(default)]
    pub ws_endpoints_eth: Vec<Url>,
    #[serde(default)]
    pub ws_endpoints_sol: Vec<Url>,
    pub rpc_user: Option<String>,
    pub rpc_pass: Option<Secret>,
    #[serde(default)]
    pub api_keys: Vec<Secret>,
    pub admin_key: Option<Secret>,
    #[serde(default = "default::api_host")]
    pub api_host: IpAddr,
    #[serde(default = "default::api_port")]
    pub api_port: u16,
    #[serde(default = "default::metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default::admin_port")]
    pub admin_port: u16,
    #[serde(default = "default::ws_port")]
    pub ws_port: u16,
    #[serde(default = "default::block_buffer_size")]
    pub block_buffer_size: usize,
    #[serde(default = "default::central_channel_size")]
    pub central_channel_size: usize,
    #[serde(default = "default::subscriber_buffer_floor")]
    pub subscriber_buffer_floor: usize,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub deduper: DeduperSettings,
    #[serde(default)]
    pub lock_os_thread: bool,
    pub max_cpu_cores: Option<usize>,
    #[serde(default)]
    pub mock_fast_blocks: bool,
}

impl Settings {
    /// Merges a TOML file (lowest precedence, optional), then
    /// `SPRINT_`-prefixed environment variables with `__` as the nested
    /// separator, on top of the defaults baked into each field's `serde`
    /// default. CLI overrides are applied by the caller after load.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("SPRINT")
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build()?;
        let settings: Settings = merged.try_deserialize()?;
        Ok(settings)
    }

    pub fn tier_config(&self, tier: Tier) -> relay_types::TierConfig {
        let mut cfg = tier.config();
        if let Some(over) = self.tier.get(tier.as_str()) {
            if let Some(ms) = over.write_deadline_ms {
                cfg.write_deadline = Duration::from_millis(ms);
            }
            if let Some(rate) = over.rate_limit_per_hour {
                cfg.rate_limit_per_hour = rate;
            }
            if let Some(size) = over.buffer_size {
                cfg.buffer_size = size;
            }
        }
        cfg
    }
}

mod default {
    use std::net::{IpAddr, Ipv4Addr};

    pub fn min_success_rate() -> f64 {
        0.90
    }
    pub fn initial_backoff_secs() -> u64 {
        10 * 60
    }
    pub fn max_backoff_secs() -> u64 {
        30 * 60
    }
    pub fn backoff_multiplier() -> f64 {
        1.5
    }
    pub fn health_window() -> usize {
        100
    }
    pub fn max_failures() -> u32 {
        5
    }
    pub fn reset_timeout_secs() -> u64 {
        30
    }
    pub fn half_open_max_calls() -> u32 {
        3
    }
    pub fn call_timeout_secs() -> u64 {
        30
    }
    pub fn failure_threshold() -> f64 {
        0.5
    }
    pub fn latency_threshold_ms() -> u64 {
        2_000
    }
    pub fn window_size() -> usize {
        50
    }
    pub fn min_requests_threshold() -> usize {
        10
    }
    pub fn ttl_bitcoin_secs() -> u64 {
        10 * 60
    }
    pub fn ttl_ethereum_secs() -> u64 {
        2 * 60
    }
    pub fn ttl_solana_secs() -> u64 {
        3 * 60
    }
    pub fn max_entries() -> usize {
        50_000
    }
    pub fn api_host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
    pub fn api_port() -> u16 {
        8080
    }
    pub fn metrics_port() -> u16 {
        9090
    }
    pub fn admin_port() -> u16 {
        8081
    }
    pub fn ws_port() -> u16 {
        8082
    }
    pub fn block_buffer_size() -> usize {
        1000
    }
    pub fn central_channel_size() -> usize {
        1500
    }
    pub fn subscriber_buffer_floor() -> usize {
        512
    }
}

/// CLI flags. Anything set here overrides the merged TOML/env settings.
#[derive(Debug, Parser)]
#[command(name = "relay-server", about = "Bitcoin Sprint multi-chain relay")]
pub struct Options {
    /// Path to a TOML config file, lowest-precedence layer.
    #[arg(long, env = "SPRINT_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "SPRINT_API_HOST")]
    pub api_host: Option<IpAddr>,

    #[arg(long, env = "SPRINT_API_PORT")]
    pub api_port: Option<u16>,

    #[arg(long, env = "SPRINT_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    #[arg(long, env = "SPRINT_WS_PORT")]
    pub ws_port: Option<u16>,

    #[arg(long, env = "SPRINT_MOCK_FAST_BLOCKS")]
    pub mock_fast_blocks: bool,

    #[arg(long, env = "SPRINT_LOCK_OS_THREAD")]
    pub lock_os_thread: bool,

    #[arg(long, env = "SPRINT_MAX_CPU_CORES")]
    pub max_cpu_cores: Option<usize>,
}

impl Options {
    /// Applies CLI overrides on top of the already-loaded layered settings.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(host) = self.api_host {
            settings.api_host = host;
        }
        if let Some(port) = self.api_port {
            settings.api_port = port;
        }
        if let Some(port) = self.metrics_port {
            settings.metrics_port = port;
        }
        if let Some(port) = self.ws_port {
            settings.ws_port = port;
        }
        if self.mock_fast_blocks {
            settings.mock_fast_blocks = true;
        }
        if self.lock_os_thread {
            settings.lock_os_thread = true;
        }
        if self.max_cpu_cores.is_some() {
            settings.max_cpu_cores = self.max_cpu_cores;
        }
        settings
    }
}
