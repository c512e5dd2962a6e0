//! Core-level tunables, independent of how they were loaded. `relay-api`
//! owns the layered file/env/CLI merge (C11) and builds one of these.

use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::health::HealthConfig;
use crate::ingestion::DEFAULT_CENTRAL_CHANNEL_SIZE;

/// Throttle knobs forwarded into [`HealthConfig`]; kept as a separate type
/// so the API crate's config layer has a stable, serializable shape to
/// deserialize from TOML/env without depending on `relay-core` internals.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub min_success_rate: f64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub health_window: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let defaults = HealthConfig::default();
        Self {
            min_success_rate: defaults.min_success_rate,
            initial_backoff: defaults.initial_backoff,
            max_backoff: defaults.max_backoff,
            backoff_multiplier: defaults.backoff_multiplier,
            health_window: defaults.health_window,
        }
    }
}

impl From<ThrottleConfig> for HealthConfig {
    fn from(t: ThrottleConfig) -> Self {
        HealthConfig {
            min_success_rate: t.min_success_rate,
            initial_backoff: t.initial_backoff,
            max_backoff: t.max_backoff,
            backoff_multiplier: t.backoff_multiplier,
            health_window: t.health_window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeduperConfig {
    pub ttl_bitcoin: Duration,
    pub ttl_ethereum: Duration,
    pub ttl_solana: Duration,
    pub max_entries: usize,
}

impl Default for DeduperConfig {
    fn default() -> Self {
        Self {
            ttl_bitcoin: relay_types::Chain::Bitcoin.default_dedup_ttl(),
            ttl_ethereum: relay_types::Chain::Ethereum.default_dedup_ttl(),
            ttl_solana: relay_types::Chain::Solana.default_dedup_ttl(),
            max_entries: 50_000,
        }
    }
}

impl DeduperConfig {
    pub fn ttl_for(&self, chain: relay_types::Chain) -> Duration {
        match chain {
            relay_types::Chain::Bitcoin => self.ttl_bitcoin,
            relay_types::Chain::Ethereum => self.ttl_ethereum,
            relay_types::Chain::Solana => self.ttl_solana,
        }
    }
}

/// Everything `relay-core` needs to stand up C1-C3, C5, C6, C10 for one
/// running relay instance.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub throttle: ThrottleConfig,
    pub breaker: BreakerConfig,
    pub deduper: DeduperConfig,
    pub central_channel_size: usize,
    pub cache_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottleConfig::default(),
            breaker: BreakerConfig::default(),
            deduper: DeduperConfig::default(),
            central_channel_size: DEFAULT_CENTRAL_CHANNEL_SIZE,
            cache_capacity: crate::cache::DEFAULT_CACHE_CAPACITY,
        }
    }
}
