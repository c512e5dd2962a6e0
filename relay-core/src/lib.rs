//! Endpoint health, circuit breaking, deduplication, per-chain relays, and
//! tier-aware broadcast for the Bitcoin Sprint relay pipeline.
//!
//! This crate has no knowledge of HTTP or WebSockets; `relay-api` wires it
//! up behind a `tide`-family server.

pub mod breaker;
pub mod broadcaster;
pub mod cache;
pub mod chains;
pub mod config;
pub mod dedupe;
pub mod dispatcher;
pub mod health;
pub mod ingestion;
pub mod metrics;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use broadcaster::{Broadcaster, Subscriber, SubscriberHandle};
pub use cache::BlockCache;
pub use chains::{RelayClient, SharedRelayClient};
pub use config::{CoreConfig, DeduperConfig, ThrottleConfig};
pub use dedupe::Deduper;
pub use dispatcher::Dispatcher;
pub use health::{EndpointHealth, HealthConfig};
pub use ingestion::IngestionPipeline;
pub use metrics::RelayMetrics;
