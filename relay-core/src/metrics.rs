//! Metrics (C9): counters and histograms exported via the `prometheus`
//! crate's default text registry.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use relay_types::{Chain, Tier};

pub struct RelayMetrics {
    registry: Registry,
    events_ingested: IntCounterVec,
    events_deduped: IntCounterVec,
    central_channel_drops: IntCounterVec,
    broadcaster_skips: IntCounterVec,
    broadcaster_overwrites: IntCounterVec,
    endpoint_successes: IntCounterVec,
    endpoint_failures: IntCounterVec,
    breaker_transitions: IntCounterVec,
    dispatcher_deadline_misses: IntCounterVec,
    relay_time_ms: HistogramVec,
    dispatcher_latency_ms: HistogramVec,
    subscribers_active: IntGauge,
}

impl RelayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_ingested = IntCounterVec::new(
            Opts::new("relay_events_ingested_total", "Block events ingested per chain"),
            &["chain"],
        )
        .unwrap();
        let events_deduped = IntCounterVec::new(
            Opts::new("relay_events_deduped_total", "Block events suppressed as duplicates"),
            &["chain"],
        )
        .unwrap();
        let central_channel_drops = IntCounterVec::new(
            Opts::new("relay_central_channel_drops_total", "Events dropped because the central channel was full"),
            &["chain"],
        )
        .unwrap();
        let broadcaster_skips = IntCounterVec::new(
            Opts::new("relay_broadcaster_skips_total", "Subscriber deliveries skipped due to a full buffer"),
            &["tier"],
        )
        .unwrap();
        let broadcaster_overwrites = IntCounterVec::new(
            Opts::new("relay_broadcaster_overwrites_total", "Subscriber buffer overwrites (turbo/enterprise only)"),
            &["tier"],
        )
        .unwrap();
        let endpoint_successes = IntCounterVec::new(
            Opts::new("relay_endpoint_successes_total", "Successful upstream calls per endpoint"),
            &["url"],
        )
        .unwrap();
        let endpoint_failures = IntCounterVec::new(
            Opts::new("relay_endpoint_failures_total", "Failed upstream calls per endpoint"),
            &["url"],
        )
        .unwrap();
        let breaker_transitions = IntCounterVec::new(
            Opts::new("relay_breaker_transitions_total", "Circuit breaker state transitions"),
            &["name", "to_state"],
        )
        .unwrap();
        let dispatcher_deadline_misses = IntCounterVec::new(
            Opts::new("relay_dispatcher_deadline_misses_total", "Dispatcher deliveries that exceeded their tier deadline"),
            &["tier"],
        )
        .unwrap();
        let relay_time_ms = HistogramVec::new(
            HistogramOpts::new("relay_time_ms", "Ingestion-to-broadcast latency in milliseconds"),
            &["chain"],
        )
        .unwrap();
        let dispatcher_latency_ms = HistogramVec::new(
            HistogramOpts::new("relay_dispatcher_latency_ms", "Per-tier dispatcher delivery latency in milliseconds"),
            &["tier"],
        )
        .unwrap();
        let subscribers_active = IntGauge::new("relay_subscribers_active", "Currently active subscribers").unwrap();

        for collector in [
            Box::new(events_ingested.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(events_deduped.clone()),
            Box::new(central_channel_drops.clone()),
            Box::new(broadcaster_skips.clone()),
            Box::new(broadcaster_overwrites.clone()),
            Box::new(endpoint_successes.clone()),
            Box::new(endpoint_failures.clone()),
            Box::new(breaker_transitions.clone()),
            Box::new(dispatcher_deadline_misses.clone()),
            Box::new(relay_time_ms.clone()),
            Box::new(dispatcher_latency_ms.clone()),
            Box::new(subscribers_active.clone()),
        ] {
            registry.register(collector).expect("metric names must not collide");
        }

        Self {
            registry,
            events_ingested,
            events_deduped,
            central_channel_drops,
            broadcaster_skips,
            broadcaster_overwrites,
            endpoint_successes,
            endpoint_failures,
            breaker_transitions,
            dispatcher_deadline_misses,
            relay_time_ms,
            dispatcher_latency_ms,
            subscribers_active,
        }
    }

    pub fn record_ingested(&self, chain: Chain, relay_time_ms: Option<u64>) {
        self.events_ingested.with_label_values(&[chain.as_str()]).inc();
        if let Some(ms) = relay_time_ms {
            self.relay_time_ms.with_label_values(&[chain.as_str()]).observe(ms as f64);
        }
    }

    pub fn record_deduped(&self, chain: Chain) {
        self.events_deduped.with_label_values(&[chain.as_str()]).inc();
    }

    pub fn record_central_channel_drop(&self, chain: Chain) {
        self.central_channel_drops.with_label_values(&[chain.as_str()]).inc();
    }

    pub fn broadcaster_skip(&self, tier: Tier) {
        self.broadcaster_skips.with_label_values(&[tier.as_str()]).inc();
    }

    pub fn broadcaster_overwrite(&self, tier: Tier) {
        self.broadcaster_overwrites.with_label_values(&[tier.as_str()]).inc();
    }

    pub fn record_endpoint_success(&self, url: &str) {
        self.endpoint_successes.with_label_values(&[url]).inc();
    }

    pub fn record_endpoint_failure(&self, url: &str) {
        self.endpoint_failures.with_label_values(&[url]).inc();
    }

    pub fn record_breaker_transition(&self, name: &str, to_state: &str) {
        self.breaker_transitions.with_label_values(&[name, to_state]).inc();
    }

    pub fn record_dispatcher_deadline_miss(&self, tier: Tier) {
        self.dispatcher_deadline_misses.with_label_values(&[tier.as_str()]).inc();
    }

    pub fn record_dispatcher_latency(&self, tier: Tier, millis: f64) {
        self.dispatcher_latency_ms.with_label_values(&[tier.as_str()]).observe(millis);
    }

    pub fn set_subscribers_active(&self, count: i64) {
        self.subscribers_active.set(count);
    }

    /// Renders every registered collector in Prometheus text exposition
    /// format, for the `/metrics` endpoint.
    pub fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .expect("prometheus text encoding is infallible for well-formed metrics");
        String::from_utf8(buffer).expect("prometheus text encoder emits valid utf-8")
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = RelayMetrics::new();
        metrics.record_ingested(Chain::Bitcoin, Some(12));
        let text = metrics.render();
        assert!(text.contains("relay_events_ingested_total"));
        assert!(text.contains("relay_time_ms"));
    }
}
