//! Per-URL endpoint health and backoff tracking (C1).
//!
//! Grounded in the same shape as a reliability-scored peer table: each
//! endpoint accumulates a success/failure history and a backoff clock, and
//! callers pick the best candidate out of a set rather than hammering a
//! fixed primary.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_types::{RelayError, RelayResult};
use std::sync::Arc;
use url::Url;

use crate::metrics::RelayMetrics;

/// Tunables for [`EndpointHealth`]. Defaults match the documented table.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub min_success_rate: f64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Number of recent outcomes retained for `success_rate`.
    pub health_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_success_rate: 0.90,
            initial_backoff: Duration::from_secs(10 * 60),
            max_backoff: Duration::from_secs(30 * 60),
            backoff_multiplier: 1.5,
            health_window: 100,
        }
    }
}

/// Health state for a single endpoint URL. Mutated only through
/// `record_success` / `record_failure` on the owning [`EndpointHealth`].
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub url: Url,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub next_retry: Option<DateTime<Utc>>,
    pub current_backoff: Duration,
    /// Ring of recent outcomes (`true` = success), bounded by `health_window`.
    outcomes: VecDeque<bool>,
    consecutive_failures: u32,
}

impl EndpointStatus {
    fn new(url: Url, cfg: &HealthConfig) -> Self {
        Self {
            url,
            success_count: 0,
            failure_count: 0,
            last_success: None,
            last_failure: None,
            next_retry: None,
            current_backoff: cfg.initial_backoff,
            outcomes: VecDeque::with_capacity(cfg.health_window),
            consecutive_failures: 0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        successes as f64 / self.outcomes.len() as f64
    }

    pub fn in_backoff(&self, now: DateTime<Utc>) -> bool {
        self.next_retry.is_some_and(|retry| now < retry)
    }

    fn push_outcome(&mut self, ok: bool, window: usize) {
        self.outcomes.push_back(ok);
        while self.outcomes.len() > window {
            self.outcomes.pop_front();
        }
    }

    /// An endpoint is problematic once it has racked up 3+ consecutive
    /// failures, or its success rate has slipped under the configured floor.
    pub fn is_problematic(&self, cfg: &HealthConfig) -> bool {
        self.consecutive_failures >= 3 || self.success_rate() < cfg.min_success_rate
    }
}

/// Tracks health for every endpoint URL registered with it, independently
/// per chain.
pub struct EndpointHealth {
    cfg: HealthConfig,
    statuses: DashMap<Url, EndpointStatus>,
    metrics: Option<Arc<RelayMetrics>>,
}

impl EndpointHealth {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            statuses: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(cfg: HealthConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            cfg,
            statuses: DashMap::new(),
            metrics: Some(metrics),
        }
    }

    pub fn register(&self, url: Url) {
        self.statuses
            .entry(url.clone())
            .or_insert_with(|| EndpointStatus::new(url, &self.cfg));
    }

    pub fn record_success(&self, url: &Url) {
        let now = Utc::now();
        if let Some(mut status) = self.statuses.get_mut(url) {
            status.success_count += 1;
            status.last_success = Some(now);
            status.next_retry = None;
            status.current_backoff = self.cfg.initial_backoff;
            status.consecutive_failures = 0;
            status.push_outcome(true, self.cfg.health_window);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_endpoint_success(url.as_str());
        }
    }

    pub fn record_failure(&self, url: &Url) {
        let now = Utc::now();
        if let Some(mut status) = self.statuses.get_mut(url) {
            status.failure_count += 1;
            status.last_failure = Some(now);
            status.consecutive_failures += 1;
            let scaled = status.current_backoff.mul_f64(self.cfg.backoff_multiplier);
            status.current_backoff = scaled.min(self.cfg.max_backoff);
            status.next_retry = Some(now + status.current_backoff);
            status.push_outcome(false, self.cfg.health_window);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_endpoint_failure(url.as_str());
        }
    }

    pub fn is_healthy(&self, url: &Url) -> bool {
        match self.statuses.get(url) {
            Some(status) => {
                !status.in_backoff(Utc::now()) && status.success_rate() >= self.cfg.min_success_rate
            }
            None => false,
        }
    }

    pub fn reset(&self, url: &Url) {
        if let Some(mut status) = self.statuses.get_mut(url) {
            *status = EndpointStatus::new(url.clone(), &self.cfg);
        }
    }

    pub fn status(&self, url: &Url) -> Option<EndpointStatus> {
        self.statuses.get(url).map(|s| s.clone())
    }

    /// Returns the candidate with the highest reliability score among URLs
    /// whose backoff has elapsed, or `EndpointUnavailable` if every
    /// candidate is currently in backoff.
    pub fn pick_best(&self, candidates: &[Url], chain: &str) -> RelayResult<Url> {
        let now = Utc::now();
        let mut best: Option<(f64, Url)> = None;
        for url in candidates {
            self.register(url.clone());
            let status = self.statuses.get(url).expect("just registered");
            if status.in_backoff(now) {
                continue;
            }
            let score = self.score(&status, now);
            if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                best = Some((score, url.clone()));
            }
        }
        best.map(|(_, url)| url).ok_or_else(|| RelayError::EndpointUnavailable {
            chain: chain.to_string(),
        })
    }

    fn score(&self, status: &EndpointStatus, now: DateTime<Utc>) -> f64 {
        let rate = status.success_rate();
        let mut score = rate;
        if rate >= self.cfg.min_success_rate {
            score += 0.1;
        }
        if let Some(last_success) = status.last_success {
            let age = (now - last_success).num_seconds().max(0) as f64;
            let hour = 3_600.0;
            score += (1.0 - (age / hour).min(1.0)) * 0.05;
        }
        if let Some(last_failure) = status.last_failure {
            let age = (now - last_failure).num_seconds().max(0) as f64;
            let hour = 3_600.0;
            score -= (1.0 - (age / hour).min(1.0)) * 0.05;
        }
        score
    }
}

impl Clone for EndpointStatus {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            last_success: self.last_success,
            last_failure: self.last_failure,
            next_retry: self.next_retry,
            current_backoff: self.current_backoff,
            outcomes: self.outcomes.clone(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn backoff_grows_and_resets_on_success() {
        let health = EndpointHealth::new(HealthConfig::default());
        let u = url("https://node-a.example/rpc");
        health.register(u.clone());
        health.record_failure(&u);
        let after_one = health.status(&u).unwrap().current_backoff;
        health.record_failure(&u);
        let after_two = health.status(&u).unwrap().current_backoff;
        assert!(after_two > after_one);

        health.record_success(&u);
        let status = health.status(&u).unwrap();
        assert_eq!(status.current_backoff, HealthConfig::default().initial_backoff);
        assert!(status.next_retry.is_none());
    }

    #[test]
    fn pick_best_skips_backed_off_endpoints() {
        let health = EndpointHealth::new(HealthConfig::default());
        let good = url("https://good.example/rpc");
        let bad = url("https://bad.example/rpc");
        health.register(good.clone());
        health.register(bad.clone());
        health.record_failure(&bad);

        let chosen = health.pick_best(&[good.clone(), bad.clone()], "bitcoin").unwrap();
        assert_eq!(chosen, good);
    }

    #[test]
    fn pick_best_fails_when_all_in_backoff() {
        let health = EndpointHealth::new(HealthConfig::default());
        let only = url("https://only.example/rpc");
        health.register(only.clone());
        health.record_failure(&only);

        let err = health.pick_best(&[only], "ethereum").unwrap_err();
        assert!(matches!(err, RelayError::EndpointUnavailable { .. }));
    }

    #[test]
    fn problematic_after_three_consecutive_failures() {
        let health = EndpointHealth::new(HealthConfig::default());
        let u = url("https://flaky.example/rpc");
        health.register(u.clone());
        for _ in 0..3 {
            health.record_failure(&u);
        }
        let status = health.status(&u).unwrap();
        assert!(status.is_problematic(&HealthConfig::default()));
    }
}
