//! Circuit breaker guarding a single named upstream call (C2).
//!
//! The sliding window is count-bucketed: it retains the outcomes of the
//! last `window_size` calls regardless of when they occurred, mirroring
//! the fixed-size ring buffers used elsewhere in this pipeline (the
//! deduper, the health tracker) rather than a time-bucketed window.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_types::{RelayError, RelayResult};
use std::sync::Arc;
use tokio::time::timeout;

use crate::metrics::RelayMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
    ForceOpen,
    ForceClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Error,
    Latency,
    Resource,
    Circuit,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub half_open_max_calls: u32,
    pub call_timeout: Duration,
    pub failure_threshold: f64,
    pub latency_threshold: Duration,
    pub window_size: usize,
    pub min_requests_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            call_timeout: Duration::from_secs(10),
            failure_threshold: 0.5,
            latency_threshold: Duration::from_secs(2),
            window_size: 50,
            min_requests_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    ok: bool,
    latency: Duration,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_inflight: u32,
    last_state_change: DateTime<Utc>,
    window: VecDeque<Outcome>,
}

/// A named circuit breaker. Cheap to clone handles of, internally locked.
pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
    metrics: Option<Arc<RelayMetrics>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: BreakerConfig) -> Self {
        Self::build(name, cfg, None)
    }

    pub fn with_metrics(name: impl Into<String>, cfg: BreakerConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self::build(name, cfg, Some(metrics))
    }

    fn build(name: impl Into<String>, cfg: BreakerConfig, metrics: Option<Arc<RelayMetrics>>) -> Self {
        let window_capacity = cfg.window_size;
        Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_inflight: 0,
                last_state_change: Utc::now(),
                window: VecDeque::with_capacity(window_capacity),
            }),
            metrics,
        }
    }

    fn note_transition(&self, to_state: BreakerState) {
        if let Some(metrics) = &self.metrics {
            metrics.record_breaker_transition(&self.name, &format!("{to_state:?}").to_lowercase());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn force_open(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = BreakerState::ForceOpen;
            inner.last_state_change = Utc::now();
        }
        self.note_transition(BreakerState::ForceOpen);
    }

    pub fn force_close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = BreakerState::ForceClose;
            inner.last_state_change = Utc::now();
        }
        self.note_transition(BreakerState::ForceClose);
    }

    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = BreakerState::Closed;
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.half_open_inflight = 0;
            inner.window.clear();
            inner.last_state_change = Utc::now();
        }
        self.note_transition(BreakerState::Closed);
    }

    /// Runs `call` guarded by the breaker. Rejects immediately without
    /// touching the upstream when open or force-open.
    pub async fn call<F, Fut, T>(&self, call: F) -> RelayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = RelayResult<T>>,
    {
        self.maybe_transition_open_to_half_open();

        {
            let mut inner = self.inner.lock();
            match inner.state {
                BreakerState::Open | BreakerState::ForceOpen => {
                    return Err(RelayError::CircuitOpen {
                        name: self.name.clone(),
                    });
                }
                BreakerState::HalfOpen => {
                    if inner.half_open_inflight >= self.cfg.half_open_max_calls {
                        return Err(RelayError::CircuitOpen {
                            name: self.name.clone(),
                        });
                    }
                    inner.half_open_inflight += 1;
                }
                BreakerState::Closed | BreakerState::ForceClose => {}
            }
        }

        let started = std::time::Instant::now();
        let outcome = timeout(self.cfg.call_timeout, call()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.record(true, elapsed);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(false, elapsed);
                Err(err)
            }
            Err(_) => {
                self.record(false, elapsed);
                Err(RelayError::Timeout {
                    millis: self.cfg.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    fn maybe_transition_open_to_half_open(&self) {
        let transitioned = {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::Open {
                let elapsed = Utc::now() - inner.last_state_change;
                if elapsed.to_std().unwrap_or(Duration::ZERO) >= self.cfg.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_inflight = 0;
                    inner.consecutive_successes = 0;
                    inner.last_state_change = Utc::now();
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };
        if transitioned {
            self.note_transition(BreakerState::HalfOpen);
        }
    }

    fn record(&self, ok: bool, latency: Duration) {
        let mut transitioned_to = None;
        {
            let mut inner = self.inner.lock();
            if inner.state == BreakerState::HalfOpen {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
            }

            inner.window.push_back(Outcome { ok, latency });
            while inner.window.len() > self.cfg.window_size {
                inner.window.pop_front();
            }

            match inner.state {
                BreakerState::ForceOpen | BreakerState::ForceClose => {}
                BreakerState::HalfOpen => {
                    if ok {
                        inner.consecutive_successes += 1;
                        if inner.consecutive_successes >= self.cfg.half_open_max_calls {
                            inner.state = BreakerState::Closed;
                            inner.consecutive_failures = 0;
                            inner.last_state_change = Utc::now();
                            transitioned_to = Some(BreakerState::Closed);
                        }
                    } else {
                        inner.state = BreakerState::Open;
                        inner.consecutive_failures += 1;
                        inner.last_state_change = Utc::now();
                        transitioned_to = Some(BreakerState::Open);
                    }
                }
                BreakerState::Open => {}
                BreakerState::Closed => {
                    if ok {
                        inner.consecutive_failures = 0;
                    } else {
                        inner.consecutive_failures += 1;
                    }

                    let trip_on_consecutive = inner.consecutive_failures >= self.cfg.max_failures;
                    let trip_on_window = inner.window.len() >= self.cfg.min_requests_threshold && {
                        let failures = inner.window.iter().filter(|o| !o.ok).count();
                        let failure_rate = failures as f64 / inner.window.len() as f64;
                        let p95 = p95_latency(&inner.window);
                        failure_rate >= self.cfg.failure_threshold || p95 >= self.cfg.latency_threshold
                    };

                    if trip_on_consecutive || trip_on_window {
                        inner.state = BreakerState::Open;
                        inner.last_state_change = Utc::now();
                        transitioned_to = Some(BreakerState::Open);
                    }
                }
            }
        }

        if let Some(to_state) = transitioned_to {
            self.note_transition(to_state);
        }
    }
}

fn p95_latency(window: &VecDeque<Outcome>) -> Duration {
    if window.is_empty() {
        return Duration::ZERO;
    }
    let mut latencies: Vec<Duration> = window.iter().map(|o| o.latency).collect();
    latencies.sort();
    let idx = ((latencies.len() as f64) * 0.95).ceil() as usize;
    latencies[idx.saturating_sub(1).min(latencies.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok() -> RelayResult<u32> {
        Ok(1)
    }

    async fn fail() -> RelayResult<u32> {
        Err(RelayError::Upstream("boom".into()))
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cfg = BreakerConfig {
            max_failures: 3,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("test", cfg);
        for _ in 0..3 {
            let _ = breaker.call(|| fail()).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let err = breaker.call(|| ok()).await.unwrap_err();
        assert!(matches!(err, RelayError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn half_open_closes_after_enough_successes() {
        let cfg = BreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_millis(0),
            half_open_max_calls: 2,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("test", cfg);
        let _ = breaker.call(|| fail()).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.call(|| ok()).await.unwrap();
        breaker.call(|| ok()).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_reopens_on_failure() {
        let cfg = BreakerConfig {
            max_failures: 1,
            reset_timeout: Duration::from_millis(0),
            half_open_max_calls: 2,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("test", cfg);
        let _ = breaker.call(|| fail()).await;
        let _ = breaker.call(|| fail()).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn force_open_rejects_regardless_of_history() {
        let breaker = CircuitBreaker::new("test", BreakerConfig::default());
        breaker.force_open();
        let err = breaker.call(|| ok()).await.unwrap_err();
        assert!(matches!(err, RelayError::CircuitOpen { .. }));
    }
}
