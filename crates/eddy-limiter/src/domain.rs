//! Per-domain limiter state.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;

/// Circuit breaker state for one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; failures are counted.
    Closed,
    /// Fast-fail until the open deadline passes.
    Open,
    /// Bounded probing after the open deadline.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Mutable state for one domain, guarded by its shard's mutex.
#[derive(Debug)]
pub(crate) struct DomainState {
    pub tokens: f64,
    pub last_refill_ms: u64,
    pub fill_rate: f64,
    pub breaker: BreakerState,
    pub open_until_ms: u64,
    /// Current open duration; doubled (capped) each time half-open fails.
    pub open_duration_ms: u64,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub half_open_in_flight: u32,
    /// Sliding window of (timestamp_ms, ok) outcome samples.
    pub window: VecDeque<(u64, bool)>,
    pub last_activity_ms: u64,
}

impl DomainState {
    pub fn new(config: &RateLimitConfig, now_ms: u64) -> Self {
        Self {
            tokens: config.bucket_capacity,
            last_refill_ms: now_ms,
            fill_rate: config.initial_rps,
            breaker: BreakerState::Closed,
            open_until_ms: 0,
            open_duration_ms: config.open_duration.as_millis() as u64,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            window: VecDeque::new(),
            last_activity_ms: now_ms,
        }
    }

    /// Refill tokens for the elapsed interval, capped at capacity.
    pub fn refill(&mut self, now_ms: u64, capacity: f64) {
        let elapsed_s = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        if elapsed_s > 0.0 {
            self.tokens = (self.tokens + elapsed_s * self.fill_rate).min(capacity);
            self.last_refill_ms = now_ms;
        }
    }

    /// Record an outcome sample and drop everything older than the window.
    pub fn record_sample(&mut self, now_ms: u64, ok: bool, window_ms: u64) {
        self.window.push_back((now_ms, ok));
        let cutoff = now_ms.saturating_sub(window_ms);
        while matches!(self.window.front(), Some((ts, _)) if *ts < cutoff) {
            self.window.pop_front();
        }
    }

    /// Error rate over the retained window, with the sample count.
    pub fn window_error_rate(&self) -> (f64, usize) {
        let total = self.window.len();
        if total == 0 {
            return (0.0, 0);
        }
        let failures = self.window.iter().filter(|(_, ok)| !ok).count();
        (failures as f64 / total as f64, total)
    }

    /// Trip the breaker open until `now + open_duration`.
    pub fn trip_open(&mut self, now_ms: u64, max_open_ms: u64) {
        self.breaker = BreakerState::Open;
        self.open_until_ms = now_ms + self.open_duration_ms;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        // Next trip backs off further.
        self.open_duration_ms = (self.open_duration_ms * 2).min(max_open_ms);
    }

    /// Force the breaker open for an externally supplied duration
    /// (Retry-After); the doubling sequence is left untouched.
    pub fn force_open(&mut self, now_ms: u64, for_ms: u64) {
        self.breaker = BreakerState::Open;
        self.open_until_ms = self.open_until_ms.max(now_ms + for_ms);
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
    }

    /// Close the breaker and reset the backoff sequence.
    pub fn close(&mut self, config: &RateLimitConfig) {
        self.breaker = BreakerState::Closed;
        self.open_until_ms = 0;
        self.open_duration_ms = config.open_duration.as_millis() as u64;
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
        self.consecutive_failures = 0;
    }
}
