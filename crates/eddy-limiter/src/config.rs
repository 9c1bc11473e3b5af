//! Rate limiter configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the adaptive limiter.
///
/// # Valid Ranges
/// - `min_rps` > 0 and ≤ `initial_rps` ≤ `max_rps`
/// - `bucket_capacity` ≥ 1.0
/// - `aimd_decrease` and `latency_degrade_factor` in (0.0, 1.0)
/// - `aimd_increase` > 0.0
/// - `error_rate_threshold` in (0.0, 1.0]
/// - `shard_count` is rounded up to a power of two by [`normalized`](Self::normalized)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch; a disabled limiter grants permits unconditionally.
    pub enabled: bool,
    /// Floor for the per-domain fill rate (requests per second).
    pub min_rps: f64,
    /// Ceiling for the per-domain fill rate.
    pub max_rps: f64,
    /// Fill rate assigned to a domain on first contact.
    pub initial_rps: f64,
    /// Token bucket capacity (burst size).
    pub bucket_capacity: f64,
    /// Additive increase applied on success (requests per second).
    pub aimd_increase: f64,
    /// Multiplicative decrease factor applied on errors.
    pub aimd_decrease: f64,
    /// Latency above this target triggers a multiplicative decrease.
    pub latency_target: Duration,
    /// Decrease factor used for latency degradation.
    pub latency_degrade_factor: f64,
    /// Error rate over the stats window that trips the breaker.
    pub error_rate_threshold: f64,
    /// Minimum samples in the window before the error rate can trip.
    pub min_samples_to_trip: usize,
    /// Consecutive failures that trip the breaker regardless of rate.
    pub consecutive_fail_threshold: u32,
    /// Sliding window over which error rates are computed.
    pub stats_window: Duration,
    /// Initial open duration; doubles on each half-open failure.
    pub open_duration: Duration,
    /// Cap for the doubled open duration.
    pub max_open_duration: Duration,
    /// Concurrent probes admitted while half-open.
    pub half_open_probes: u32,
    /// Consecutive half-open successes required to close.
    pub required_successes: u32,
    /// Base delay for fetch retry backoff.
    pub retry_base_delay: Duration,
    /// Cap for fetch retry backoff.
    pub retry_max_delay: Duration,
    /// Maximum fetch attempts (first try included).
    pub retry_max_attempts: u32,
    /// Number of shards; rounded up to a power of two.
    pub shard_count: usize,
    /// Idle domains are evicted after this long without activity.
    pub domain_ttl: Duration,
    /// Domains reported in the snapshot, most recently active first.
    pub snapshot_top_k: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_rps: 0.5,
            max_rps: 50.0,
            initial_rps: 5.0,
            bucket_capacity: 10.0,
            aimd_increase: 0.25,
            aimd_decrease: 0.5,
            latency_target: Duration::from_millis(1500),
            latency_degrade_factor: 0.8,
            error_rate_threshold: 0.5,
            min_samples_to_trip: 5,
            consecutive_fail_threshold: 5,
            stats_window: Duration::from_secs(30),
            open_duration: Duration::from_secs(10),
            max_open_duration: Duration::from_secs(300),
            half_open_probes: 2,
            required_successes: 3,
            retry_base_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(10),
            retry_max_attempts: 3,
            shard_count: 16,
            domain_ttl: Duration::from_secs(600),
            snapshot_top_k: 10,
        }
    }
}

impl RateLimitConfig {
    /// Validate mutual consistency of the knobs.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_rps <= 0.0 {
            return Err("rate limit min_rps must be > 0".into());
        }
        if self.max_rps < self.min_rps {
            return Err(format!(
                "rate limit max_rps ({}) must be >= min_rps ({})",
                self.max_rps, self.min_rps
            ));
        }
        if self.initial_rps < self.min_rps || self.initial_rps > self.max_rps {
            return Err(format!(
                "rate limit initial_rps ({}) must lie in [{}, {}]",
                self.initial_rps, self.min_rps, self.max_rps
            ));
        }
        if self.bucket_capacity < 1.0 {
            return Err("rate limit bucket_capacity must be >= 1".into());
        }
        if !(0.0..1.0).contains(&self.aimd_decrease) || self.aimd_decrease == 0.0 {
            return Err("rate limit aimd_decrease must be in (0, 1)".into());
        }
        if self.aimd_increase <= 0.0 {
            return Err("rate limit aimd_increase must be > 0".into());
        }
        if !(0.0..1.0).contains(&self.latency_degrade_factor) || self.latency_degrade_factor == 0.0
        {
            return Err("rate limit latency_degrade_factor must be in (0, 1)".into());
        }
        if self.error_rate_threshold <= 0.0 || self.error_rate_threshold > 1.0 {
            return Err("rate limit error_rate_threshold must be in (0, 1]".into());
        }
        if self.half_open_probes == 0 {
            return Err("rate limit half_open_probes must be > 0".into());
        }
        if self.required_successes == 0 {
            return Err("rate limit required_successes must be > 0".into());
        }
        if self.retry_max_attempts == 0 {
            return Err("rate limit retry_max_attempts must be > 0".into());
        }
        if self.shard_count == 0 {
            return Err("rate limit shard_count must be > 0".into());
        }
        if self.domain_ttl.is_zero() {
            return Err("rate limit domain_ttl must be > 0".into());
        }
        Ok(())
    }

    /// Copy with the shard count rounded up to a power of two.
    pub fn normalized(mut self) -> Self {
        self.shard_count = self.shard_count.max(1).next_power_of_two();
        self
    }
}
