//! Sharded adaptive rate limiter.

use crate::config::RateLimitConfig;
use crate::domain::{BreakerState, DomainState};
use eddy_types::hash::fnv32;
use eddy_types::Clock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Why `acquire` refused to grant a permit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// The domain's circuit breaker is open (or half-open and saturated).
    #[error("circuit open for {domain}")]
    CircuitOpen { domain: String },
    /// The domain key was empty.
    #[error("empty domain key")]
    InvalidDomain,
}

/// Outcome record fed back after each fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Feedback {
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: bool,
    pub retry_after: Option<Duration>,
}

/// Point-in-time view of one domain for the snapshot.
#[derive(Debug, Clone)]
pub struct DomainSnapshot {
    pub domain: String,
    pub fill_rate: f64,
    pub breaker: BreakerState,
    pub last_activity_ms: u64,
}

/// Aggregate limiter statistics.
#[derive(Debug, Clone, Default)]
pub struct LimiterSnapshot {
    pub total_requests: u64,
    pub throttled: u64,
    pub denied: u64,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
    /// Most recently active domains, capped at the configured top-K.
    pub domains: Vec<DomainSnapshot>,
}

/// Permit guard; for half-open probes, dropping releases the probe slot.
pub struct Permit {
    probe: Option<ProbeRelease>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

struct ProbeRelease {
    limiter: Arc<RateLimiter>,
    domain: String,
}

impl Drop for ProbeRelease {
    fn drop(&mut self) {
        self.limiter.release_probe(&self.domain);
    }
}

#[derive(Default)]
struct Totals {
    requests: AtomicU64,
    throttled: AtomicU64,
    denied: AtomicU64,
}

enum Decision {
    Granted { probe: bool },
    Denied,
    Wait(Duration),
}

/// Adaptive per-domain rate limiter.
///
/// Domain state lives in a fixed power-of-two shard array; a shard's mutex
/// is only ever held for pointer-chasing work, never across an await. The
/// deficit wait happens outside the lock, and a token is consumed only at
/// grant time, which makes `acquire` safe to cancel by dropping the future.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    shards: Vec<Mutex<HashMap<String, DomainState>>>,
    totals: Totals,
    shutdown_tx: watch::Sender<bool>,
    eviction_task: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Build the limiter and start its eviction loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let config = config.normalized();
        let shard_count = config.shard_count;
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let limiter = Arc::new(Self {
            config,
            clock,
            shards,
            totals: Totals::default(),
            shutdown_tx,
            eviction_task: Mutex::new(None),
        });

        if limiter.config.enabled {
            let task = tokio::spawn(Self::eviction_loop(Arc::clone(&limiter), shutdown_rx));
            *lock_ignore_poison(&limiter.eviction_task) = Some(task);
        }

        limiter
    }

    /// Acquire a permit for one fetch against `domain`.
    ///
    /// Suspends while the domain's bucket is empty; fails in O(1) with
    /// [`AcquireError::CircuitOpen`] while the breaker is open.
    pub async fn acquire(self: &Arc<Self>, domain: &str) -> Result<Permit, AcquireError> {
        if domain.is_empty() {
            return Err(AcquireError::InvalidDomain);
        }
        if !self.config.enabled {
            return Ok(Permit { probe: None });
        }

        self.totals.requests.fetch_add(1, Relaxed);
        let mut throttle_counted = false;

        loop {
            let decision = self.decide(domain);
            match decision {
                Decision::Granted { probe } => {
                    let probe = probe.then(|| ProbeRelease {
                        limiter: Arc::clone(self),
                        domain: domain.to_string(),
                    });
                    return Ok(Permit { probe });
                }
                Decision::Denied => {
                    self.totals.denied.fetch_add(1, Relaxed);
                    return Err(AcquireError::CircuitOpen {
                        domain: domain.to_string(),
                    });
                }
                Decision::Wait(wait) => {
                    if !throttle_counted {
                        self.totals.throttled.fetch_add(1, Relaxed);
                        throttle_counted = true;
                    }
                    self.clock.sleep(wait).await;
                }
            }
        }
    }

    fn decide(&self, domain: &str) -> Decision {
        let shard = self.shard_for(domain);
        let mut map = lock_ignore_poison(shard);
        let now = self.clock.now_ms();
        let st = map
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(&self.config, now));
        st.last_activity_ms = now;

        if st.breaker == BreakerState::Open {
            if now < st.open_until_ms {
                return Decision::Denied;
            }
            debug!(domain, "breaker open deadline passed, probing");
            st.breaker = BreakerState::HalfOpen;
            st.half_open_successes = 0;
            st.half_open_in_flight = 0;
        }

        if st.breaker == BreakerState::HalfOpen {
            if st.half_open_in_flight >= self.config.half_open_probes {
                return Decision::Denied;
            }
            st.half_open_in_flight += 1;
            return Decision::Granted { probe: true };
        }

        st.refill(now, self.config.bucket_capacity);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            Decision::Granted { probe: false }
        } else {
            let deficit = 1.0 - st.tokens;
            let rate = st.fill_rate.max(self.config.min_rps);
            Decision::Wait(Duration::from_secs_f64(deficit / rate))
        }
    }

    /// Adapt the domain's rate and breaker from one fetch outcome.
    pub fn feedback(&self, domain: &str, fb: Feedback) {
        if !self.config.enabled || domain.is_empty() {
            return;
        }

        let shard = self.shard_for(domain);
        let mut map = lock_ignore_poison(shard);
        let now = self.clock.now_ms();
        let st = map
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(&self.config, now));
        st.last_activity_ms = now;

        let too_many = fb.status == Some(429);
        let failure = fb.error || too_many || matches!(fb.status, Some(s) if s >= 500);
        let window_ms = self.config.stats_window.as_millis() as u64;
        st.record_sample(now, !failure, window_ms);

        let max_open_ms = self.config.max_open_duration.as_millis() as u64;
        if failure {
            st.fill_rate = (st.fill_rate * self.config.aimd_decrease).max(self.config.min_rps);
            st.consecutive_failures = st.consecutive_failures.saturating_add(1);

            match fb.retry_after {
                Some(after) if too_many && !after.is_zero() => {
                    let after_ms = after.as_millis() as u64;
                    warn!(domain, retry_after_ms = after_ms, "honoring Retry-After, opening breaker");
                    st.force_open(now, after_ms);
                }
                _ => match st.breaker {
                    BreakerState::HalfOpen => {
                        debug!(domain, "half-open probe failed, reopening");
                        st.trip_open(now, max_open_ms);
                    }
                    BreakerState::Closed => {
                        let (rate, samples) = st.window_error_rate();
                        let rate_trip = samples >= self.config.min_samples_to_trip
                            && rate >= self.config.error_rate_threshold;
                        let consec_trip =
                            st.consecutive_failures >= self.config.consecutive_fail_threshold;
                        if rate_trip || consec_trip {
                            warn!(
                                domain,
                                error_rate = rate,
                                consecutive = st.consecutive_failures,
                                "tripping breaker open"
                            );
                            st.trip_open(now, max_open_ms);
                        }
                    }
                    BreakerState::Open => {}
                },
            }
        } else {
            st.consecutive_failures = 0;
            if st.breaker == BreakerState::HalfOpen {
                st.half_open_successes += 1;
                if st.half_open_successes >= self.config.required_successes {
                    debug!(domain, "half-open probes succeeded, closing breaker");
                    st.close(&self.config);
                }
            }
            if fb.latency > self.config.latency_target {
                st.fill_rate =
                    (st.fill_rate * self.config.latency_degrade_factor).max(self.config.min_rps);
            } else {
                st.fill_rate = (st.fill_rate + self.config.aimd_increase).min(self.config.max_rps);
            }
        }
    }

    /// Aggregate totals plus the top-K most recently active domains.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let mut domains = Vec::new();
        let mut open = 0;
        let mut half_open = 0;

        for shard in &self.shards {
            let map = lock_ignore_poison(shard);
            for (domain, st) in map.iter() {
                match st.breaker {
                    BreakerState::Open => open += 1,
                    BreakerState::HalfOpen => half_open += 1,
                    BreakerState::Closed => {}
                }
                domains.push(DomainSnapshot {
                    domain: domain.clone(),
                    fill_rate: st.fill_rate,
                    breaker: st.breaker,
                    last_activity_ms: st.last_activity_ms,
                });
            }
        }

        domains.sort_by(|a, b| b.last_activity_ms.cmp(&a.last_activity_ms));
        domains.truncate(self.config.snapshot_top_k);

        LimiterSnapshot {
            total_requests: self.totals.requests.load(Relaxed),
            throttled: self.totals.throttled.load(Relaxed),
            denied: self.totals.denied.load(Relaxed),
            open_circuits: open,
            half_open_circuits: half_open,
            domains,
        }
    }

    /// Current fill rate for a domain, if tracked.
    pub fn fill_rate(&self, domain: &str) -> Option<f64> {
        let map = lock_ignore_poison(self.shard_for(domain));
        map.get(domain).map(|st| st.fill_rate)
    }

    /// Current breaker state for a domain, if tracked.
    pub fn breaker_state(&self, domain: &str) -> Option<BreakerState> {
        let map = lock_ignore_poison(self.shard_for(domain));
        map.get(domain).map(|st| st.breaker)
    }

    /// Stop the eviction loop. Idempotent.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = lock_ignore_poison(&self.eviction_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn release_probe(&self, domain: &str) {
        let mut map = lock_ignore_poison(self.shard_for(domain));
        if let Some(st) = map.get_mut(domain) {
            st.half_open_in_flight = st.half_open_in_flight.saturating_sub(1);
        }
    }

    fn shard_for(&self, domain: &str) -> &Mutex<HashMap<String, DomainState>> {
        let index = fnv32(domain) as usize & (self.shards.len() - 1);
        &self.shards[index]
    }

    async fn eviction_loop(limiter: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = limiter.config.domain_ttl / 2;
        loop {
            tokio::select! {
                _ = limiter.clock.sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
            limiter.evict_idle();
        }
    }

    fn evict_idle(&self) {
        let ttl_ms = self.config.domain_ttl.as_millis() as u64;
        let now = self.clock.now_ms();
        let mut evicted = 0usize;
        for shard in &self.shards {
            let mut map = lock_ignore_poison(shard);
            let before = map.len();
            map.retain(|_, st| {
                st.half_open_in_flight > 0 || now.saturating_sub(st.last_activity_ms) < ttl_ms
            });
            evicted += before - map.len();
        }
        if evicted > 0 {
            debug!(evicted, "evicted idle domain state");
        }
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_types::ManualClock;

    fn limiter_with(config: RateLimitConfig) -> (Arc<RateLimiter>, Arc<ManualClock>) {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(config, clock.clone());
        (limiter, clock)
    }

    fn failure(status: u16) -> Feedback {
        Feedback {
            status: Some(status),
            latency: Duration::from_millis(10),
            error: false,
            retry_after: None,
        }
    }

    fn success() -> Feedback {
        Feedback {
            status: Some(200),
            latency: Duration::from_millis(10),
            error: false,
            retry_after: None,
        }
    }

    #[tokio::test]
    async fn grants_within_burst_capacity() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            bucket_capacity: 3.0,
            ..Default::default()
        });
        for _ in 0..3 {
            limiter.acquire("example.com").await.unwrap();
        }
        let snap = limiter.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.throttled, 0);
        limiter.close().await;
    }

    #[tokio::test]
    async fn waits_when_bucket_is_empty() {
        let (limiter, clock) = limiter_with(RateLimitConfig {
            bucket_capacity: 1.0,
            initial_rps: 1.0,
            min_rps: 0.5,
            ..Default::default()
        });
        limiter.acquire("example.com").await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire("example.com").await })
        };
        tokio::task::yield_now().await;
        // One token refills after one second at 1 rps.
        clock.advance(1100);
        waiter.await.unwrap().unwrap();

        assert_eq!(limiter.snapshot().throttled, 1);
        limiter.close().await;
    }

    #[tokio::test]
    async fn disabled_limiter_grants_unconditionally() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            enabled: false,
            ..Default::default()
        });
        for _ in 0..100 {
            limiter.acquire("example.com").await.unwrap();
        }
        assert_eq!(limiter.snapshot().total_requests, 0);
    }

    #[tokio::test]
    async fn empty_domain_is_rejected() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::default());
        assert_eq!(
            limiter.acquire("").await.unwrap_err(),
            AcquireError::InvalidDomain
        );
        limiter.close().await;
    }

    #[tokio::test]
    async fn consecutive_failures_trip_breaker() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            consecutive_fail_threshold: 3,
            min_samples_to_trip: 100,
            ..Default::default()
        });
        limiter.acquire("bad.example").await.unwrap();
        for _ in 0..3 {
            limiter.feedback("bad.example", failure(500));
        }
        assert_eq!(
            limiter.breaker_state("bad.example"),
            Some(BreakerState::Open)
        );

        let err = limiter.acquire("bad.example").await.unwrap_err();
        assert!(matches!(err, AcquireError::CircuitOpen { .. }));
        assert!(limiter.snapshot().denied >= 1);
        assert_eq!(limiter.snapshot().open_circuits, 1);
        limiter.close().await;
    }

    #[tokio::test]
    async fn open_breaker_denies_without_blocking() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            consecutive_fail_threshold: 1,
            ..Default::default()
        });
        limiter.feedback("bad.example", failure(503));
        // Denial must resolve immediately even though the clock never moves.
        let err = limiter.acquire("bad.example").await.unwrap_err();
        assert!(matches!(err, AcquireError::CircuitOpen { .. }));
        limiter.close().await;
    }

    #[tokio::test]
    async fn breaker_recovers_through_half_open() {
        let config = RateLimitConfig {
            consecutive_fail_threshold: 2,
            open_duration: Duration::from_millis(100),
            required_successes: 2,
            half_open_probes: 2,
            ..Default::default()
        };
        let (limiter, clock) = limiter_with(config);

        limiter.feedback("flaky.example", failure(500));
        limiter.feedback("flaky.example", failure(500));
        assert_eq!(
            limiter.breaker_state("flaky.example"),
            Some(BreakerState::Open)
        );

        clock.advance(150);
        let _probe = limiter.acquire("flaky.example").await.unwrap();
        assert_eq!(
            limiter.breaker_state("flaky.example"),
            Some(BreakerState::HalfOpen)
        );

        limiter.feedback("flaky.example", success());
        limiter.feedback("flaky.example", success());
        assert_eq!(
            limiter.breaker_state("flaky.example"),
            Some(BreakerState::Closed)
        );
        limiter.close().await;
    }

    #[tokio::test]
    async fn half_open_failure_reopens_with_doubled_duration() {
        let config = RateLimitConfig {
            consecutive_fail_threshold: 1,
            open_duration: Duration::from_millis(100),
            ..Default::default()
        };
        let (limiter, clock) = limiter_with(config);

        limiter.feedback("flaky.example", failure(500));
        clock.advance(150);
        let _probe = limiter.acquire("flaky.example").await.unwrap();
        limiter.feedback("flaky.example", failure(500));
        assert_eq!(
            limiter.breaker_state("flaky.example"),
            Some(BreakerState::Open)
        );

        // First reopen used the doubled (200ms) duration.
        clock.advance(150);
        assert!(limiter.acquire("flaky.example").await.is_err());
        clock.advance(100);
        assert!(limiter.acquire("flaky.example").await.is_ok());
        limiter.close().await;
    }

    #[tokio::test]
    async fn half_open_probe_quota_is_enforced() {
        let config = RateLimitConfig {
            consecutive_fail_threshold: 1,
            open_duration: Duration::from_millis(50),
            half_open_probes: 1,
            ..Default::default()
        };
        let (limiter, clock) = limiter_with(config);

        limiter.feedback("flaky.example", failure(500));
        clock.advance(100);

        let probe = limiter.acquire("flaky.example").await.unwrap();
        // Second concurrent probe is denied.
        assert!(limiter.acquire("flaky.example").await.is_err());
        // Releasing the probe slot admits the next one.
        drop(probe);
        assert!(limiter.acquire("flaky.example").await.is_ok());
        limiter.close().await;
    }

    #[tokio::test]
    async fn retry_after_forces_breaker_open() {
        let (limiter, clock) = limiter_with(RateLimitConfig::default());
        limiter.feedback(
            "busy.example",
            Feedback {
                status: Some(429),
                latency: Duration::from_millis(5),
                error: false,
                retry_after: Some(Duration::from_secs(30)),
            },
        );
        assert_eq!(
            limiter.breaker_state("busy.example"),
            Some(BreakerState::Open)
        );
        clock.advance(29_000);
        assert!(limiter.acquire("busy.example").await.is_err());
        clock.advance(2_000);
        assert!(limiter.acquire("busy.example").await.is_ok());
        limiter.close().await;
    }

    #[tokio::test]
    async fn fill_rate_stays_within_bounds() {
        let config = RateLimitConfig {
            min_rps: 1.0,
            max_rps: 4.0,
            initial_rps: 2.0,
            ..Default::default()
        };
        let (limiter, _clock) = limiter_with(config.clone());

        for _ in 0..50 {
            limiter.feedback("example.com", success());
        }
        let rate = limiter.fill_rate("example.com").unwrap();
        assert!(rate <= config.max_rps);

        for _ in 0..50 {
            limiter.feedback("example.com", failure(500));
        }
        let rate = limiter.fill_rate("example.com").unwrap();
        assert!(rate >= config.min_rps);
        limiter.close().await;
    }

    #[tokio::test]
    async fn success_increases_rate_monotonically() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::default());
        limiter.feedback("example.com", success());
        let first = limiter.fill_rate("example.com").unwrap();
        limiter.feedback("example.com", success());
        let second = limiter.fill_rate("example.com").unwrap();
        assert!(second >= first);
        limiter.close().await;
    }

    #[tokio::test]
    async fn slow_responses_degrade_rate() {
        let (limiter, _clock) = limiter_with(RateLimitConfig {
            latency_target: Duration::from_millis(100),
            ..Default::default()
        });
        limiter.feedback("slow.example", success());
        let before = limiter.fill_rate("slow.example").unwrap();
        limiter.feedback(
            "slow.example",
            Feedback {
                status: Some(200),
                latency: Duration::from_secs(5),
                error: false,
                retry_after: None,
            },
        );
        let after = limiter.fill_rate("slow.example").unwrap();
        assert!(after < before);
        limiter.close().await;
    }

    #[tokio::test]
    async fn eviction_drops_idle_domains() {
        let config = RateLimitConfig {
            domain_ttl: Duration::from_millis(200),
            ..Default::default()
        };
        let (limiter, clock) = limiter_with(config);
        limiter.acquire("old.example").await.unwrap();

        clock.advance(500);
        limiter.evict_idle();
        assert!(limiter.fill_rate("old.example").is_none());
        limiter.close().await;
    }

    #[tokio::test]
    async fn snapshot_orders_domains_by_recency() {
        let (limiter, clock) = limiter_with(RateLimitConfig::default());
        limiter.acquire("first.example").await.unwrap();
        clock.advance(10);
        limiter.acquire("second.example").await.unwrap();

        let snap = limiter.snapshot();
        assert_eq!(snap.domains[0].domain, "second.example");
        assert_eq!(snap.domains[1].domain, "first.example");
        limiter.close().await;
    }
}
