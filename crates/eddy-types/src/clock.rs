//! Clock abstraction for testability.
//!
//! Time-dependent subsystems (token refill, breaker cooldowns, health TTL,
//! checkpoint flush interval) take an `Arc<dyn Clock>` so tests can drive
//! time manually instead of sleeping.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Injectable clock: monotonic milliseconds plus an awaitable sleep.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds on a monotonically non-decreasing scale.
    fn now_ms(&self) -> u64;

    /// Suspend for the given duration.
    async fn sleep(&self, d: Duration);
}

/// System clock backed by a process-local monotonic base.
#[derive(Debug)]
pub struct RealClock {
    base: std::time::Instant,
}

impl RealClock {
    pub fn new() -> Self {
        Self {
            base: std::time::Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for RealClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.base.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

/// Manually advanced clock for deterministic tests.
///
/// `sleep` parks on a [`Notify`] until `advance` has moved the clock past
/// the wake deadline, so a test can step time without real waiting.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    tick: Notify,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(start_ms),
            tick: Notify::new(),
        })
    }

    /// Move the clock forward and wake all sleepers.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Relaxed);
        self.tick.notify_waiters();
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Relaxed);
        self.tick.notify_waiters();
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Relaxed)
    }

    async fn sleep(&self, d: Duration) {
        let deadline = self
            .now
            .load(Relaxed)
            .saturating_add(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        while self.now.load(Relaxed) < deadline {
            // Register interest before re-checking to avoid a missed wakeup.
            let notified = self.tick.notified();
            if self.now.load(Relaxed) >= deadline {
                break;
            }
            notified.await;
        }
    }
}
