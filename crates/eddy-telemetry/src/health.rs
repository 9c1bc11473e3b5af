//! Health evaluation with TTL caching.

use crate::bus::{Event, EventBus};
use crate::policy::PolicyHandle;
use async_trait::async_trait;
use eddy_types::Clock;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

/// Component health, ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Unknown => "unknown",
        }
    }

    /// The worse of two states under Healthy > Degraded > Unhealthy > Unknown.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Result of one probe run.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub name: String,
    pub state: HealthState,
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Healthy,
            detail: None,
        }
    }

    pub fn with_state(name: impl Into<String>, state: HealthState, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state,
            detail: Some(detail.into()),
        }
    }
}

/// A pure function of engine state answering "how is this subsystem?".
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> ProbeResult;
}

/// Point-in-time health view.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub overall: HealthState,
    pub probes: Vec<ProbeResult>,
    /// Clock milliseconds at generation.
    pub generated_ms: u64,
    pub ttl: Duration,
}

struct Cached {
    snapshot: HealthSnapshot,
    at_ms: u64,
}

/// Runs probes concurrently, caches the snapshot for the policy's TTL, and
/// publishes a `health_change` event when the overall state transitions.
pub struct HealthEvaluator {
    probes: Vec<Arc<dyn HealthProbe>>,
    policy: PolicyHandle,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<EventBus>>,
    cached: Mutex<Option<Cached>>,
    last_overall: Mutex<Option<HealthState>>,
}

impl HealthEvaluator {
    pub fn new(
        probes: Vec<Arc<dyn HealthProbe>>,
        policy: PolicyHandle,
        clock: Arc<dyn Clock>,
        bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            probes,
            policy,
            clock,
            bus,
            cached: Mutex::new(None),
            last_overall: Mutex::new(None),
        }
    }

    /// Evaluate, returning the cached snapshot while it is fresh.
    pub async fn evaluate(&self) -> HealthSnapshot {
        let ttl = self.policy.load().health_ttl;
        let now = self.clock.now_ms();
        {
            let cached = lock(&self.cached);
            if let Some(cached) = cached.as_ref() {
                if now.saturating_sub(cached.at_ms) < ttl.as_millis() as u64 {
                    return cached.snapshot.clone();
                }
            }
        }

        let results =
            futures::future::join_all(self.probes.iter().map(|probe| probe.check())).await;
        let overall = results
            .iter()
            .map(|r| r.state)
            .fold(HealthState::Healthy, HealthState::worst);

        let snapshot = HealthSnapshot {
            overall,
            probes: results,
            generated_ms: now,
            ttl,
        };

        *lock(&self.cached) = Some(Cached {
            snapshot: snapshot.clone(),
            at_ms: now,
        });

        self.note_transition(overall);
        snapshot
    }

    fn note_transition(&self, current: HealthState) {
        let mut last = lock(&self.last_overall);
        let previous = last.replace(current);
        let Some(previous) = previous else {
            return;
        };
        if previous == current {
            return;
        }

        info!(
            previous = previous.as_str(),
            current = current.as_str(),
            "health state transition"
        );
        if let Some(bus) = &self.bus {
            let event = Event::new("health", "health_change")
                .with_field("previous", previous.as_str())
                .with_field("current", current.as_str());
            let _ = bus.publish(event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::TelemetryPolicy;
    use eddy_types::ManualClock;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering::Relaxed};

    fn ttl_policy(ttl: Duration) -> PolicyHandle {
        PolicyHandle::new(TelemetryPolicy {
            health_ttl: ttl,
            ..Default::default()
        })
    }

    struct FlipProbe {
        calls: AtomicUsize,
        /// 0 = healthy, 1 = degraded, 2 = unhealthy
        state: AtomicU8,
    }

    impl FlipProbe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                state: AtomicU8::new(0),
            })
        }

        fn set(&self, state: HealthState) {
            let v = match state {
                HealthState::Healthy => 0,
                HealthState::Degraded => 1,
                HealthState::Unhealthy => 2,
                HealthState::Unknown => 3,
            };
            self.state.store(v, Relaxed);
        }
    }

    #[async_trait]
    impl HealthProbe for FlipProbe {
        fn name(&self) -> &str {
            "flip"
        }

        async fn check(&self) -> ProbeResult {
            self.calls.fetch_add(1, Relaxed);
            let state = match self.state.load(Relaxed) {
                0 => HealthState::Healthy,
                1 => HealthState::Degraded,
                2 => HealthState::Unhealthy,
                _ => HealthState::Unknown,
            };
            ProbeResult::with_state("flip", state, "synthetic")
        }
    }

    #[tokio::test]
    async fn fresh_cache_is_reused() {
        let probe = FlipProbe::new();
        let clock = ManualClock::new(0);
        let evaluator = HealthEvaluator::new(
            vec![probe.clone()],
            ttl_policy(Duration::from_secs(5)),
            clock.clone(),
            None,
        );

        let first = evaluator.evaluate().await;
        let second = evaluator.evaluate().await;
        assert_eq!(probe.calls.load(Relaxed), 1);
        assert_eq!(first.generated_ms, second.generated_ms);

        clock.advance(6_000);
        evaluator.evaluate().await;
        assert_eq!(probe.calls.load(Relaxed), 2);
    }

    #[tokio::test]
    async fn overall_is_worst_probe_state() {
        struct Fixed(HealthState);
        #[async_trait]
        impl HealthProbe for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            async fn check(&self) -> ProbeResult {
                ProbeResult::with_state("fixed", self.0, "")
            }
        }

        let evaluator = HealthEvaluator::new(
            vec![
                Arc::new(Fixed(HealthState::Healthy)),
                Arc::new(Fixed(HealthState::Degraded)),
                Arc::new(Fixed(HealthState::Healthy)),
            ],
            ttl_policy(Duration::from_millis(1)),
            ManualClock::new(0),
            None,
        );
        let snapshot = evaluator.evaluate().await;
        assert_eq!(snapshot.overall, HealthState::Degraded);
        assert_eq!(snapshot.probes.len(), 3);
    }

    #[tokio::test]
    async fn transition_publishes_health_change() {
        let probe = FlipProbe::new();
        let clock = ManualClock::new(0);
        let bus = EventBus::new();
        let mut sub = bus.subscribe(8);
        let evaluator = HealthEvaluator::new(
            vec![probe.clone()],
            ttl_policy(Duration::from_millis(100)),
            clock.clone(),
            Some(bus),
        );

        evaluator.evaluate().await;
        probe.set(HealthState::Degraded);
        clock.advance(200);
        evaluator.evaluate().await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.name, "health_change");
        assert_eq!(event.fields.get("previous").unwrap(), "healthy");
        assert_eq!(event.fields.get("current").unwrap(), "degraded");
    }

    #[tokio::test]
    async fn unchanged_state_publishes_nothing() {
        let probe = FlipProbe::new();
        let clock = ManualClock::new(0);
        let bus = EventBus::new();
        let mut sub = bus.subscribe(8);
        let evaluator = HealthEvaluator::new(
            vec![probe],
            ttl_policy(Duration::from_millis(100)),
            clock.clone(),
            Some(bus),
        );

        evaluator.evaluate().await;
        clock.advance(200);
        evaluator.evaluate().await;
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn worst_follows_ordering() {
        assert_eq!(
            HealthState::Healthy.worst(HealthState::Degraded),
            HealthState::Degraded
        );
        assert_eq!(
            HealthState::Unhealthy.worst(HealthState::Degraded),
            HealthState::Unhealthy
        );
        assert_eq!(
            HealthState::Unknown.worst(HealthState::Unhealthy),
            HealthState::Unknown
        );
    }
}
