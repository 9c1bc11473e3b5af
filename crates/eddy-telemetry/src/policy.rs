//! Telemetry policy: thresholds and buffer sizes, swapped atomically.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Immutable telemetry tuning. Updated as a whole via [`PolicyHandle`];
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPolicy {
    /// How long a health snapshot stays cached.
    pub health_ttl: Duration,
    /// Open circuits at which the limiter probe reports degraded.
    pub limiter_degraded_open: usize,
    /// Open circuits at which the limiter probe reports unhealthy.
    pub limiter_unhealthy_open: usize,
    /// Checkpoint queue depth at which resources report degraded.
    pub resource_degraded_checkpoint: usize,
    /// Checkpoint queue depth at which resources report unhealthy.
    pub resource_unhealthy_checkpoint: usize,
    /// Minimum processed tasks before the pipeline ratio probe engages.
    pub pipeline_min_samples: u64,
    /// Failure ratio at which the pipeline reports degraded.
    pub pipeline_degraded_ratio: f64,
    /// Failure ratio at which the pipeline reports unhealthy.
    pub pipeline_unhealthy_ratio: f64,
    /// Percentage of traces to sample, 0–100.
    pub trace_sample_percent: u8,
    /// Default per-subscriber event buffer.
    pub event_buffer: usize,
}

impl Default for TelemetryPolicy {
    fn default() -> Self {
        Self {
            health_ttl: Duration::from_secs(5),
            limiter_degraded_open: 1,
            limiter_unhealthy_open: 5,
            resource_degraded_checkpoint: 512,
            resource_unhealthy_checkpoint: 1024,
            pipeline_min_samples: 20,
            pipeline_degraded_ratio: 0.2,
            pipeline_unhealthy_ratio: 0.5,
            trace_sample_percent: 10,
            event_buffer: 256,
        }
    }
}

impl TelemetryPolicy {
    /// Clamp out-of-range values into their valid domains.
    pub fn normalize(mut self) -> Self {
        if self.health_ttl.is_zero() {
            self.health_ttl = Duration::from_millis(1);
        }
        if self.limiter_unhealthy_open < self.limiter_degraded_open {
            self.limiter_unhealthy_open = self.limiter_degraded_open;
        }
        if self.resource_unhealthy_checkpoint < self.resource_degraded_checkpoint {
            self.resource_unhealthy_checkpoint = self.resource_degraded_checkpoint;
        }
        self.pipeline_degraded_ratio = self.pipeline_degraded_ratio.clamp(0.0, 1.0);
        self.pipeline_unhealthy_ratio = self
            .pipeline_unhealthy_ratio
            .clamp(self.pipeline_degraded_ratio, 1.0);
        self.trace_sample_percent = self.trace_sample_percent.min(100);
        self.event_buffer = self.event_buffer.max(1);
        self
    }
}

/// Shared handle to the current policy.
///
/// Readers clone an `Arc` under a read lock held for nanoseconds; writers
/// swap the whole `Arc`. Existing readers keep the value they loaded, which
/// is the immutability contract callers rely on.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<TelemetryPolicy>>>,
}

impl PolicyHandle {
    pub fn new(policy: TelemetryPolicy) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(policy.normalize()))),
        }
    }

    /// Load the current policy.
    pub fn load(&self) -> Arc<TelemetryPolicy> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new policy; `None` restores normalized defaults.
    pub fn update(&self, policy: Option<TelemetryPolicy>) {
        let next = Arc::new(policy.unwrap_or_default().normalize());
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::new(TelemetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_ratios_and_percent() {
        let policy = TelemetryPolicy {
            pipeline_degraded_ratio: -0.5,
            pipeline_unhealthy_ratio: 7.0,
            trace_sample_percent: 250,
            event_buffer: 0,
            health_ttl: Duration::ZERO,
            ..Default::default()
        }
        .normalize();

        assert_eq!(policy.pipeline_degraded_ratio, 0.0);
        assert_eq!(policy.pipeline_unhealthy_ratio, 1.0);
        assert_eq!(policy.trace_sample_percent, 100);
        assert_eq!(policy.event_buffer, 1);
        assert!(!policy.health_ttl.is_zero());
    }

    #[test]
    fn normalize_orders_thresholds() {
        let policy = TelemetryPolicy {
            limiter_degraded_open: 10,
            limiter_unhealthy_open: 2,
            ..Default::default()
        }
        .normalize();
        assert!(policy.limiter_unhealthy_open >= policy.limiter_degraded_open);
    }

    #[test]
    fn update_none_restores_defaults() {
        let handle = PolicyHandle::default();
        handle.update(Some(TelemetryPolicy {
            trace_sample_percent: 99,
            ..Default::default()
        }));
        assert_eq!(handle.load().trace_sample_percent, 99);

        handle.update(None);
        assert_eq!(*handle.load(), TelemetryPolicy::default().normalize());
    }

    #[test]
    fn readers_keep_their_loaded_value() {
        let handle = PolicyHandle::default();
        let before = handle.load();
        handle.update(Some(TelemetryPolicy {
            trace_sample_percent: 1,
            ..Default::default()
        }));
        // The previously loaded Arc is unaffected by the swap.
        assert_eq!(before.trace_sample_percent, 10);
        assert_eq!(handle.load().trace_sample_percent, 1);
    }
}
