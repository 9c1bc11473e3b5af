//! Built-in health probes over the engine's subsystems.
//!
//! Each probe is a pure function of a subsystem snapshot compared against
//! the current telemetry policy thresholds.

use async_trait::async_trait;
use eddy_limiter::RateLimiter;
use eddy_pipeline::PipelineMetrics;
use eddy_resources::ResourceManager;
use eddy_telemetry::{HealthProbe, HealthState, PolicyHandle, ProbeResult};
use std::sync::Arc;

/// Open-circuit count against the limiter thresholds.
pub struct LimiterProbe {
    pub limiter: Arc<RateLimiter>,
    pub policy: PolicyHandle,
}

#[async_trait]
impl HealthProbe for LimiterProbe {
    fn name(&self) -> &str {
        "rate_limiter"
    }

    async fn check(&self) -> ProbeResult {
        let policy = self.policy.load();
        let open = self.limiter.snapshot().open_circuits;
        let state = if open >= policy.limiter_unhealthy_open {
            HealthState::Unhealthy
        } else if open >= policy.limiter_degraded_open {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        ProbeResult::with_state("rate_limiter", state, format!("{open} open circuits"))
    }
}

/// Checkpoint queue depth against the resource thresholds.
pub struct ResourceProbe {
    pub resources: Arc<ResourceManager>,
    pub policy: PolicyHandle,
}

#[async_trait]
impl HealthProbe for ResourceProbe {
    fn name(&self) -> &str {
        "resources"
    }

    async fn check(&self) -> ProbeResult {
        let policy = self.policy.load();
        let queued = self.resources.stats().checkpoint_queued;
        let state = if queued >= policy.resource_unhealthy_checkpoint {
            HealthState::Unhealthy
        } else if queued >= policy.resource_degraded_checkpoint {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        ProbeResult::with_state("resources", state, format!("{queued} checkpoints queued"))
    }
}

/// Failure ratio of processed tasks, gated on a minimum sample count.
pub struct PipelineProbe {
    pub metrics: Arc<PipelineMetrics>,
    pub policy: PolicyHandle,
}

#[async_trait]
impl HealthProbe for PipelineProbe {
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn check(&self) -> ProbeResult {
        let policy = self.policy.load();
        let processed = self.metrics.total_processed();
        let failed = self.metrics.total_failed();
        let total = processed + failed;
        if total < policy.pipeline_min_samples {
            return ProbeResult::with_state(
                "pipeline",
                HealthState::Healthy,
                format!("{total} samples, below threshold"),
            );
        }
        let ratio = failed as f64 / total as f64;
        let state = if ratio >= policy.pipeline_unhealthy_ratio {
            HealthState::Unhealthy
        } else if ratio >= policy.pipeline_degraded_ratio {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        ProbeResult::with_state("pipeline", state, format!("failure ratio {ratio:.2}"))
    }
}
