//! Backend-agnostic metrics interface.
//!
//! Subsystems record through [`Counter`]/[`Gauge`]/[`Histogram`]/[`Timer`]
//! handles produced by a [`Provider`]. Three interchangeable backends:
//! [`noop`] (always available, the default), `prom` and `otel` behind cargo
//! features. Each backend carries a [`guard::CardinalityGuard`] that warns
//! once per metric when label cardinality runs away.

pub mod guard;
pub mod noop;
#[cfg(feature = "otel")]
pub mod otel;
#[cfg(feature = "prom")]
pub mod prom;

use std::sync::Arc;
use std::time::Duration;

/// Identity and shape of one metric.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub namespace: String,
    pub subsystem: String,
    pub name: String,
    pub help: String,
    /// Label names; instruments receive values positionally.
    pub labels: Vec<String>,
}

impl MetricSpec {
    pub fn new(subsystem: &str, name: &str, help: &str) -> Self {
        Self {
            namespace: "eddy".into(),
            subsystem: subsystem.into(),
            name: name.into(),
            help: help.into(),
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Fully qualified metric name.
    pub fn full_name(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.subsystem, self.name)
    }
}

/// Monotonically increasing value.
pub trait Counter: Send + Sync {
    fn inc(&self, labels: &[&str]);
    fn add(&self, value: u64, labels: &[&str]);
}

/// Point-in-time value.
pub trait Gauge: Send + Sync {
    fn set(&self, value: f64, labels: &[&str]);
    fn add(&self, delta: f64, labels: &[&str]);
}

/// Distribution of observed values.
pub trait Histogram: Send + Sync {
    fn observe(&self, value: f64, labels: &[&str]);
}

/// Duration recorder; backends typically map onto a histogram in seconds.
pub trait Timer: Send + Sync {
    fn record(&self, duration: Duration, labels: &[&str]);
}

/// Produces instruments for one backend.
pub trait Provider: Send + Sync {
    fn counter(&self, spec: MetricSpec) -> Arc<dyn Counter>;
    fn gauge(&self, spec: MetricSpec) -> Arc<dyn Gauge>;
    fn histogram(&self, spec: MetricSpec) -> Arc<dyn Histogram>;
    fn timer(&self, spec: MetricSpec) -> Arc<dyn Timer>;

    /// Text exposition for backends that have one (Prometheus).
    fn exposition(&self) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str;
}
