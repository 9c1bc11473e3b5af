//! Prometheus metrics backend (`prom` feature).

use super::guard::CardinalityGuard;
use super::{Counter, Gauge, Histogram, MetricSpec, Provider, Timer};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Prometheus-backed provider with its own registry and text exposition.
pub struct PromProvider {
    registry: Registry,
}

impl PromProvider {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    fn opts(spec: &MetricSpec) -> Opts {
        Opts::new(spec.name.clone(), spec.help.clone())
            .namespace(spec.namespace.clone())
            .subsystem(spec.subsystem.clone())
    }

    fn label_refs(spec: &MetricSpec) -> Vec<&str> {
        spec.labels.iter().map(String::as_str).collect()
    }
}

impl Default for PromProvider {
    fn default() -> Self {
        Self::new()
    }
}

struct PromCounter {
    vec: IntCounterVec,
    guard: CardinalityGuard,
}

impl Counter for PromCounter {
    fn inc(&self, labels: &[&str]) {
        self.guard.observe(labels);
        if let Ok(metric) = self.vec.get_metric_with_label_values(labels) {
            metric.inc();
        }
    }

    fn add(&self, value: u64, labels: &[&str]) {
        self.guard.observe(labels);
        if let Ok(metric) = self.vec.get_metric_with_label_values(labels) {
            metric.inc_by(value);
        }
    }
}

struct PromGauge {
    vec: GaugeVec,
    guard: CardinalityGuard,
}

impl Gauge for PromGauge {
    fn set(&self, value: f64, labels: &[&str]) {
        self.guard.observe(labels);
        if let Ok(metric) = self.vec.get_metric_with_label_values(labels) {
            metric.set(value);
        }
    }

    fn add(&self, delta: f64, labels: &[&str]) {
        self.guard.observe(labels);
        if let Ok(metric) = self.vec.get_metric_with_label_values(labels) {
            metric.add(delta);
        }
    }
}

struct PromHistogram {
    vec: HistogramVec,
    guard: CardinalityGuard,
}

impl Histogram for PromHistogram {
    fn observe(&self, value: f64, labels: &[&str]) {
        self.guard.observe(labels);
        if let Ok(metric) = self.vec.get_metric_with_label_values(labels) {
            metric.observe(value);
        }
    }
}

impl Timer for PromHistogram {
    fn record(&self, duration: Duration, labels: &[&str]) {
        self.observe(duration.as_secs_f64(), labels);
    }
}

impl Provider for PromProvider {
    fn counter(&self, spec: MetricSpec) -> Arc<dyn Counter> {
        let vec = IntCounterVec::new(Self::opts(&spec), &Self::label_refs(&spec))
            .unwrap_or_else(|e| panic!("invalid counter spec {}: {e}", spec.full_name()));
        if let Err(err) = self.registry.register(Box::new(vec.clone())) {
            warn!(metric = %spec.full_name(), error = %err, "duplicate metric registration");
        }
        Arc::new(PromCounter {
            vec,
            guard: CardinalityGuard::new(spec.full_name()),
        })
    }

    fn gauge(&self, spec: MetricSpec) -> Arc<dyn Gauge> {
        let vec = GaugeVec::new(Self::opts(&spec), &Self::label_refs(&spec))
            .unwrap_or_else(|e| panic!("invalid gauge spec {}: {e}", spec.full_name()));
        if let Err(err) = self.registry.register(Box::new(vec.clone())) {
            warn!(metric = %spec.full_name(), error = %err, "duplicate metric registration");
        }
        Arc::new(PromGauge {
            vec,
            guard: CardinalityGuard::new(spec.full_name()),
        })
    }

    fn histogram(&self, spec: MetricSpec) -> Arc<dyn Histogram> {
        let opts = HistogramOpts::from(Self::opts(&spec));
        let vec = HistogramVec::new(opts, &Self::label_refs(&spec))
            .unwrap_or_else(|e| panic!("invalid histogram spec {}: {e}", spec.full_name()));
        if let Err(err) = self.registry.register(Box::new(vec.clone())) {
            warn!(metric = %spec.full_name(), error = %err, "duplicate metric registration");
        }
        Arc::new(PromHistogram {
            vec,
            guard: CardinalityGuard::new(spec.full_name()),
        })
    }

    fn timer(&self, spec: MetricSpec) -> Arc<dyn Timer> {
        let opts = HistogramOpts::from(Self::opts(&spec));
        let vec = HistogramVec::new(opts, &Self::label_refs(&spec))
            .unwrap_or_else(|e| panic!("invalid timer spec {}: {e}", spec.full_name()));
        if let Err(err) = self.registry.register(Box::new(vec.clone())) {
            warn!(metric = %spec.full_name(), error = %err, "duplicate metric registration");
        }
        Arc::new(PromHistogram {
            vec,
            guard: CardinalityGuard::new(spec.full_name()),
        })
    }

    fn exposition(&self) -> Option<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return None;
        }
        String::from_utf8(buffer).ok()
    }

    fn name(&self) -> &'static str {
        "prom"
    }
}
