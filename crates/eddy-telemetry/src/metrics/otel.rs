//! OpenTelemetry metrics backend (`otel` feature).
//!
//! Records through the global meter provider; the host decides where the
//! readings go by installing an SDK pipeline.

use super::guard::CardinalityGuard;
use super::{Counter, Gauge, Histogram, MetricSpec, Provider, Timer};
use opentelemetry::metrics::Meter;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;

/// Provider backed by the globally installed OpenTelemetry meter.
pub struct OtelProvider {
    meter: Meter,
}

impl OtelProvider {
    pub fn new() -> Self {
        Self {
            meter: opentelemetry::global::meter("eddy"),
        }
    }
}

impl Default for OtelProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn attributes(spec_labels: &[String], values: &[&str]) -> Vec<KeyValue> {
    spec_labels
        .iter()
        .zip(values.iter())
        .map(|(name, value)| KeyValue::new(name.clone(), value.to_string()))
        .collect()
}

struct OtelCounter {
    inner: opentelemetry::metrics::Counter<u64>,
    labels: Vec<String>,
    guard: CardinalityGuard,
}

impl Counter for OtelCounter {
    fn inc(&self, labels: &[&str]) {
        self.add(1, labels);
    }

    fn add(&self, value: u64, labels: &[&str]) {
        self.guard.observe(labels);
        self.inner.add(value, &attributes(&self.labels, labels));
    }
}

struct OtelGauge {
    inner: opentelemetry::metrics::Gauge<f64>,
    labels: Vec<String>,
    guard: CardinalityGuard,
}

impl Gauge for OtelGauge {
    fn set(&self, value: f64, labels: &[&str]) {
        self.guard.observe(labels);
        self.inner.record(value, &attributes(&self.labels, labels));
    }

    fn add(&self, delta: f64, labels: &[&str]) {
        // The OTel gauge API is record-only; additive updates degrade to a
        // plain record of the delta.
        self.set(delta, labels);
    }
}

struct OtelHistogram {
    inner: opentelemetry::metrics::Histogram<f64>,
    labels: Vec<String>,
    guard: CardinalityGuard,
}

impl Histogram for OtelHistogram {
    fn observe(&self, value: f64, labels: &[&str]) {
        self.guard.observe(labels);
        self.inner.record(value, &attributes(&self.labels, labels));
    }
}

impl Timer for OtelHistogram {
    fn record(&self, duration: Duration, labels: &[&str]) {
        self.observe(duration.as_secs_f64(), labels);
    }
}

impl Provider for OtelProvider {
    fn counter(&self, spec: MetricSpec) -> Arc<dyn Counter> {
        let inner = self
            .meter
            .u64_counter(spec.full_name())
            .with_description(spec.help.clone())
            .init();
        Arc::new(OtelCounter {
            inner,
            guard: CardinalityGuard::new(spec.full_name()),
            labels: spec.labels,
        })
    }

    fn gauge(&self, spec: MetricSpec) -> Arc<dyn Gauge> {
        let inner = self
            .meter
            .f64_gauge(spec.full_name())
            .with_description(spec.help.clone())
            .init();
        Arc::new(OtelGauge {
            inner,
            guard: CardinalityGuard::new(spec.full_name()),
            labels: spec.labels,
        })
    }

    fn histogram(&self, spec: MetricSpec) -> Arc<dyn Histogram> {
        let inner = self
            .meter
            .f64_histogram(spec.full_name())
            .with_description(spec.help.clone())
            .init();
        Arc::new(OtelHistogram {
            inner,
            guard: CardinalityGuard::new(spec.full_name()),
            labels: spec.labels,
        })
    }

    fn timer(&self, spec: MetricSpec) -> Arc<dyn Timer> {
        let inner = self
            .meter
            .f64_histogram(spec.full_name())
            .with_description(spec.help.clone())
            .init();
        Arc::new(OtelHistogram {
            inner,
            guard: CardinalityGuard::new(spec.full_name()),
            labels: spec.labels,
        })
    }

    fn name(&self) -> &'static str {
        "otel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruments_accept_recordings_without_an_sdk() {
        // Without an installed SDK pipeline the global meter is a no-op,
        // which is exactly what construction-time smoke tests need.
        let provider = OtelProvider::new();
        let counter =
            provider.counter(MetricSpec::new("pipeline", "total_in", "help").with_labels(&["stage"]));
        counter.inc(&["fetch"]);
        let timer = provider.timer(MetricSpec::new("pipeline", "latency", "help"));
        timer.record(Duration::from_millis(5), &[]);
        assert_eq!(provider.name(), "otel");
    }
}
