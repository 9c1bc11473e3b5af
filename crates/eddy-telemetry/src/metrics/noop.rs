//! No-op metrics backend, the default when metrics are disabled.

use super::{Counter, Gauge, Histogram, MetricSpec, Provider, Timer};
use std::sync::Arc;
use std::time::Duration;

/// Discards every recording.
#[derive(Debug, Default, Clone)]
pub struct NoopProvider;

struct NoopInstrument;

impl Counter for NoopInstrument {
    fn inc(&self, _labels: &[&str]) {}
    fn add(&self, _value: u64, _labels: &[&str]) {}
}

impl Gauge for NoopInstrument {
    fn set(&self, _value: f64, _labels: &[&str]) {}
    fn add(&self, _delta: f64, _labels: &[&str]) {}
}

impl Histogram for NoopInstrument {
    fn observe(&self, _value: f64, _labels: &[&str]) {}
}

impl Timer for NoopInstrument {
    fn record(&self, _duration: Duration, _labels: &[&str]) {}
}

impl Provider for NoopProvider {
    fn counter(&self, _spec: MetricSpec) -> Arc<dyn Counter> {
        Arc::new(NoopInstrument)
    }

    fn gauge(&self, _spec: MetricSpec) -> Arc<dyn Gauge> {
        Arc::new(NoopInstrument)
    }

    fn histogram(&self, _spec: MetricSpec) -> Arc<dyn Histogram> {
        Arc::new(NoopInstrument)
    }

    fn timer(&self, _spec: MetricSpec) -> Arc<dyn Timer> {
        Arc::new(NoopInstrument)
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recordings_are_accepted_and_discarded() {
        let provider = NoopProvider;
        let counter = provider.counter(MetricSpec::new("test", "c", "help"));
        counter.inc(&["a"]);
        counter.add(10, &[]);
        let timer = provider.timer(MetricSpec::new("test", "t", "help"));
        timer.record(Duration::from_secs(1), &[]);
        assert!(provider.exposition().is_none());
    }
}
