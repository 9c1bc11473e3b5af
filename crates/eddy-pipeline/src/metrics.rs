//! Per-stage pipeline metrics.
//!
//! Counters are kept twice: as atomics for the cheap in-process snapshot and
//! through the metrics [`Provider`] instruments for export.

use eddy_telemetry::metrics::{Counter, Gauge, MetricSpec, Provider, Timer};
use eddy_types::CrawlStage;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

const STAGES: [CrawlStage; 5] = [
    CrawlStage::Discovery,
    CrawlStage::Fetch,
    CrawlStage::Process,
    CrawlStage::Asset,
    CrawlStage::Output,
];

fn stage_index(stage: CrawlStage) -> usize {
    match stage {
        CrawlStage::Discovery => 0,
        CrawlStage::Fetch => 1,
        CrawlStage::Process => 2,
        CrawlStage::Asset => 3,
        CrawlStage::Output => 4,
    }
}

#[derive(Debug, Default)]
struct StageCounters {
    total_in: AtomicU64,
    total_out: AtomicU64,
    total_failed: AtomicU64,
}

/// One stage's counters in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSnapshot {
    pub stage: &'static str,
    pub total_in: u64,
    pub total_out: u64,
    pub total_failed: u64,
}

/// Aggregate pipeline view for `Engine::snapshot`.
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    pub total_processed: u64,
    pub total_failed: u64,
    pub links_dropped: u64,
    pub shutdown_dropped: u64,
    pub stages: Vec<StageSnapshot>,
}

/// Shared metric recorders for all stages.
pub struct PipelineMetrics {
    stages: [StageCounters; 5],
    total_processed: AtomicU64,
    total_failed: AtomicU64,
    links_dropped: AtomicU64,
    shutdown_dropped: AtomicU64,

    in_counter: Arc<dyn Counter>,
    out_counter: Arc<dyn Counter>,
    failed_counter: Arc<dyn Counter>,
    latency: Arc<dyn Timer>,
    queue_depth: Arc<dyn Gauge>,
    workers_busy: Arc<dyn Gauge>,
}

impl PipelineMetrics {
    pub fn new(provider: &dyn Provider) -> Self {
        Self {
            stages: Default::default(),
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            links_dropped: AtomicU64::new(0),
            shutdown_dropped: AtomicU64::new(0),
            in_counter: provider.counter(
                MetricSpec::new("pipeline", "total_in", "tasks entering a stage")
                    .with_labels(&["stage"]),
            ),
            out_counter: provider.counter(
                MetricSpec::new("pipeline", "total_out", "tasks leaving a stage forward")
                    .with_labels(&["stage"]),
            ),
            failed_counter: provider.counter(
                MetricSpec::new("pipeline", "total_failed", "tasks failed in a stage")
                    .with_labels(&["stage"]),
            ),
            latency: provider.timer(
                MetricSpec::new("pipeline", "stage_latency_seconds", "stage handling latency")
                    .with_labels(&["stage"]),
            ),
            queue_depth: provider.gauge(
                MetricSpec::new("pipeline", "queue_depth", "tasks waiting per stage queue")
                    .with_labels(&["stage"]),
            ),
            workers_busy: provider.gauge(
                MetricSpec::new("pipeline", "workers_busy", "workers handling a task")
                    .with_labels(&["stage"]),
            ),
        }
    }

    pub fn record_in(&self, stage: CrawlStage) {
        self.stages[stage_index(stage)]
            .total_in
            .fetch_add(1, Relaxed);
        self.in_counter.inc(&[stage.as_str()]);
    }

    pub fn record_out(&self, stage: CrawlStage) {
        self.stages[stage_index(stage)]
            .total_out
            .fetch_add(1, Relaxed);
        self.out_counter.inc(&[stage.as_str()]);
    }

    pub fn record_failed(&self, stage: CrawlStage) {
        self.stages[stage_index(stage)]
            .total_failed
            .fetch_add(1, Relaxed);
        self.failed_counter.inc(&[stage.as_str()]);
        self.total_failed.fetch_add(1, Relaxed);
    }

    /// A task reached its terminal success record.
    pub fn record_processed(&self) {
        self.total_processed.fetch_add(1, Relaxed);
    }

    pub fn observe_latency(&self, stage: CrawlStage, elapsed: Duration) {
        self.latency.record(elapsed, &[stage.as_str()]);
    }

    pub fn set_queue_depth(&self, stage: CrawlStage, depth: usize) {
        self.queue_depth.set(depth as f64, &[stage.as_str()]);
    }

    pub fn worker_busy(&self, stage: CrawlStage, delta: f64) {
        self.workers_busy.add(delta, &[stage.as_str()]);
    }

    /// A discovered link was dropped because discovery's queue was full.
    pub fn record_link_dropped(&self) {
        self.links_dropped.fetch_add(1, Relaxed);
    }

    /// A queued task was abandoned because shutdown interrupted its send.
    pub fn record_shutdown_drop(&self) {
        self.shutdown_dropped.fetch_add(1, Relaxed);
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Relaxed)
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            total_processed: self.total_processed.load(Relaxed),
            total_failed: self.total_failed.load(Relaxed),
            links_dropped: self.links_dropped.load(Relaxed),
            shutdown_dropped: self.shutdown_dropped.load(Relaxed),
            stages: STAGES
                .iter()
                .map(|stage| {
                    let counters = &self.stages[stage_index(*stage)];
                    StageSnapshot {
                        stage: stage.as_str(),
                        total_in: counters.total_in.load(Relaxed),
                        total_out: counters.total_out.load(Relaxed),
                        total_failed: counters.total_failed.load(Relaxed),
                    }
                })
                .collect(),
        }
    }
}
