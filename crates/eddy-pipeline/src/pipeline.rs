//! Pipeline assembly: queues, worker pools, controller, shutdown.

use crate::admission::{Admission, AdmissionOutcome};
use crate::config::PipelineConfig;
use crate::metrics::PipelineMetrics;
use crate::task::{CrawlTask, TaskState};
use eddy_assets::AssetEngine;
use eddy_limiter::{AcquireError, Feedback, RateLimiter};
use eddy_resources::ResourceManager;
use eddy_telemetry::bus::{Event, EventBus};
use eddy_telemetry::metrics::Provider;
use eddy_types::{
    domain_key, normalize_url, Clock, CrawlError, CrawlResult, CrawlStage, Fetcher, OutputSink,
    Page, Processor,
};
use std::sync::atomic::{AtomicUsize, Ordering::{AcqRel, Acquire}};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type TaskRx = Arc<Mutex<mpsc::Receiver<CrawlTask>>>;

/// Collaborators the pipeline orchestrates.
pub struct PipelineDeps {
    pub fetcher: Arc<dyn Fetcher>,
    pub processor: Arc<dyn Processor>,
    pub sinks: Vec<Arc<dyn OutputSink>>,
    pub assets: Option<Arc<AssetEngine>>,
    pub limiter: Arc<RateLimiter>,
    pub resources: Arc<ResourceManager>,
    pub clock: Arc<dyn Clock>,
    pub bus: Option<Arc<EventBus>>,
}

/// Counts tasks alive anywhere in the pipeline; zero pending after seeding
/// means the crawl is complete.
struct TaskTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl TaskTracker {
    fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    fn inc(&self) {
        self.pending.fetch_add(1, AcqRel);
    }

    fn dec(&self) {
        if self.pending.fetch_sub(1, AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Shared stage context. Owned by the controller and the workers only, so
/// the results channel closes exactly when the last of them exits.
struct Ctx {
    config: PipelineConfig,
    fetcher: Arc<dyn Fetcher>,
    processor: Arc<dyn Processor>,
    sinks: Vec<Arc<dyn OutputSink>>,
    assets: Option<Arc<AssetEngine>>,
    limiter: Arc<RateLimiter>,
    resources: Arc<ResourceManager>,
    clock: Arc<dyn Clock>,
    bus: Option<Arc<EventBus>>,
    metrics: Arc<PipelineMetrics>,
    admission: Admission,
    tracker: TaskTracker,
    results_tx: mpsc::Sender<CrawlResult>,
}

impl Ctx {
    /// Emit the task's single terminal record and settle its pending count.
    async fn emit(&self, result: CrawlResult, shutdown: &mut watch::Receiver<bool>) {
        if result.success {
            self.metrics.record_processed();
        } else {
            self.metrics.record_failed(result.stage);
            if let Some(bus) = &self.bus {
                let event = Event::new("pipeline", "task_failed")
                    .with_field("url", result.url.clone())
                    .with_field("stage", result.stage.as_str());
                let _ = bus.publish(event);
            }
        }

        tokio::select! {
            sent = self.results_tx.send(result) => {
                if sent.is_err() {
                    self.metrics.record_shutdown_drop();
                }
            }
            _ = shutdown.changed() => {
                self.metrics.record_shutdown_drop();
            }
        }
        self.tracker.dec();
    }

    /// Transfer task ownership to the next stage's queue. A send cut short
    /// by shutdown drops the task with an observable counter; the task's
    /// pending count is settled on that path.
    async fn forward(
        &self,
        tx: &mpsc::Sender<CrawlTask>,
        queue_stage: CrawlStage,
        task: CrawlTask,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            sent = tx.send(task) => {
                if sent.is_err() {
                    self.metrics.record_shutdown_drop();
                    self.tracker.dec();
                    false
                } else {
                    self.metrics
                        .set_queue_depth(queue_stage, self.config.buffer_size - tx.capacity());
                    true
                }
            }
            _ = shutdown.changed() => {
                self.metrics.record_shutdown_drop();
                self.tracker.dec();
                false
            }
        }
    }
}

async fn next_task(input: &TaskRx, shutdown: &mut watch::Receiver<bool>) -> Option<CrawlTask> {
    if *shutdown.borrow() {
        return None;
    }
    let mut rx = input.lock().await;
    tokio::select! {
        task = rx.recv() => task,
        _ = shutdown.changed() => None,
    }
}

/// Handle used to stop a started pipeline. Idempotent.
pub struct PipelineHandle {
    shutdown_tx: watch::Sender<bool>,
    controller: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineHandle {
    /// Signal shutdown and wait for every stage to drain and exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let controller = self.controller.lock().await.take();
        if let Some(controller) = controller {
            let _ = controller.await;
        }
    }
}

/// The assembled pipeline, ready to start once.
pub struct Pipeline {
    config: PipelineConfig,
    deps: PipelineDeps,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        deps: PipelineDeps,
        provider: &dyn Provider,
    ) -> Result<Self, CrawlError> {
        config.validate().map_err(CrawlError::Config)?;
        Ok(Self {
            metrics: Arc::new(PipelineMetrics::new(provider)),
            config,
            deps,
        })
    }

    /// Metrics handle that outlives the run, for snapshots.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Spawn the stages, seed the crawl, and return the results receiver.
    ///
    /// The receiver yields exactly one record per admitted URL and closes
    /// after the crawl completes or `PipelineHandle::stop` drains the
    /// stages.
    pub fn start(self, seeds: Vec<String>) -> (mpsc::Receiver<CrawlResult>, PipelineHandle) {
        let buffer = self.config.buffer_size;
        let (results_tx, results_rx) = mpsc::channel(buffer.max(seeds.len()).max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (disc_tx, disc_rx) = mpsc::channel::<CrawlTask>(buffer);
        let (fetch_tx, fetch_rx) = mpsc::channel::<CrawlTask>(buffer);
        let (proc_tx, proc_rx) = mpsc::channel::<CrawlTask>(buffer);
        let (asset_tx, asset_rx) = mpsc::channel::<CrawlTask>(buffer);
        let (out_tx, out_rx) = mpsc::channel::<CrawlTask>(buffer);

        let ctx = Arc::new(Ctx {
            admission: Admission::new(
                &self.config.allowed_domains,
                self.config.max_depth,
                self.config.max_pages,
            ),
            tracker: TaskTracker::new(),
            results_tx,
            metrics: Arc::clone(&self.metrics),
            config: self.config,
            fetcher: self.deps.fetcher,
            processor: self.deps.processor,
            sinks: self.deps.sinks,
            assets: self.deps.assets,
            limiter: self.deps.limiter,
            resources: self.deps.resources,
            clock: self.deps.clock,
            bus: self.deps.bus,
        });

        let disc_rx: TaskRx = Arc::new(Mutex::new(disc_rx));
        let fetch_rx: TaskRx = Arc::new(Mutex::new(fetch_rx));
        let proc_rx: TaskRx = Arc::new(Mutex::new(proc_rx));
        let asset_rx: TaskRx = Arc::new(Mutex::new(asset_rx));
        let out_rx: TaskRx = Arc::new(Mutex::new(out_rx));

        let mut handles = Vec::new();
        for _ in 0..ctx.config.discovery_workers {
            handles.push(tokio::spawn(discovery_worker(
                Arc::clone(&ctx),
                Arc::clone(&disc_rx),
                fetch_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        for _ in 0..ctx.config.fetch_workers {
            handles.push(tokio::spawn(fetch_worker(
                Arc::clone(&ctx),
                Arc::clone(&fetch_rx),
                proc_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        for _ in 0..ctx.config.process_workers {
            handles.push(tokio::spawn(process_worker(
                Arc::clone(&ctx),
                Arc::clone(&proc_rx),
                asset_tx.clone(),
                disc_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        for _ in 0..ctx.config.process_workers {
            handles.push(tokio::spawn(asset_worker(
                Arc::clone(&ctx),
                Arc::clone(&asset_rx),
                out_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        for _ in 0..ctx.config.output_workers {
            handles.push(tokio::spawn(output_worker(
                Arc::clone(&ctx),
                Arc::clone(&out_rx),
                shutdown_rx.clone(),
            )));
        }
        // Only worker clones keep the inter-stage senders alive.
        drop(fetch_tx);
        drop(proc_tx);
        drop(asset_tx);
        drop(out_tx);

        let controller = tokio::spawn(controller(
            ctx,
            seeds,
            disc_tx,
            handles,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        (
            results_rx,
            PipelineHandle {
                shutdown_tx,
                controller: Mutex::new(Some(controller)),
            },
        )
    }
}

/// Seeds the crawl, waits for completion or shutdown, then drains in order.
async fn controller(
    ctx: Arc<Ctx>,
    seeds: Vec<String>,
    disc_tx: mpsc::Sender<CrawlTask>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    for seed in seeds {
        ctx.tracker.inc();
        let url = match normalize_url(&seed) {
            Ok(url) => url,
            Err(err) => {
                ctx.emit(
                    CrawlResult::failure(
                        seed,
                        CrawlStage::Discovery,
                        CrawlError::Admission {
                            reason: format!("invalid url: {err}"),
                        },
                    ),
                    &mut shutdown_rx,
                )
                .await;
                continue;
            }
        };
        let domain = match domain_key(&url) {
            Ok(domain) => domain,
            Err(reason) => {
                ctx.emit(
                    CrawlResult::failure(
                        url.to_string(),
                        CrawlStage::Discovery,
                        CrawlError::Admission { reason },
                    ),
                    &mut shutdown_rx,
                )
                .await;
                continue;
            }
        };

        let task = CrawlTask::new(url, domain, 0, true);
        tokio::select! {
            sent = disc_tx.send(task) => {
                if sent.is_err() {
                    ctx.tracker.dec();
                }
            }
            _ = shutdown_rx.changed() => {
                ctx.tracker.dec();
            }
        }
    }
    drop(disc_tx);

    tokio::select! {
        _ = ctx.tracker.wait_idle() => {
            debug!("all admitted tasks settled, draining pipeline");
        }
        _ = shutdown_rx.changed() => {
            debug!("external stop requested, draining pipeline");
        }
    }

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
}

async fn discovery_worker(
    ctx: Arc<Ctx>,
    input: TaskRx,
    fetch_tx: mpsc::Sender<CrawlTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(task) = next_task(&input, &mut shutdown).await {
        let started = Instant::now();
        ctx.metrics.record_in(CrawlStage::Discovery);
        ctx.metrics.worker_busy(CrawlStage::Discovery, 1.0);

        match ctx
            .admission
            .check(task.url.as_str(), &task.domain, task.depth)
        {
            AdmissionOutcome::Admitted => {
                ctx.metrics.record_out(CrawlStage::Discovery);
                ctx.forward(&fetch_tx, CrawlStage::Fetch, task, &mut shutdown)
                    .await;
            }
            AdmissionOutcome::Duplicate => {
                debug!(url = %task.url, "duplicate admission dropped");
                ctx.tracker.dec();
            }
            AdmissionOutcome::Rejected(reason) => {
                if task.seed {
                    ctx.emit(
                        CrawlResult::failure(
                            task.url.to_string(),
                            CrawlStage::Discovery,
                            CrawlError::Admission { reason },
                        ),
                        &mut shutdown,
                    )
                    .await;
                } else {
                    debug!(url = %task.url, reason = %reason, "link rejected at admission");
                    ctx.tracker.dec();
                }
            }
        }

        ctx.metrics.worker_busy(CrawlStage::Discovery, -1.0);
        ctx.metrics
            .observe_latency(CrawlStage::Discovery, started.elapsed());
    }
}

enum FetchOutcome {
    Success,
    Failure(CrawlError),
    Canceled,
}

async fn fetch_worker(
    ctx: Arc<Ctx>,
    input: TaskRx,
    process_tx: mpsc::Sender<CrawlTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(mut task) = next_task(&input, &mut shutdown).await {
        let started = Instant::now();
        ctx.metrics.record_in(CrawlStage::Fetch);
        ctx.metrics.worker_busy(CrawlStage::Fetch, 1.0);
        task.state = TaskState::Fetching;

        match fetch_task(&ctx, &mut task, &mut shutdown).await {
            FetchOutcome::Success => {
                ctx.metrics.record_out(CrawlStage::Fetch);
                task.state = TaskState::Processing;
                ctx.forward(&process_tx, CrawlStage::Process, task, &mut shutdown)
                    .await;
            }
            FetchOutcome::Failure(error) => {
                task.state = TaskState::Failed;
                ctx.emit(
                    CrawlResult::failure(task.url.to_string(), CrawlStage::Fetch, error),
                    &mut shutdown,
                )
                .await;
            }
            FetchOutcome::Canceled => {
                ctx.tracker.dec();
            }
        }

        ctx.metrics.worker_busy(CrawlStage::Fetch, -1.0);
        ctx.metrics
            .observe_latency(CrawlStage::Fetch, started.elapsed());
    }
}

/// One task's fetch, including its retry loop.
///
/// Acquisition order is fixed: input queue, then slot, then permit, then
/// the fetch itself. Slot and permit are guards released on every path.
async fn fetch_task(
    ctx: &Ctx,
    task: &mut CrawlTask,
    shutdown: &mut watch::Receiver<bool>,
) -> FetchOutcome {
    loop {
        let slot = tokio::select! {
            slot = ctx.resources.acquire_slot() => slot,
            _ = shutdown.changed() => return FetchOutcome::Canceled,
        };
        let permit = tokio::select! {
            permit = ctx.limiter.acquire(&task.domain) => permit,
            _ = shutdown.changed() => return FetchOutcome::Canceled,
        };
        let permit = match permit {
            Ok(permit) => permit,
            Err(AcquireError::CircuitOpen { domain }) => {
                return FetchOutcome::Failure(CrawlError::CircuitOpen { domain });
            }
            Err(AcquireError::InvalidDomain) => {
                return FetchOutcome::Failure(CrawlError::Admission {
                    reason: format!("no usable domain in {}", task.url),
                });
            }
        };

        let fetch_started = Instant::now();
        let fetched = tokio::select! {
            fetched = tokio::time::timeout(ctx.config.fetch_timeout, ctx.fetcher.fetch(&task.url)) => fetched,
            _ = shutdown.changed() => return FetchOutcome::Canceled,
        };
        let latency = fetch_started.elapsed();
        drop(permit);
        drop(slot);

        let retryable = match fetched {
            Err(_) => {
                ctx.limiter.feedback(
                    &task.domain,
                    Feedback {
                        status: None,
                        latency,
                        error: true,
                        retry_after: None,
                    },
                );
                CrawlError::transport(format!(
                    "fetch timed out after {:?}",
                    ctx.config.fetch_timeout
                ))
            }
            Ok(Ok(fetched)) => {
                ctx.limiter.feedback(
                    &task.domain,
                    Feedback {
                        status: Some(fetched.status),
                        latency,
                        error: false,
                        retry_after: fetched.retry_after,
                    },
                );
                task.status = Some(fetched.status);
                match fetched.status {
                    status if (200..400).contains(&status) => {
                        let mut page = Page::new(task.url.clone(), fetched.body);
                        page.metadata.headers = fetched.headers;
                        task.page = Some(page);
                        // At-least-once in the checkpoint before anything
                        // downstream of fetch can surface this URL.
                        ctx.resources.checkpoint(task.url.as_str());
                        return FetchOutcome::Success;
                    }
                    status if status == 429 || status >= 500 => {
                        CrawlError::transport_status(format!("upstream status {status}"), status)
                    }
                    status => {
                        return FetchOutcome::Failure(CrawlError::Http { status });
                    }
                }
            }
            Ok(Err(error)) => {
                ctx.limiter.feedback(
                    &task.domain,
                    Feedback {
                        status: None,
                        latency,
                        error: true,
                        retry_after: None,
                    },
                );
                if error.is_retryable() {
                    error
                } else {
                    return FetchOutcome::Failure(error);
                }
            }
        };

        task.attempt += 1;
        if task.attempt >= ctx.config.retry_max_attempts {
            warn!(url = %task.url, attempts = task.attempt, "fetch retries exhausted");
            return FetchOutcome::Failure(retryable);
        }

        let delay = backoff_delay(
            ctx.config.retry_base_delay,
            ctx.config.retry_max_delay,
            task.attempt,
        );
        debug!(
            url = %task.url,
            attempt = task.attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying fetch"
        );
        tokio::select! {
            _ = ctx.clock.sleep(delay) => {}
            _ = shutdown.changed() => return FetchOutcome::Canceled,
        }
    }
}

/// `min(max, base * 2^(attempt-1))` plus up to 25% jitter.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    let capped = (base.as_millis() as u64)
        .saturating_mul(factor)
        .min(max.as_millis() as u64);
    let jitter = if capped > 0 {
        fastrand::u64(0..=capped / 4)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}

async fn process_worker(
    ctx: Arc<Ctx>,
    input: TaskRx,
    asset_tx: mpsc::Sender<CrawlTask>,
    discovery_tx: mpsc::Sender<CrawlTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(mut task) = next_task(&input, &mut shutdown).await {
        let started = Instant::now();
        ctx.metrics.record_in(CrawlStage::Process);
        ctx.metrics.worker_busy(CrawlStage::Process, 1.0);

        let Some(page) = task.page.take() else {
            ctx.emit(
                CrawlResult::failure(
                    task.url.to_string(),
                    CrawlStage::Process,
                    CrawlError::Process("task reached process stage without a page".into()),
                ),
                &mut shutdown,
            )
            .await;
            ctx.metrics.worker_busy(CrawlStage::Process, -1.0);
            continue;
        };

        match ctx.processor.process(page).await {
            Ok(page) => {
                expand_links(&ctx, &page, task.depth, &discovery_tx);
                task.page = Some(page);
                task.state = TaskState::Rewriting;
                ctx.metrics.record_out(CrawlStage::Process);
                ctx.forward(&asset_tx, CrawlStage::Asset, task, &mut shutdown)
                    .await;
            }
            Err(error) => {
                task.state = TaskState::Failed;
                ctx.emit(
                    CrawlResult::failure(task.url.to_string(), CrawlStage::Process, error),
                    &mut shutdown,
                )
                .await;
            }
        }

        ctx.metrics.worker_busy(CrawlStage::Process, -1.0);
        ctx.metrics
            .observe_latency(CrawlStage::Process, started.elapsed());
    }
}

/// Loop discovered links back into discovery with an incremented depth.
///
/// The send is non-blocking: a blocking send here could deadlock the
/// process→discovery cycle when both queues are full, so overflow drops the
/// link and counts it instead.
fn expand_links(ctx: &Ctx, page: &Page, depth: usize, discovery_tx: &mpsc::Sender<CrawlTask>) {
    let next_depth = depth + 1;
    if next_depth > ctx.config.max_depth {
        return;
    }
    for link in &page.links {
        let Ok(url) = normalize_url(link.as_str()) else {
            continue;
        };
        let Ok(domain) = domain_key(&url) else {
            continue;
        };
        let task = CrawlTask::new(url, domain, next_depth, false);
        ctx.tracker.inc();
        if discovery_tx.try_send(task).is_err() {
            ctx.tracker.dec();
            ctx.metrics.record_link_dropped();
        }
    }
}

async fn asset_worker(
    ctx: Arc<Ctx>,
    input: TaskRx,
    output_tx: mpsc::Sender<CrawlTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(mut task) = next_task(&input, &mut shutdown).await {
        let started = Instant::now();
        ctx.metrics.record_in(CrawlStage::Asset);
        ctx.metrics.worker_busy(CrawlStage::Asset, 1.0);

        if let (Some(engine), Some(page)) = (&ctx.assets, task.page.as_mut()) {
            // Best-effort by contract: the page continues regardless.
            let summary = engine.process_page(page).await;
            if summary.failed > 0 {
                debug!(url = %task.url, failed = summary.failed, "asset failures on page");
            }
        }

        task.state = TaskState::Emitting;
        ctx.metrics.record_out(CrawlStage::Asset);
        ctx.forward(&output_tx, CrawlStage::Output, task, &mut shutdown)
            .await;

        ctx.metrics.worker_busy(CrawlStage::Asset, -1.0);
        ctx.metrics
            .observe_latency(CrawlStage::Asset, started.elapsed());
    }
}

async fn output_worker(ctx: Arc<Ctx>, input: TaskRx, mut shutdown: watch::Receiver<bool>) {
    while let Some(mut task) = next_task(&input, &mut shutdown).await {
        let started = Instant::now();
        ctx.metrics.record_in(CrawlStage::Output);
        ctx.metrics.worker_busy(CrawlStage::Output, 1.0);

        let Some(page) = task.page.take() else {
            ctx.emit(
                CrawlResult::failure(
                    task.url.to_string(),
                    CrawlStage::Output,
                    CrawlError::Output {
                        sink: "pipeline".into(),
                        message: "task reached output stage without a page".into(),
                    },
                ),
                &mut shutdown,
            )
            .await;
            ctx.metrics.worker_busy(CrawlStage::Output, -1.0);
            continue;
        };

        // The cache keeps the only copy; the original moves into the result.
        ctx.resources.store_page(task.url.as_str(), &page).await;
        let result = CrawlResult::success(task.url.to_string(), page, task.status);

        let mut sink_error: Option<CrawlError> = None;
        for sink in &ctx.sinks {
            if let Err(error) = sink.write(&result).await {
                warn!(url = %result.url, sink = sink.name(), error = %error, "sink write failed");
                sink_error = Some(CrawlError::Output {
                    sink: sink.name().to_string(),
                    message: error.to_string(),
                });
            }
        }

        match sink_error {
            None => {
                task.state = TaskState::Done;
                ctx.metrics.record_out(CrawlStage::Output);
                ctx.emit(result, &mut shutdown).await;
            }
            Some(error) => {
                task.state = TaskState::Failed;
                ctx.emit(
                    CrawlResult::failure(result.url, CrawlStage::Output, error),
                    &mut shutdown,
                )
                .await;
            }
        }

        ctx.metrics.worker_busy(CrawlStage::Output, -1.0);
        ctx.metrics
            .observe_latency(CrawlStage::Output, started.elapsed());
    }
}
