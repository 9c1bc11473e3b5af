//! The engine facade.

use crate::config::{EngineConfig, MetricsBackend};
use crate::defaults::{HtmlProcessor, ReqwestAssetFetcher, ReqwestFetcher};
use crate::probes::{LimiterProbe, PipelineProbe, ResourceProbe};
use chrono::{DateTime, Utc};
use eddy_assets::{AssetEngine, AssetEvent, AssetMetricsSnapshot};
use eddy_limiter::{LimiterSnapshot, RateLimiter};
use eddy_pipeline::{Pipeline, PipelineConfig, PipelineDeps, PipelineHandle, PipelineMetrics, PipelineSnapshot};
use eddy_resources::{ResourceManager, ResourceStats};
use eddy_telemetry::bus::Event;
use eddy_telemetry::metrics::noop::NoopProvider;
use eddy_telemetry::metrics::Provider;
use eddy_telemetry::{EventBus, HealthEvaluator, HealthProbe, HealthSnapshot, PolicyHandle, TelemetryPolicy};
use eddy_types::{normalize_url, AssetFetcher, Clock, CrawlError, CrawlResult, Fetcher, OutputSink, Processor, RealClock};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Stream of terminal records; closes when the crawl completes or stops.
pub type ResultStream = ReceiverStream<CrawlResult>;

/// Callback mirror of internal bus events.
pub type EventObserver = Arc<dyn Fn(&Event) + Send + Sync>;

/// What the checkpoint filter did to the seed list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeStats {
    pub seeds_before: usize,
    pub skipped: usize,
}

/// Unified point-in-time view of the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub uptime: Duration,
    pub pipeline: Option<PipelineSnapshot>,
    pub limiter: Option<LimiterSnapshot>,
    pub resources: Option<ResourceStats>,
    pub resume: Option<ResumeStats>,
}

/// Builder for hosts that replace default capabilities.
pub struct EngineBuilder {
    config: EngineConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    processor: Option<Arc<dyn Processor>>,
    sinks: Vec<Arc<dyn OutputSink>>,
    asset_fetcher: Option<Arc<dyn AssetFetcher>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            fetcher: None,
            processor: None,
            sinks: Vec::new(),
            asset_fetcher: None,
            clock: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn add_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_asset_fetcher(mut self, asset_fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.asset_fetcher = Some(asset_fetcher);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Construct the engine, building subsystems in dependency order.
    ///
    /// Must be called from within a tokio runtime: the limiter and the
    /// checkpoint flusher spawn background tasks.
    pub fn build(self) -> Result<Engine, CrawlError> {
        let config = self.config;
        config.validate().map_err(CrawlError::Config)?;

        // Leaves first: provider, bus, policy, clock.
        let provider = build_provider(&config);
        let bus = EventBus::new();
        let policy = PolicyHandle::default();
        let clock: Arc<dyn Clock> = self
            .clock
            .unwrap_or_else(|| Arc::new(RealClock::new()));

        let limiter = RateLimiter::new(config.rate_limit.clone(), Arc::clone(&clock));
        let resources = Arc::new(
            ResourceManager::new(&config.resources)
                .map_err(|e| CrawlError::Config(format!("resources: {e}")))?,
        );

        let assets = if config.asset_policy.enabled {
            let asset_fetcher: Arc<dyn AssetFetcher> = match self.asset_fetcher {
                Some(fetcher) => fetcher,
                None => Arc::new(ReqwestAssetFetcher::new(&config.user_agent, config.timeout)?),
            };
            let engine = Arc::new(AssetEngine::new(config.asset_policy.clone(), asset_fetcher)?);
            let hook_bus = Arc::clone(&bus);
            engine.set_event_hook(Arc::new(move |asset_event: &AssetEvent| {
                let mut event = Event::new("asset", asset_event.kind.as_str())
                    .with_field("url", asset_event.url.clone());
                if let Some(bytes) = asset_event.bytes {
                    event = event.with_field("bytes", bytes.to_string());
                }
                if let Some(hash) = &asset_event.hash {
                    event = event.with_field("hash", hash.clone());
                }
                if let Some(error) = &asset_event.error {
                    event = event.with_field("error", error.clone());
                }
                let _ = hook_bus.publish(event);
            }));
            Some(engine)
        } else {
            None
        };

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ReqwestFetcher::new(
                &config.user_agent,
                config.timeout,
                config.request_delay,
                config.respect_robots,
            )?),
        };
        let processor: Arc<dyn Processor> = self
            .processor
            .unwrap_or_else(|| Arc::new(HtmlProcessor::new()));

        let pipeline_config = PipelineConfig {
            discovery_workers: config.discovery_workers,
            fetch_workers: config.fetch_workers,
            process_workers: config.process_workers,
            output_workers: config.output_workers,
            buffer_size: config.buffer_size,
            allowed_domains: config.allowed_domains.clone(),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            fetch_timeout: config.timeout,
            retry_base_delay: config.rate_limit.retry_base_delay,
            retry_max_delay: config.rate_limit.retry_max_delay,
            retry_max_attempts: config.rate_limit.retry_max_attempts,
        };
        let deps = PipelineDeps {
            fetcher,
            processor,
            sinks: self.sinks.clone(),
            assets: assets.clone(),
            limiter: Arc::clone(&limiter),
            resources: Arc::clone(&resources),
            clock: Arc::clone(&clock),
            bus: Some(Arc::clone(&bus)),
        };
        let pipeline = Pipeline::new(pipeline_config, deps, provider.as_ref())?;
        let metrics = pipeline.metrics();

        let probes: Vec<Arc<dyn HealthProbe>> = vec![
            Arc::new(LimiterProbe {
                limiter: Arc::clone(&limiter),
                policy: policy.clone(),
            }),
            Arc::new(ResourceProbe {
                resources: Arc::clone(&resources),
                policy: policy.clone(),
            }),
            Arc::new(PipelineProbe {
                metrics: Arc::clone(&metrics),
                policy: policy.clone(),
            }),
        ];
        let health = Arc::new(HealthEvaluator::new(
            probes,
            policy.clone(),
            Arc::clone(&clock),
            Some(Arc::clone(&bus)),
        ));

        let observers: Arc<RwLock<Vec<EventObserver>>> = Arc::new(RwLock::new(Vec::new()));
        let observer_task = spawn_observer_mirror(
            Arc::clone(&bus),
            policy.load().event_buffer,
            Arc::clone(&observers),
        );

        info!(
            metrics_backend = provider.name(),
            assets = assets.is_some(),
            "engine constructed"
        );

        Ok(Engine {
            config,
            clock,
            policy,
            bus,
            provider,
            limiter,
            resources,
            assets,
            health,
            metrics,
            sinks: self.sinks,
            pipeline: StdMutex::new(Some(pipeline)),
            handle: tokio::sync::Mutex::new(None),
            started_at: StdMutex::new(None),
            resume: StdMutex::new(None),
            observers,
            observer_task: StdMutex::new(Some(observer_task)),
            stopped: AtomicBool::new(false),
        })
    }
}

/// The embeddable ingestion engine.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    policy: PolicyHandle,
    bus: Arc<EventBus>,
    provider: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
    resources: Arc<ResourceManager>,
    assets: Option<Arc<AssetEngine>>,
    health: Arc<HealthEvaluator>,
    metrics: Arc<PipelineMetrics>,
    sinks: Vec<Arc<dyn OutputSink>>,
    pipeline: StdMutex<Option<Pipeline>>,
    handle: tokio::sync::Mutex<Option<PipelineHandle>>,
    started_at: StdMutex<Option<(Instant, DateTime<Utc>)>>,
    resume: StdMutex<Option<ResumeStats>>,
    observers: Arc<RwLock<Vec<EventObserver>>>,
    observer_task: StdMutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Engine {
    /// Construct with the default capabilities.
    pub fn new(config: EngineConfig) -> Result<Self, CrawlError> {
        EngineBuilder::new(config).build()
    }

    /// Builder for swapping in host capabilities.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Seed the crawl and return the result stream.
    ///
    /// Empty `seeds` fall back to the configured seed list. With resume
    /// enabled, seeds already present in the checkpoint are skipped before
    /// the pipeline ever sees them.
    pub async fn start(&self, seeds: Vec<String>) -> Result<ResultStream, CrawlError> {
        if self.stopped.load(SeqCst) {
            return Err(CrawlError::Config("engine is stopped".into()));
        }
        let pipeline = lock(&self.pipeline)
            .take()
            .ok_or_else(|| CrawlError::Config("engine already started".into()))?;

        let mut seeds = if seeds.is_empty() {
            self.config.seeds.clone()
        } else {
            seeds
        };

        if self.config.resume {
            let completed = self.resources.completed_urls(&self.config.resources);
            let before = seeds.len();
            seeds.retain(|seed| match normalize_url(seed) {
                Ok(url) => !completed.contains(url.as_str()),
                // Invalid seeds pass through to surface a proper
                // admission failure from the pipeline.
                Err(_) => true,
            });
            let stats = ResumeStats {
                seeds_before: before,
                skipped: before - seeds.len(),
            };
            info!(
                seeds_before = stats.seeds_before,
                skipped = stats.skipped,
                "resume filter applied"
            );
            *lock(&self.resume) = Some(stats);
        }

        *lock(&self.started_at) = Some((Instant::now(), Utc::now()));
        info!(seeds = seeds.len(), "starting crawl");

        let (rx, handle) = pipeline.start(seeds);
        *self.handle.lock().await = Some(handle);
        Ok(ReceiverStream::new(rx))
    }

    /// Drain the pipeline and close every subsystem. Idempotent.
    pub async fn stop(&self) -> Result<(), CrawlError> {
        if self.stopped.swap(true, SeqCst) {
            return Ok(());
        }
        debug!("stopping engine");

        if let Some(handle) = self.handle.lock().await.take() {
            handle.stop().await;
        }
        for sink in &self.sinks {
            if let Err(err) = sink.flush().await {
                warn!(sink = sink.name(), error = %err, "sink flush failed on stop");
            }
            if let Err(err) = sink.close().await {
                warn!(sink = sink.name(), error = %err, "sink close failed on stop");
            }
        }
        self.limiter.close().await;
        self.resources.close().await;
        if let Some(task) = lock(&self.observer_task).take() {
            task.abort();
        }
        info!("engine stopped");
        Ok(())
    }

    /// Unified runtime snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        let started = *lock(&self.started_at);
        EngineSnapshot {
            started_at: started.map(|(_, at)| at),
            uptime: started.map(|(instant, _)| instant.elapsed()).unwrap_or_default(),
            pipeline: started.map(|_| self.metrics.snapshot()),
            limiter: Some(self.limiter.snapshot()),
            resources: Some(self.resources.stats()),
            resume: *lock(&self.resume),
        }
    }

    /// TTL-cached health view.
    pub async fn health_snapshot(&self) -> HealthSnapshot {
        self.health.evaluate().await
    }

    /// The current telemetry policy.
    pub fn policy(&self) -> Arc<TelemetryPolicy> {
        self.policy.load()
    }

    /// Swap the telemetry policy; `None` restores normalized defaults.
    pub fn update_telemetry_policy(&self, policy: Option<TelemetryPolicy>) {
        self.policy.update(policy);
    }

    /// Register a callback mirror of internal bus events.
    ///
    /// Callbacks run with per-call panic isolation and must be fast.
    pub fn register_event_observer(&self, observer: impl Fn(&Event) + Send + Sync + 'static) {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        observers.push(Arc::new(observer));
    }

    /// Atomic snapshot of asset engine counters.
    pub fn asset_metrics(&self) -> AssetMetricsSnapshot {
        self.assets
            .as_ref()
            .map(|engine| engine.metrics())
            .unwrap_or_default()
    }

    /// Most recent asset events, oldest first.
    pub fn asset_events(&self) -> Vec<AssetEvent> {
        self.assets
            .as_ref()
            .map(|engine| engine.recent_events())
            .unwrap_or_default()
    }

    /// Metrics text exposition; present only for backends that have one.
    pub fn metrics_exposition(&self) -> Option<String> {
        self.provider.exposition()
    }

    /// The internal event bus, for hosts wiring their own subscribers.
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    #[allow(dead_code)]
    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

fn build_provider(config: &EngineConfig) -> Arc<dyn Provider> {
    if !config.metrics_enabled {
        return Arc::new(NoopProvider);
    }
    match config.metrics_backend {
        MetricsBackend::Noop => Arc::new(NoopProvider),
        MetricsBackend::Prom => {
            #[cfg(feature = "prom")]
            {
                Arc::new(eddy_telemetry::metrics::prom::PromProvider::new())
            }
            #[cfg(not(feature = "prom"))]
            {
                warn!("prom backend requested but the `prom` feature is disabled, using noop");
                Arc::new(NoopProvider)
            }
        }
        MetricsBackend::Otel => {
            #[cfg(feature = "otel")]
            {
                Arc::new(eddy_telemetry::metrics::otel::OtelProvider::new())
            }
            #[cfg(not(feature = "otel"))]
            {
                warn!("otel backend requested but the `otel` feature is disabled, using noop");
                Arc::new(NoopProvider)
            }
        }
    }
}

/// Forward bus events to registered observers with panic isolation.
fn spawn_observer_mirror(
    bus: Arc<EventBus>,
    buffer: usize,
    observers: Arc<RwLock<Vec<EventObserver>>>,
) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(buffer);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let snapshot: Vec<EventObserver> = {
                let observers = observers.read().unwrap_or_else(PoisonError::into_inner);
                observers.clone()
            };
            for observer in snapshot {
                let outcome =
                    std::panic::catch_unwind(AssertUnwindSafe(|| observer(&event)));
                if outcome.is_err() {
                    error!(event = %event.name, "event observer panicked; isolating");
                }
            }
        }
    })
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
