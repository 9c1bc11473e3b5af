//! # Eddy Engine
//!
//! The embeddable facade over the ingestion pipeline. Hosts construct an
//! [`Engine`] from an [`EngineConfig`], optionally swap in their own
//! [`Fetcher`](eddy_types::Fetcher) / [`Processor`](eddy_types::Processor) /
//! [`OutputSink`](eddy_types::OutputSink) capabilities, then:
//!
//! ```no_run
//! use eddy_engine::{Engine, EngineConfig};
//! use tokio_stream::StreamExt;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::default()
//!     .with_allowed_domains(["example.com"])
//!     .with_max_depth(2);
//! let engine = Engine::new(config)?;
//!
//! let mut results = engine.start(vec!["https://example.com/".into()]).await?;
//! while let Some(result) = results.next().await {
//!     println!("{} success={}", result.url, result.success);
//! }
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Everything lives on the engine value; there is no process-global state.

pub mod config;
pub mod defaults;
pub mod engine;
pub mod probes;

pub use config::{EngineConfig, MetricsBackend};
pub use defaults::{HtmlProcessor, JsonlSink, MemorySink, ReqwestAssetFetcher, ReqwestFetcher};
pub use engine::{Engine, EngineBuilder, EngineSnapshot, ResultStream, ResumeStats};

pub use eddy_assets::{AssetEvent, AssetMetricsSnapshot, AssetPolicy};
pub use eddy_limiter::RateLimitConfig;
pub use eddy_resources::ResourceConfig;
pub use eddy_telemetry::{Event, HealthSnapshot, TelemetryPolicy};
pub use eddy_types::{CrawlError, CrawlResult, CrawlStage, Page};
