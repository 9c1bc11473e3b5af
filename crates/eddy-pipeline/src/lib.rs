//! # Eddy Pipeline
//!
//! The bounded multi-stage crawl pipeline:
//!
//! ```text
//! seeds ──▶ discovery ──▶ fetch ──▶ process ──▶ assets ──▶ output ──▶ results
//!              ▲                       │
//!              └── discovered links ───┘
//! ```
//!
//! Each stage reads from a bounded queue and writes to the next; worker
//! pools per stage; blocking sends propagate backpressure upstream. Exactly
//! one [`CrawlResult`](eddy_types::CrawlResult) surfaces per admitted URL,
//! and the results channel closes only after every stage has drained.
//!
//! Retries with exponential backoff happen only in the fetch stage; all
//! other stages report on first failure.

pub mod admission;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod task;

pub use admission::{Admission, AdmissionOutcome};
pub use config::PipelineConfig;
pub use metrics::{PipelineMetrics, PipelineSnapshot, StageSnapshot};
pub use pipeline::{Pipeline, PipelineDeps, PipelineHandle};
pub use task::{CrawlTask, TaskState};
