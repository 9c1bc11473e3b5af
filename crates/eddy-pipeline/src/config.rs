//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pools, queue bounds, traversal limits, and fetch retry tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub discovery_workers: usize,
    pub fetch_workers: usize,
    pub process_workers: usize,
    pub output_workers: usize,
    /// Capacity of every inter-stage queue.
    pub buffer_size: usize,
    /// Domains admitted by discovery; empty admits everything. A link is
    /// allowed when its domain equals an entry or is a subdomain of one.
    pub allowed_domains: Vec<String>,
    /// Maximum link depth; seeds are depth 0.
    pub max_depth: usize,
    /// Hard cap on admitted URLs; 0 means unlimited.
    pub max_pages: usize,
    /// Per-fetch wall-clock cap.
    pub fetch_timeout: Duration,
    /// Base delay for fetch retry backoff.
    pub retry_base_delay: Duration,
    /// Cap for fetch retry backoff.
    pub retry_max_delay: Duration,
    /// Maximum fetch attempts per task, first try included.
    pub retry_max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            discovery_workers: 2,
            fetch_workers: 4,
            process_workers: 2,
            output_workers: 1,
            buffer_size: 64,
            allowed_domains: Vec::new(),
            max_depth: 3,
            max_pages: 0,
            fetch_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(10),
            retry_max_attempts: 3,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("discovery_workers", self.discovery_workers),
            ("fetch_workers", self.fetch_workers),
            ("process_workers", self.process_workers),
            ("output_workers", self.output_workers),
            ("buffer_size", self.buffer_size),
        ] {
            if value == 0 {
                return Err(format!("pipeline {name} must be > 0"));
            }
        }
        if self.fetch_timeout.is_zero() {
            return Err("pipeline fetch_timeout must be > 0".into());
        }
        if self.retry_max_attempts == 0 {
            return Err("pipeline retry_max_attempts must be > 0".into());
        }
        Ok(())
    }
}
