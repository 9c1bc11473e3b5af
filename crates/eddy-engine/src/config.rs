//! Engine configuration.

use eddy_assets::AssetPolicy;
use eddy_limiter::RateLimitConfig;
use eddy_resources::ResourceConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which metrics backend to wire up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    Prom,
    Otel,
    Noop,
}

/// The single flat configuration consumed by [`Engine::new`](crate::Engine::new).
///
/// # Validation
/// `validate()` checks every section; construction rejects invalid configs
/// before any subsystem is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default seeds used when `start` is called with an empty list.
    pub seeds: Vec<String>,
    /// Domains admitted by discovery; empty admits everything.
    pub allowed_domains: Vec<String>,
    /// Maximum link depth; seeds are depth 0.
    pub max_depth: usize,
    /// Hard cap on admitted URLs; 0 means unlimited.
    pub max_pages: usize,
    /// Politeness delay applied by the default fetcher before each request.
    pub request_delay: Duration,
    /// Per-fetch wall-clock timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Honor robots.txt in the default fetcher.
    pub respect_robots: bool,

    pub discovery_workers: usize,
    pub fetch_workers: usize,
    pub process_workers: usize,
    pub output_workers: usize,
    /// Bound on every inter-stage queue.
    pub buffer_size: usize,

    pub rate_limit: RateLimitConfig,
    pub resources: ResourceConfig,
    pub asset_policy: AssetPolicy,

    pub metrics_enabled: bool,
    pub metrics_backend: MetricsBackend,

    /// Consult the checkpoint on start and skip completed seeds.
    pub resume: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            allowed_domains: Vec::new(),
            max_depth: 3,
            max_pages: 0,
            request_delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            user_agent: "eddy/0.3".to_string(),
            respect_robots: true,
            discovery_workers: 2,
            fetch_workers: 4,
            process_workers: 2,
            output_workers: 1,
            buffer_size: 64,
            rate_limit: RateLimitConfig::default(),
            resources: ResourceConfig::default(),
            asset_policy: AssetPolicy::default(),
            metrics_enabled: false,
            metrics_backend: MetricsBackend::Noop,
            resume: false,
        }
    }
}

impl EngineConfig {
    /// Validate all sections; returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("discovery_workers", self.discovery_workers),
            ("fetch_workers", self.fetch_workers),
            ("process_workers", self.process_workers),
            ("output_workers", self.output_workers),
            ("buffer_size", self.buffer_size),
        ] {
            if value == 0 {
                return Err(format!("{name} must be > 0"));
            }
        }
        if self.timeout.is_zero() {
            return Err("timeout must be > 0".into());
        }
        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".into());
        }
        if self.resume && self.resources.checkpoint_path.is_none() {
            return Err("resume requires resources.checkpoint_path".into());
        }
        self.rate_limit.validate()?;
        self.resources.validate()?;
        self.asset_policy.validate()?;
        Ok(())
    }

    pub fn with_seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_resources(mut self, resources: ResourceConfig) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_asset_policy(mut self, asset_policy: AssetPolicy) -> Self {
        self.asset_policy = asset_policy;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_metrics(mut self, backend: MetricsBackend) -> Self {
        self.metrics_enabled = true;
        self.metrics_backend = backend;
        self
    }

    /// Small pools and tight limits for local iteration.
    pub fn development() -> Self {
        Self {
            max_depth: 2,
            max_pages: 50,
            fetch_workers: 2,
            respect_robots: false,
            buffer_size: 16,
            ..Default::default()
        }
    }

    /// Wide pools for crawling well-provisioned sites.
    pub fn high_throughput() -> Self {
        Self {
            fetch_workers: 16,
            process_workers: 8,
            output_workers: 2,
            buffer_size: 256,
            rate_limit: RateLimitConfig {
                initial_rps: 20.0,
                max_rps: 100.0,
                bucket_capacity: 40.0,
                ..Default::default()
            },
            resources: ResourceConfig {
                max_in_flight: 64,
                cache_capacity: 1024,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Conservative crawl for fragile or rate-sensitive hosts.
    pub fn polite() -> Self {
        Self {
            fetch_workers: 1,
            request_delay: Duration::from_millis(500),
            rate_limit: RateLimitConfig {
                initial_rps: 1.0,
                max_rps: 2.0,
                bucket_capacity: 2.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn presets_validate() {
        assert!(EngineConfig::development().validate().is_ok());
        assert!(EngineConfig::high_throughput().validate().is_ok());
        assert!(EngineConfig::polite().validate().is_ok());
    }

    #[test]
    fn builder_methods_chain() {
        let config = EngineConfig::default()
            .with_seeds(["https://example.com/"])
            .with_allowed_domains(["example.com"])
            .with_max_depth(5)
            .with_max_pages(100)
            .with_user_agent("custom/1.0");
        assert_eq!(config.seeds.len(), 1);
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.max_pages, 100);
        assert_eq!(config.user_agent, "custom/1.0");
    }

    #[test]
    fn resume_without_checkpoint_path_is_rejected() {
        let config = EngineConfig::default().with_resume(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn nested_section_errors_propagate() {
        let mut config = EngineConfig::default();
        config.rate_limit.min_rps = -1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.asset_policy.rewrite_prefix = "bad".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = EngineConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
