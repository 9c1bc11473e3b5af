//! The asset strategy seam.
//!
//! The engine drives its four phases through this trait so hosts can swap
//! any phase (custom discovery selectors, a different store, their own
//! rewriter) while keeping the accounting and event plumbing.

use crate::decide::{decide, AssetAction};
use crate::discover::{discover, AssetRef};
use crate::execute::{execute, ExecuteOutcome};
use crate::policy::AssetPolicy;
use crate::rewrite::rewrite;
use async_trait::async_trait;
use eddy_types::AssetFetcher;
use std::sync::Arc;
use url::Url;

/// Pluggable implementation of the four asset phases.
#[async_trait]
pub trait AssetStrategy: Send + Sync {
    /// List asset references in the page content, in document order.
    fn discover(&self, content: &str, base: &Url) -> Vec<AssetRef>;

    /// Map references to actions under the policy.
    fn decide(&self, refs: Vec<AssetRef>) -> Vec<AssetAction>;

    /// Fetch, optimize, and hash the decided assets.
    async fn execute(&self, actions: &[AssetAction]) -> ExecuteOutcome;

    /// Produce the rewritten page content. Must be a pure function of its
    /// inputs: failed materializations keep their original references.
    fn rewrite(&self, content: &str, materialized: &[crate::MaterializedAsset]) -> String;
}

/// The built-in strategy: scraper discovery, policy rules, bounded
/// concurrent fetches through the injected [`AssetFetcher`],
/// content-addressed rewriting.
pub struct DefaultStrategy {
    policy: AssetPolicy,
    fetcher: Arc<dyn AssetFetcher>,
}

impl DefaultStrategy {
    pub fn new(policy: AssetPolicy, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { policy, fetcher }
    }
}

#[async_trait]
impl AssetStrategy for DefaultStrategy {
    fn discover(&self, content: &str, base: &Url) -> Vec<AssetRef> {
        discover(content, base)
    }

    fn decide(&self, refs: Vec<AssetRef>) -> Vec<AssetAction> {
        decide(refs, &self.policy)
    }

    async fn execute(&self, actions: &[AssetAction]) -> ExecuteOutcome {
        execute(actions, &self.fetcher, &self.policy).await
    }

    fn rewrite(&self, content: &str, materialized: &[crate::MaterializedAsset]) -> String {
        rewrite(content, materialized, &self.policy)
    }
}
