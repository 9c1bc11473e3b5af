//! Terminal record for a crawled URL.

use crate::error::CrawlError;
use crate::page::Page;
use serde::{Deserialize, Serialize};

/// The pipeline stage at which a task terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStage {
    Discovery,
    Fetch,
    Process,
    Asset,
    Output,
}

impl CrawlStage {
    /// Stable lowercase name, used in metrics labels and serialized results.
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStage::Discovery => "discovery",
            CrawlStage::Fetch => "fetch",
            CrawlStage::Process => "process",
            CrawlStage::Asset => "asset",
            CrawlStage::Output => "output",
        }
    }
}

impl std::fmt::Display for CrawlStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal record for a URL: produced exactly once per admitted URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    /// Normalized URL the record is about.
    pub url: String,
    /// The enriched page on success.
    pub page: Option<Page>,
    /// The typed failure on error.
    pub error: Option<CrawlError>,
    /// Stage at which the task terminated.
    pub stage: CrawlStage,
    pub success: bool,
    /// Whether the failure class was retryable in principle.
    pub retryable: bool,
    /// HTTP status when one was observed.
    pub status: Option<u16>,
}

impl CrawlResult {
    /// Successful terminal record carrying the finished page.
    pub fn success(url: String, page: Page, status: Option<u16>) -> Self {
        Self {
            url,
            page: Some(page),
            error: None,
            stage: CrawlStage::Output,
            success: true,
            retryable: false,
            status,
        }
    }

    /// Failure terminal record at the given stage.
    pub fn failure(url: String, stage: CrawlStage, error: CrawlError) -> Self {
        let retryable = error.is_retryable();
        let status = match &error {
            CrawlError::Http { status } => Some(*status),
            CrawlError::Transport { status, .. } => *status,
            _ => None,
        };
        Self {
            url,
            page: None,
            error: Some(error),
            stage,
            success: false,
            retryable,
            status,
        }
    }
}
