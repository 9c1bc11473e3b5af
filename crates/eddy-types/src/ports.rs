//! Capability ports supplied by the embedding host.
//!
//! The engine orchestrates; hosts decide how bytes are fetched, how HTML is
//! turned into content, and where results land. Each port is a narrow
//! `Send + Sync` trait so concrete types can compose them freely. Default
//! implementations live in `eddy-engine`.

use crate::error::CrawlError;
use crate::page::Page;
use crate::result::CrawlResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Raw fetch outcome handed to the fetch stage.
///
/// Besides the body, it carries what the adaptive rate limiter needs as
/// feedback: status, observed latency, and any `Retry-After` hint.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub body: String,
    pub status: u16,
    pub latency: Duration,
    /// Response headers the fetcher chose to retain (content-type etc.).
    pub headers: HashMap<String, String>,
    /// Parsed `Retry-After` when the server sent one.
    pub retry_after: Option<Duration>,
}

/// Raw bytes for a sub-resource, used by the asset engine.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub url: Url,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Fetches one page. Transport failures and HTTP statuses map onto the
/// [`CrawlError`] taxonomy; the stage decides what is retried.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, CrawlError>;
}

/// Enriches a fetched page: cleaning, extraction, markdown, metadata,
/// link/image enumeration, content validation.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, page: Page) -> Result<Page, CrawlError>;
}

/// Receives terminal records from the output stage.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, result: &CrawlResult) -> Result<(), CrawlError>;
    async fn flush(&self) -> Result<(), CrawlError>;
    async fn close(&self) -> Result<(), CrawlError>;
    /// Stable name used in `stage="output"` failure records.
    fn name(&self) -> &str;
}

/// Fetches asset bytes for the asset engine. Kept separate from [`Fetcher`]
/// so asset traffic can use its own client, budget, and test double.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch_bytes(&self, url: &Url) -> Result<FetchedBytes, CrawlError>;
}
