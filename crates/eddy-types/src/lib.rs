//! # Eddy Types
//!
//! Shared types for the Eddy site-ingestion engine:
//!
//! - **Data model**: [`Page`], [`PageMetadata`], [`CrawlResult`], [`CrawlStage`]
//! - **Error taxonomy**: [`CrawlError`] with retryability classification
//! - **Capability ports**: [`Fetcher`], [`Processor`], [`OutputSink`],
//!   [`AssetFetcher`] — narrow traits supplied by the embedding host
//! - **Clock abstraction**: [`Clock`] for testable time-dependent code
//! - **URL handling**: normalization and domain keying shared by admission,
//!   caching, checkpointing, and rate limiting
//!
//! This crate sits at the bottom of the workspace dependency graph so that
//! the limiter, resource manager, asset engine, pipeline, and facade can all
//! agree on one vocabulary without circular dependencies.

pub mod clock;
pub mod error;
pub mod hash;
pub mod page;
pub mod ports;
pub mod result;
pub mod urlnorm;

pub use clock::{Clock, ManualClock, RealClock};
pub use error::CrawlError;
pub use page::{Page, PageMetadata};
pub use ports::{AssetFetcher, FetchedBytes, FetchedPage, Fetcher, OutputSink, Processor};
pub use result::{CrawlResult, CrawlStage};
pub use urlnorm::{domain_key, normalize_url};
