//! Default capability implementations.
//!
//! Hosts can embed the engine with nothing but a config: these provide a
//! reqwest-backed fetcher (with an optional robots.txt gate), a
//! scraper-backed processor, and simple sinks. Each is replaceable through
//! [`EngineBuilder`](crate::EngineBuilder).

mod fetcher;
mod processor;
mod sinks;

pub use fetcher::{ReqwestAssetFetcher, ReqwestFetcher};
pub use processor::HtmlProcessor;
pub use sinks::{JsonlSink, MemorySink};
