//! # Eddy Resources
//!
//! Resource management for the ingestion pipeline:
//!
//! - **Slots**: a counting semaphore capping concurrent in-flight fetches
//! - **Page cache**: LRU keyed by normalized URL; cold entries spill to disk
//!   as JSON and rehydrate on demand
//! - **Checkpoint**: append-only log of completed URLs, batched by a
//!   background flusher, read back as a set for resume
//!
//! Construction fails fast on directory-creation errors; per-item spill and
//! checkpoint I/O failures are logged and counted but never fatal.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod manager;
pub mod slots;

pub use cache::PageCache;
pub use checkpoint::{read_checkpoint, CheckpointWriter};
pub use config::ResourceConfig;
pub use manager::{ResourceManager, ResourceStats};
pub use slots::{SlotGuard, Slots};
