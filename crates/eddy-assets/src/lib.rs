//! # Eddy Assets
//!
//! Sub-resource handling for processed pages, in four phases:
//!
//! 1. **Discover** — parse the page and list referenced assets in document
//!    order (images, srcset candidates, stylesheets, preloads, scripts,
//!    media sources, linked documents)
//! 2. **Decide** — apply the policy: block list, allow list, per-page cap,
//!    inline-vs-download
//! 3. **Execute** — fetch bytes under bounded concurrency and a shared byte
//!    budget, optionally optimize, hash
//! 4. **Rewrite** — deterministically replace references with
//!    content-addressed paths or data URIs
//!
//! Asset work is best-effort throughout: individual failures are counted and
//! logged, and a page always continues to the output stage.

pub mod decide;
pub mod discover;
pub mod engine;
pub mod events;
pub mod execute;
pub mod policy;
pub mod rewrite;
pub mod strategy;

pub use decide::{decide, AssetAction, AssetMode};
pub use discover::{discover, AssetRef};
pub use engine::{AssetEngine, AssetMetricsSnapshot, AssetPageSummary};
pub use events::{AssetEvent, AssetEventKind};
pub use execute::{ExecuteOutcome, MaterializedAsset};
pub use policy::{AssetKind, AssetPolicy};
pub use rewrite::{rewrite, rewritten_path};
pub use strategy::{AssetStrategy, DefaultStrategy};
