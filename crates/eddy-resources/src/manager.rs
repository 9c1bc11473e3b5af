//! Facade over slots, cache, and checkpoint.

use crate::cache::PageCache;
use crate::checkpoint::{read_checkpoint, CheckpointWriter};
use crate::config::ResourceConfig;
use crate::slots::{SlotGuard, Slots};
use eddy_types::Page;
use std::collections::HashSet;

/// Point-in-time resource statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub cache_entries: usize,
    pub spill_files: usize,
    pub in_flight: usize,
    pub checkpoint_queued: usize,
    pub checkpoint_dropped: u64,
}

/// Caps concurrent work, caches pages, and records completed URLs.
pub struct ResourceManager {
    slots: Slots,
    cache: PageCache,
    checkpoint: Option<CheckpointWriter>,
}

impl ResourceManager {
    /// Construct from config. Fails only on directory-creation errors.
    pub fn new(config: &ResourceConfig) -> std::io::Result<Self> {
        let cache = PageCache::new(config.cache_capacity, config.spill_dir.clone())?;
        let checkpoint = match &config.checkpoint_path {
            Some(path) => Some(CheckpointWriter::new(
                path.clone(),
                config.checkpoint_interval,
                config.checkpoint_queue,
            )?),
            None => None,
        };
        Ok(Self {
            slots: Slots::new(config.max_in_flight),
            cache,
            checkpoint,
        })
    }

    /// Wait for a free in-flight slot.
    pub async fn acquire_slot(&self) -> SlotGuard {
        self.slots.acquire().await
    }

    /// Cache a deep copy of the page.
    pub async fn store_page(&self, url: &str, page: &Page) {
        self.cache.store(url, page).await;
    }

    /// Look a page up in cache or spill.
    pub async fn get_page(&self, url: &str) -> Option<Page> {
        self.cache.get(url).await
    }

    /// Queue a completed URL for the checkpoint log. Non-blocking.
    pub fn checkpoint(&self, url: &str) {
        if let Some(writer) = &self.checkpoint {
            writer.record(url);
        }
    }

    /// Load the checkpoint file into a set of completed URLs.
    pub fn completed_urls(&self, config: &ResourceConfig) -> HashSet<String> {
        match &config.checkpoint_path {
            Some(path) => read_checkpoint(path),
            None => HashSet::new(),
        }
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            cache_entries: self.cache.entries(),
            spill_files: self.cache.spill_files(),
            in_flight: self.slots.in_flight(),
            checkpoint_queued: self.checkpoint.as_ref().map_or(0, |c| c.queued()),
            checkpoint_dropped: self.checkpoint.as_ref().map_or(0, |c| c.dropped()),
        }
    }

    /// Flush and stop the checkpoint flusher. Idempotent.
    pub async fn close(&self) {
        if let Some(writer) = &self.checkpoint {
            writer.close().await;
        }
    }
}
