//! LRU page cache with disk spill.

use eddy_types::hash::fnv64;
use eddy_types::Page;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

struct CacheInner {
    /// `None` when the configured capacity is zero.
    lru: Option<LruCache<String, Page>>,
    /// URL → spill file for entries evicted to disk.
    spill: HashMap<String, PathBuf>,
    spill_writes: u64,
    spill_errors: u64,
}

/// Bounded page cache keyed by normalized URL.
///
/// Hot entries live in an LRU; evictions are JSON-encoded to
/// `{spill_dir}/spill-{unix_nanos}-{fnv64_hex}.json` and rehydrated (and the
/// file deleted) on the next `get`. Pages handed out are deep copies so the
/// caller never aliases cache-owned state.
pub struct PageCache {
    inner: Mutex<CacheInner>,
    spill_dir: Option<PathBuf>,
}

impl PageCache {
    /// Create the cache, creating the spill directory if configured.
    ///
    /// Directory creation failure is fatal by design: a manager that silently
    /// cannot spill would violate the capacity bound.
    pub fn new(capacity: usize, spill_dir: Option<PathBuf>) -> std::io::Result<Self> {
        if let Some(dir) = &spill_dir {
            std::fs::create_dir_all(dir)?;
        }
        let lru = NonZeroUsize::new(capacity).map(LruCache::new);
        Ok(Self {
            inner: Mutex::new(CacheInner {
                lru,
                spill: HashMap::new(),
                spill_writes: 0,
                spill_errors: 0,
            }),
            spill_dir,
        })
    }

    /// Insert a deep copy of the page at the front of the LRU.
    ///
    /// With a zero-capacity cache this is a no-op: pages are simply not
    /// retained and the engine keeps functioning.
    pub async fn store(&self, url: &str, page: &Page) {
        let evicted = {
            let mut inner = lock(&self.inner);
            let Some(lru) = inner.lru.as_mut() else {
                return;
            };
            match lru.push(url.to_string(), page.clone()) {
                // push returns the previous value on key replacement; only a
                // different key means a real eviction.
                Some((old_url, old_page)) if old_url != url => Some((old_url, old_page)),
                _ => None,
            }
        };

        if let Some((old_url, old_page)) = evicted {
            self.spill(&old_url, old_page).await;
        }
    }

    /// Fetch a deep copy, probing the LRU first and spill files second.
    ///
    /// A spill hit rehydrates the page into the LRU and deletes the file.
    /// Any decode or I/O trouble is a logged miss.
    pub async fn get(&self, url: &str) -> Option<Page> {
        let spill_path = {
            let mut inner = lock(&self.inner);
            if let Some(lru) = inner.lru.as_mut() {
                if let Some(page) = lru.get(url) {
                    return Some(page.clone());
                }
            }
            inner.spill.get(url).cloned()
        };

        let path = spill_path?;
        let page = match self.read_spill(&path).await {
            Ok(page) => page,
            Err(err) => {
                warn!(url, path = %path.display(), error = %err, "spill rehydrate failed");
                let mut inner = lock(&self.inner);
                inner.spill.remove(url);
                inner.spill_errors += 1;
                return None;
            }
        };

        if let Err(err) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %err, "spill file removal failed");
        }

        let evicted = {
            let mut inner = lock(&self.inner);
            inner.spill.remove(url);
            match inner.lru.as_mut() {
                Some(lru) => match lru.push(url.to_string(), page.clone()) {
                    Some((old_url, old_page)) if old_url != url => Some((old_url, old_page)),
                    _ => None,
                },
                None => None,
            }
        };
        if let Some((old_url, old_page)) = evicted {
            self.spill(&old_url, old_page).await;
        }

        Some(page)
    }

    /// Number of entries resident in memory.
    pub fn entries(&self) -> usize {
        lock(&self.inner).lru.as_ref().map_or(0, |lru| lru.len())
    }

    /// Number of entries currently spilled to disk.
    pub fn spill_files(&self) -> usize {
        lock(&self.inner).spill.len()
    }

    pub fn spill_errors(&self) -> u64 {
        lock(&self.inner).spill_errors
    }

    async fn spill(&self, url: &str, page: Page) {
        let Some(dir) = &self.spill_dir else {
            debug!(url, "no spill dir configured, dropping evicted page");
            return;
        };

        let path = dir.join(spill_file_name(url));
        let encoded = match serde_json::to_vec(&page) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(url, error = %err, "spill encode failed");
                lock(&self.inner).spill_errors += 1;
                return;
            }
        };

        match tokio::fs::write(&path, encoded).await {
            Ok(()) => {
                let mut inner = lock(&self.inner);
                inner.spill.insert(url.to_string(), path);
                inner.spill_writes += 1;
            }
            Err(err) => {
                warn!(url, path = %path.display(), error = %err, "spill write failed");
                lock(&self.inner).spill_errors += 1;
            }
        }
    }

    async fn read_spill(&self, path: &Path) -> Result<Page, String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| err.to_string())?;
        serde_json::from_slice(&bytes).map_err(|err| err.to_string())
    }
}

fn spill_file_name(url: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("spill-{}-{:016x}.json", nanos, fnv64(url))
}

fn lock(mutex: &Mutex<CacheInner>) -> std::sync::MutexGuard<'_, CacheInner> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
