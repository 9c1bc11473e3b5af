//! The asset engine: orchestrates discover → decide → execute → rewrite.

use crate::decide::AssetMode;
use crate::events::{AssetEvent, AssetEventKind, EventRing};
use crate::policy::AssetPolicy;
use crate::strategy::{AssetStrategy, DefaultStrategy};
use eddy_types::{AssetFetcher, CrawlError, Page};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use tracing::debug;

/// Hook invoked for every asset event, used by the facade to mirror events
/// onto the telemetry bus.
pub type EventHook = Arc<dyn Fn(&AssetEvent) + Send + Sync>;

/// Atomic counters exposed through [`AssetEngine::metrics`].
#[derive(Debug, Default)]
struct Counters {
    discovered: AtomicU64,
    selected: AtomicU64,
    downloaded: AtomicU64,
    failed: AtomicU64,
    inlined: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Point-in-time asset metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetMetricsSnapshot {
    pub discovered: u64,
    pub selected: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub inlined: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Per-page outcome summary returned to the pipeline stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetPageSummary {
    pub discovered: usize,
    pub selected: usize,
    pub materialized: usize,
    pub failed: usize,
}

/// Discovers, downloads, rewrites, and accounts for page sub-resources.
pub struct AssetEngine {
    policy: AssetPolicy,
    strategy: Arc<dyn AssetStrategy>,
    counters: Counters,
    events: EventRing,
    hook: std::sync::RwLock<Option<EventHook>>,
}

impl AssetEngine {
    /// Validate the policy and build the engine with the default strategy.
    pub fn new(policy: AssetPolicy, fetcher: Arc<dyn AssetFetcher>) -> Result<Self, CrawlError> {
        policy.validate().map_err(CrawlError::Config)?;
        let strategy = Arc::new(DefaultStrategy::new(policy.clone(), fetcher));
        Ok(Self {
            policy,
            strategy,
            counters: Counters::default(),
            events: EventRing::default(),
            hook: std::sync::RwLock::new(None),
        })
    }

    /// Build with a host-supplied strategy.
    pub fn with_strategy(
        policy: AssetPolicy,
        strategy: Arc<dyn AssetStrategy>,
    ) -> Result<Self, CrawlError> {
        policy.validate().map_err(CrawlError::Config)?;
        Ok(Self {
            policy,
            strategy,
            counters: Counters::default(),
            events: EventRing::default(),
            hook: std::sync::RwLock::new(None),
        })
    }

    pub fn policy(&self) -> &AssetPolicy {
        &self.policy
    }

    /// Register the event mirror hook. Replaces any previous hook.
    pub fn set_event_hook(&self, hook: EventHook) {
        if let Ok(mut slot) = self.hook.write() {
            *slot = Some(hook);
        }
    }

    /// Run all four phases against the page, rewriting its content in place.
    ///
    /// Always best-effort: per-asset failures are counted and the page
    /// proceeds regardless.
    pub async fn process_page(&self, page: &mut Page) -> AssetPageSummary {
        if !self.policy.enabled {
            return AssetPageSummary::default();
        }

        let refs = self.strategy.discover(&page.raw_html, &page.url);
        let discovered = refs.len();
        self.counters.discovered.fetch_add(discovered as u64, Relaxed);
        for r in &refs {
            self.publish(AssetEvent::new(AssetEventKind::Discovered, r.url.as_str()));
        }

        let actions = self.strategy.decide(refs);
        let selected = actions
            .iter()
            .filter(|a| a.mode != AssetMode::Skip)
            .count();
        self.counters.selected.fetch_add(selected as u64, Relaxed);
        for action in actions.iter().filter(|a| a.mode != AssetMode::Skip) {
            self.publish(AssetEvent::new(
                AssetEventKind::Selected,
                action.asset.url.as_str(),
            ));
        }

        let outcome = self.strategy.execute(&actions).await;

        for asset in &outcome.materialized {
            let size = asset.bytes.len() as u64;
            self.counters.bytes_in.fetch_add(size, Relaxed);
            self.counters.bytes_out.fetch_add(size, Relaxed);
            let (kind, counter) = match asset.mode {
                AssetMode::Inline => (AssetEventKind::Inlined, &self.counters.inlined),
                _ => (AssetEventKind::Downloaded, &self.counters.downloaded),
            };
            counter.fetch_add(1, Relaxed);
            let mut event = AssetEvent::new(kind, asset.asset.url.as_str());
            event.bytes = Some(size);
            event.hash = Some(asset.hash.clone());
            self.publish(event);
        }
        for (asset, err) in &outcome.failures {
            self.counters.failed.fetch_add(1, Relaxed);
            let mut event = AssetEvent::new(AssetEventKind::Failed, asset.url.as_str());
            event.error = Some(err.to_string());
            self.publish(event);
        }

        let summary = AssetPageSummary {
            discovered,
            selected,
            materialized: outcome.materialized.len(),
            failed: outcome.failures.len(),
        };

        if !outcome.materialized.is_empty() {
            page.raw_html = self.strategy.rewrite(&page.raw_html, &outcome.materialized);
        }
        debug!(
            url = %page.url,
            selected,
            materialized = summary.materialized,
            failed = summary.failed,
            "asset pass complete"
        );
        summary
    }

    /// Atomic snapshot of the engine counters.
    pub fn metrics(&self) -> AssetMetricsSnapshot {
        AssetMetricsSnapshot {
            discovered: self.counters.discovered.load(Relaxed),
            selected: self.counters.selected.load(Relaxed),
            downloaded: self.counters.downloaded.load(Relaxed),
            failed: self.counters.failed.load(Relaxed),
            inlined: self.counters.inlined.load(Relaxed),
            bytes_in: self.counters.bytes_in.load(Relaxed),
            bytes_out: self.counters.bytes_out.load(Relaxed),
        }
    }

    /// The most recent asset events, oldest first.
    pub fn recent_events(&self) -> Vec<AssetEvent> {
        self.events.recent()
    }

    fn publish(&self, event: AssetEvent) {
        if let Ok(hook) = self.hook.read() {
            if let Some(hook) = hook.as_ref() {
                hook(&event);
            }
        }
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eddy_types::FetchedBytes;
    use std::collections::HashMap;
    use url::Url;

    struct MapFetcher {
        responses: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl AssetFetcher for MapFetcher {
        async fn fetch_bytes(&self, url: &Url) -> Result<FetchedBytes, CrawlError> {
            match self.responses.get(url.as_str()) {
                Some(bytes) => Ok(FetchedBytes {
                    url: url.clone(),
                    bytes: bytes.clone(),
                    content_type: None,
                }),
                None => Err(CrawlError::Asset(format!("no fixture for {url}"))),
            }
        }
    }

    fn engine_with(
        policy: AssetPolicy,
        pairs: &[(&str, &[u8])],
    ) -> AssetEngine {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(MapFetcher {
            responses: pairs
                .iter()
                .map(|(url, bytes)| (url.to_string(), bytes.to_vec()))
                .collect(),
        });
        AssetEngine::new(policy, fetcher).unwrap()
    }

    fn page(html: &str) -> Page {
        Page::new(Url::parse("https://e.com/post").unwrap(), html.to_string())
    }

    #[tokio::test]
    async fn full_pass_rewrites_and_counts() {
        let policy = AssetPolicy {
            enabled: true,
            ..Default::default()
        };
        let engine = engine_with(
            policy,
            &[
                ("https://e.com/css/a.css", b"body{color:red}"),
                ("https://e.com/img/a.png", b"png"),
            ],
        );
        let mut page = page(r#"<link rel="stylesheet" href="/css/a.css"><img src="/img/a.png">"#);
        let summary = engine.process_page(&mut page).await;

        assert_eq!(summary.materialized, 2);
        assert_eq!(summary.failed, 0);
        let metrics = engine.metrics();
        assert_eq!(metrics.discovered, 2);
        assert_eq!(metrics.selected, 2);
        assert_eq!(metrics.downloaded, 2);
        assert!(page.raw_html.contains("/assets/"));
        assert!(!page.raw_html.contains("/css/a.css"));
    }

    #[tokio::test]
    async fn rewrite_is_deterministic_across_runs() {
        let policy = AssetPolicy {
            enabled: true,
            ..Default::default()
        };
        let fixtures: &[(&str, &[u8])] = &[
            ("https://e.com/css/a.css", b"body{}"),
            ("https://e.com/img/a.png", b"png"),
        ];
        let html = r#"<link rel="stylesheet" href="/css/a.css"><img src="/img/a.png">"#;

        let engine_a = engine_with(policy.clone(), fixtures);
        let engine_b = engine_with(policy, fixtures);
        let mut page_a = page(html);
        let mut page_b = page(html);
        engine_a.process_page(&mut page_a).await;
        engine_b.process_page(&mut page_b).await;

        assert_eq!(page_a.raw_html, page_b.raw_html);
    }

    #[tokio::test]
    async fn failed_assets_keep_original_reference() {
        let policy = AssetPolicy {
            enabled: true,
            ..Default::default()
        };
        let engine = engine_with(policy, &[]);
        let mut page = page(r#"<img src="/img/missing.png">"#);
        let summary = engine.process_page(&mut page).await;

        assert_eq!(summary.failed, 1);
        assert!(page.raw_html.contains("/img/missing.png"));
        assert_eq!(engine.metrics().failed, 1);
    }

    #[tokio::test]
    async fn disabled_engine_is_a_noop() {
        let engine = engine_with(AssetPolicy::default(), &[]);
        let mut page = page(r#"<img src="/img/a.png">"#);
        let summary = engine.process_page(&mut page).await;
        assert_eq!(summary.discovered, 0);
        assert_eq!(engine.metrics(), AssetMetricsSnapshot::default());
    }

    #[tokio::test]
    async fn events_flow_to_ring_and_hook() {
        let policy = AssetPolicy {
            enabled: true,
            ..Default::default()
        };
        let engine = engine_with(policy, &[("https://e.com/a.png", b"png")]);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_hook = Arc::clone(&seen);
        engine.set_event_hook(Arc::new(move |_event| {
            seen_hook.fetch_add(1, Relaxed);
        }));

        let mut page = page(r#"<img src="/a.png">"#);
        engine.process_page(&mut page).await;

        let events = engine.recent_events();
        // discovered + selected + downloaded
        assert_eq!(events.len(), 3);
        assert_eq!(seen.load(Relaxed), 3);
        assert_eq!(events[0].kind, AssetEventKind::Discovered);
        assert_eq!(events.last().unwrap().kind, AssetEventKind::Downloaded);
    }

    #[test]
    fn invalid_policy_is_rejected_at_construction() {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(MapFetcher {
            responses: HashMap::new(),
        });
        let policy = AssetPolicy {
            rewrite_prefix: "no-slash".into(),
            ..Default::default()
        };
        assert!(AssetEngine::new(policy, fetcher).is_err());
    }
}
