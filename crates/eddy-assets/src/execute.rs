//! Execute phase: fetch, optimize, and hash the decided assets.

use crate::decide::{AssetAction, AssetMode};
use crate::discover::AssetRef;
use crate::policy::{AssetKind, AssetPolicy};
use eddy_types::{AssetFetcher, CrawlError};
use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering::Relaxed};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// A fetched (and possibly optimized) asset with its content hash.
#[derive(Debug, Clone)]
pub struct MaterializedAsset {
    pub asset: AssetRef,
    /// Lowercase hex SHA-256 of the final bytes.
    pub hash: String,
    pub bytes: Vec<u8>,
    /// Tags for the optimizations that were applied.
    pub optimizations: Vec<&'static str>,
    pub mode: AssetMode,
}

/// Result of executing one page's actions.
#[derive(Debug, Default)]
pub struct ExecuteOutcome {
    pub materialized: Vec<MaterializedAsset>,
    pub failures: Vec<(AssetRef, CrawlError)>,
}

/// Fetch every Download/Inline action with at most `max_concurrent` in
/// flight and a shared remaining-bytes budget. Individual failures never
/// abort sibling work.
pub async fn execute(
    actions: &[AssetAction],
    fetcher: &Arc<dyn AssetFetcher>,
    policy: &AssetPolicy,
) -> ExecuteOutcome {
    let semaphore = Arc::new(Semaphore::new(policy.max_concurrent.max(1)));
    let remaining: Arc<AtomicI64> = Arc::new(AtomicI64::new(if policy.max_bytes == 0 {
        i64::MAX
    } else {
        policy.max_bytes as i64
    }));

    let mut tasks = FuturesUnordered::new();
    for action in actions {
        if action.mode == AssetMode::Skip {
            continue;
        }
        let action = action.clone();
        let fetcher = Arc::clone(fetcher);
        let semaphore = Arc::clone(&semaphore);
        let remaining = Arc::clone(&remaining);
        let optimize = policy.optimize;
        let inline_max = policy.inline_max_bytes;

        tasks.push(async move {
            // Semaphore closed is unreachable: we own it for this call.
            let _permit = semaphore.acquire_owned().await.ok();
            let result = fetch_one(&action, fetcher.as_ref(), &remaining, optimize, inline_max).await;
            (action.asset, result)
        });
    }

    let mut outcome = ExecuteOutcome::default();
    while let Some((asset, result)) = tasks.next().await {
        match result {
            Ok(materialized) => outcome.materialized.push(materialized),
            Err(err) => {
                debug!(url = %asset.url, error = %err, "asset fetch failed");
                outcome.failures.push((asset, err));
            }
        }
    }
    // Deterministic downstream processing regardless of completion order.
    outcome
        .materialized
        .sort_by(|a, b| a.asset.original.cmp(&b.asset.original));
    outcome
}

async fn fetch_one(
    action: &AssetAction,
    fetcher: &dyn AssetFetcher,
    remaining: &AtomicI64,
    optimize: bool,
    inline_max: u64,
) -> Result<MaterializedAsset, CrawlError> {
    let fetched = fetcher.fetch_bytes(&action.asset.url).await?;
    let size = fetched.bytes.len() as i64;

    // Atomically reserve the bytes so concurrent fetches can never commit
    // past the shared budget between them.
    let reserved = remaining
        .fetch_update(Relaxed, Relaxed, |current| {
            (current >= size).then(|| current - size)
        })
        .is_ok();
    if !reserved {
        return Err(CrawlError::Asset(format!(
            "byte budget exhausted for {}",
            action.asset.url
        )));
    }

    let (bytes, optimizations) = if optimize {
        optimize_bytes(action.asset.kind, fetched.bytes)
    } else {
        (fetched.bytes, Vec::new())
    };

    // Inline decisions made on expected size are re-checked against the
    // actual payload; oversized candidates fall back to download.
    let mode = match action.mode {
        AssetMode::Inline if bytes.len() as u64 > inline_max => AssetMode::Download,
        other => other,
    };

    let hash = hex::encode(Sha256::digest(&bytes));
    Ok(MaterializedAsset {
        asset: action.asset.clone(),
        hash,
        bytes,
        optimizations,
        mode,
    })
}

/// Type-specific optimization. The content hash is computed from the bytes
/// this returns, so identical inputs always address identical outputs.
fn optimize_bytes(kind: AssetKind, bytes: Vec<u8>) -> (Vec<u8>, Vec<&'static str>) {
    match kind {
        AssetKind::Stylesheet => match String::from_utf8(bytes) {
            Ok(text) => {
                let collapsed = collapse_whitespace(&text);
                (collapsed.into_bytes(), vec!["css-collapse"])
            }
            Err(err) => (err.into_bytes(), Vec::new()),
        },
        AssetKind::Script => match String::from_utf8(bytes) {
            Ok(text) => {
                let minified = strip_blank_lines(&text);
                (minified.into_bytes(), vec!["js-minify"])
            }
            Err(err) => (err.into_bytes(), Vec::new()),
        },
        _ => (bytes, Vec::new()),
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_whitespace && !out.is_empty() {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(ch);
            in_whitespace = false;
        }
    }
    out.trim_end().to_string()
}

fn strip_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
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

    fn action(url: &str, kind: AssetKind, mode: AssetMode) -> AssetAction {
        AssetAction {
            asset: AssetRef {
                url: Url::parse(url).unwrap(),
                kind,
                attr: "src",
                original: url.to_string(),
            },
            mode,
        }
    }

    fn fetcher(pairs: &[(&str, &[u8])]) -> Arc<dyn AssetFetcher> {
        Arc::new(MapFetcher {
            responses: pairs
                .iter()
                .map(|(url, bytes)| (url.to_string(), bytes.to_vec()))
                .collect(),
        })
    }

    #[tokio::test]
    async fn materializes_with_sha256_of_final_bytes() {
        let fetcher = fetcher(&[("https://e.com/a.png", b"pngbytes")]);
        let actions = vec![action("https://e.com/a.png", AssetKind::Image, AssetMode::Download)];
        let outcome = execute(&actions, &fetcher, &AssetPolicy::default()).await;

        assert_eq!(outcome.materialized.len(), 1);
        let expected = hex::encode(Sha256::digest(b"pngbytes"));
        assert_eq!(outcome.materialized[0].hash, expected);
    }

    #[tokio::test]
    async fn failure_does_not_abort_siblings() {
        let fetcher = fetcher(&[("https://e.com/ok.png", b"ok")]);
        let actions = vec![
            action("https://e.com/missing.png", AssetKind::Image, AssetMode::Download),
            action("https://e.com/ok.png", AssetKind::Image, AssetMode::Download),
        ];
        let outcome = execute(&actions, &fetcher, &AssetPolicy::default()).await;
        assert_eq!(outcome.materialized.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn byte_budget_rejects_overflow() {
        let fetcher = fetcher(&[
            ("https://e.com/big1.bin", &[0u8; 600][..]),
            ("https://e.com/big2.bin", &[0u8; 600][..]),
        ]);
        let actions = vec![
            action("https://e.com/big1.bin", AssetKind::Other, AssetMode::Download),
            action("https://e.com/big2.bin", AssetKind::Other, AssetMode::Download),
        ];
        let policy = AssetPolicy {
            max_bytes: 1000,
            max_concurrent: 1,
            ..Default::default()
        };
        let outcome = execute(&actions, &fetcher, &policy).await;
        assert_eq!(outcome.materialized.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_never_exceed_budget() {
        // The budget fits exactly two of the four 300-byte assets; with all
        // four in flight at once, only two reservations can ever commit.
        let body = [0u8; 300];
        let fetcher = fetcher(&[
            ("https://e.com/1.bin", &body[..]),
            ("https://e.com/2.bin", &body[..]),
            ("https://e.com/3.bin", &body[..]),
            ("https://e.com/4.bin", &body[..]),
        ]);
        let actions: Vec<AssetAction> = (1..=4)
            .map(|i| {
                action(
                    &format!("https://e.com/{i}.bin"),
                    AssetKind::Other,
                    AssetMode::Download,
                )
            })
            .collect();
        let policy = AssetPolicy {
            max_bytes: 600,
            max_concurrent: 4,
            ..Default::default()
        };

        let outcome = execute(&actions, &fetcher, &policy).await;
        assert_eq!(outcome.materialized.len(), 2);
        assert_eq!(outcome.failures.len(), 2);
        let committed: usize = outcome.materialized.iter().map(|a| a.bytes.len()).sum();
        assert!(committed as u64 <= policy.max_bytes);
    }

    #[tokio::test]
    async fn css_is_collapsed_before_hashing() {
        let fetcher = fetcher(&[("https://e.com/a.css", b"body  {\n  color: red;\n}\n")]);
        let actions =
            vec![action("https://e.com/a.css", AssetKind::Stylesheet, AssetMode::Download)];
        let outcome = execute(&actions, &fetcher, &AssetPolicy::default()).await;

        let asset = &outcome.materialized[0];
        assert_eq!(asset.optimizations, vec!["css-collapse"]);
        assert_eq!(asset.bytes, b"body { color: red; }");
        assert_eq!(asset.hash, hex::encode(Sha256::digest(b"body { color: red; }")));
    }

    #[tokio::test]
    async fn oversized_inline_candidate_demotes_to_download() {
        let big_svg = vec![b'x'; 5000];
        let fetcher = fetcher(&[("https://e.com/icon.svg", &big_svg[..])]);
        let actions = vec![action("https://e.com/icon.svg", AssetKind::Image, AssetMode::Inline)];
        let policy = AssetPolicy {
            inline_max_bytes: 1024,
            ..Default::default()
        };
        let outcome = execute(&actions, &fetcher, &policy).await;
        assert_eq!(outcome.materialized[0].mode, AssetMode::Download);
    }

    #[test]
    fn whitespace_collapse_is_stable() {
        assert_eq!(collapse_whitespace("a  b\n\tc  "), "a b c");
        assert_eq!(collapse_whitespace(collapse_whitespace("a  b").as_str()), "a b");
    }

    #[test]
    fn blank_line_stripping() {
        assert_eq!(strip_blank_lines("a\n\n  \nb\n"), "a\nb");
    }
}
