//! Asset discovery: parse a page and list its sub-resource references.

use crate::policy::AssetKind;
use eddy_types::normalize_url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Extensions treated as linked documents when found on anchors.
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip"];

/// One discovered asset reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    /// Absolute, normalized asset URL.
    pub url: Url,
    pub kind: AssetKind,
    /// Attribute the reference came from (`src`, `srcset`, `href`).
    pub attr: &'static str,
    /// The reference text exactly as written in the document; the rewrite
    /// phase replaces this substring.
    pub original: String,
}

/// Parse the page content and return asset references in document order.
///
/// Duplicate URLs keep only their first occurrence. References that fail to
/// resolve against the base are skipped.
pub fn discover(content: &str, base: &Url) -> Vec<AssetRef> {
    let document = Html::parse_document(content);
    let mut refs = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut push = |raw: &str, kind: AssetKind, attr: &'static str| {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
            return;
        }
        let Ok(joined) = base.join(raw) else {
            debug!(reference = raw, "unresolvable asset reference");
            return;
        };
        let Ok(url) = normalize_url(joined.as_str()) else {
            return;
        };
        if seen.insert(url.as_str().to_string()) {
            refs.push(AssetRef {
                url,
                kind,
                attr,
                original: raw.to_string(),
            });
        }
    };

    for_each(&document, "img[src]", |el| {
        if let Some(src) = el.value().attr("src") {
            push(src, AssetKind::Image, "src");
        }
    });
    for_each(&document, "img[srcset]", |el| {
        if let Some(srcset) = el.value().attr("srcset") {
            for candidate in srcset_candidates(srcset) {
                push(candidate, AssetKind::Image, "srcset");
            }
        }
    });
    for_each(&document, r#"link[rel="stylesheet"][href]"#, |el| {
        if let Some(href) = el.value().attr("href") {
            push(href, AssetKind::Stylesheet, "href");
        }
    });
    for_each(&document, r#"link[rel="preload"][href]"#, |el| {
        if let Some(href) = el.value().attr("href") {
            push(href, kind_from_extension(href).unwrap_or(AssetKind::Other), "href");
        }
    });
    for_each(&document, "script[src]", |el| {
        if let Some(src) = el.value().attr("src") {
            push(src, AssetKind::Script, "src");
        }
    });
    for_each(&document, "video source[src], audio source[src]", |el| {
        if let Some(src) = el.value().attr("src") {
            push(src, AssetKind::Media, "src");
        }
    });
    for_each(&document, "picture source[srcset]", |el| {
        if let Some(srcset) = el.value().attr("srcset") {
            for candidate in srcset_candidates(srcset) {
                push(candidate, AssetKind::Image, "srcset");
            }
        }
    });
    for_each(&document, "a[href]", |el| {
        if let Some(href) = el.value().attr("href") {
            if matches!(kind_from_extension(href), Some(AssetKind::Document)) {
                push(href, AssetKind::Document, "href");
            }
        }
    });

    refs
}

fn for_each<'a>(document: &'a Html, selector: &str, mut f: impl FnMut(scraper::ElementRef<'a>)) {
    // Selectors are compile-time literals; parse failure is a programmer error
    // caught by the tests below.
    if let Ok(selector) = Selector::parse(selector) {
        for element in document.select(&selector) {
            f(element);
        }
    }
}

/// Split a `srcset` attribute into its URL candidates, dropping descriptors.
fn srcset_candidates(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|entry| entry.trim().split_whitespace().next())
        .filter(|url| !url.is_empty())
}

/// Classify a reference by its path extension.
pub(crate) fn kind_from_extension(reference: &str) -> Option<AssetKind> {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    if path.len() == ext.len() {
        return None; // no dot at all
    }
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "avif" => Some(AssetKind::Image),
        "css" => Some(AssetKind::Stylesheet),
        "js" | "mjs" => Some(AssetKind::Script),
        "mp4" | "webm" | "mp3" | "ogg" | "wav" => Some(AssetKind::Media),
        ext if DOCUMENT_EXTENSIONS.contains(&ext) => Some(AssetKind::Document),
        _ => None,
    }
}
