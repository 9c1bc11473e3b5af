//! Fetched and enriched page content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// A fetched page as it moves through the pipeline.
///
/// A `Page` has exactly one owner at any instant: it is moved between stages
/// over the pipeline queues. The only place a copy is made is the page cache,
/// which stores a [`Clone`] so the original can continue downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    /// Absolute URL the page was fetched from.
    pub url: Url,
    /// Document title, empty until the process stage fills it.
    pub title: String,
    /// Raw body as returned by the fetcher.
    pub raw_html: String,
    /// Cleaned text content (boilerplate stripped).
    pub cleaned_text: String,
    /// Markdown rendering of the main content.
    pub markdown: String,
    /// Outbound links, absolutized against the page URL.
    pub links: Vec<Url>,
    /// Image references as discovered in the document.
    pub images: Vec<String>,
    /// Extracted metadata.
    pub metadata: PageMetadata,
    /// When the fetch completed.
    pub crawled_at: DateTime<Utc>,
    /// When processing completed; `None` until the process stage ran.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Page {
    /// Create a page fresh out of the fetch stage.
    pub fn new(url: Url, raw_html: String) -> Self {
        Self {
            url,
            title: String::new(),
            raw_html,
            cleaned_text: String::new(),
            markdown: String::new(),
            links: Vec::new(),
            images: Vec::new(),
            metadata: PageMetadata::default(),
            crawled_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Word count of the cleaned text.
    pub fn word_count(&self) -> usize {
        self.cleaned_text.split_whitespace().count()
    }
}

/// Metadata extracted from a page during processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub published: Option<DateTime<Utc>>,
    pub word_count: usize,
    /// Response headers the fetcher chose to retain.
    pub headers: HashMap<String, String>,
    /// Open Graph subset.
    pub og: OpenGraph,
}

/// The Open Graph properties the processor extracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenGraph {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_page_has_fetch_timestamp_only() {
        let url = Url::parse("https://example.com/a").unwrap();
        let page = Page::new(url, "<html></html>".into());
        assert!(page.processed_at.is_none());
        assert!(page.title.is_empty());
    }

    #[test]
    fn word_count_counts_whitespace_separated_tokens() {
        let url = Url::parse("https://example.com/a").unwrap();
        let mut page = Page::new(url, String::new());
        page.cleaned_text = "one two  three\nfour".into();
        assert_eq!(page.word_count(), 4);
    }

    #[test]
    fn page_roundtrips_through_json() {
        let url = Url::parse("https://example.com/a?x=1").unwrap();
        let mut page = Page::new(url.clone(), "<p>hi</p>".into());
        page.title = "Hi".into();
        page.links.push(Url::parse("https://example.com/b").unwrap());

        let encoded = serde_json::to_string(&page).unwrap();
        let decoded: Page = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.url, url);
        assert_eq!(decoded.title, "Hi");
        assert_eq!(decoded.links.len(), 1);
    }
}
