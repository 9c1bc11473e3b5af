//! Scraper-backed default processor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eddy_types::{normalize_url, CrawlError, Page, Processor};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// Default content processor: title, cleaned text, minimal markdown,
/// link/image enumeration, metadata and Open Graph extraction, and a
/// non-empty-content validation gate.
#[derive(Debug, Default)]
pub struct HtmlProcessor;

impl HtmlProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for HtmlProcessor {
    async fn process(&self, mut page: Page) -> Result<Page, CrawlError> {
        // scraper's DOM types are not Send, so parsing stays inside a
        // single non-suspending block.
        let extracted = extract(&page.raw_html, &page.url);

        if extracted.text.trim().is_empty() {
            return Err(CrawlError::Process("document has no textual content".into()));
        }

        page.title = extracted.title;
        page.cleaned_text = extracted.text;
        page.markdown = extracted.markdown;
        page.links = extracted.links;
        page.images = extracted.images;
        page.metadata.author = extracted.author;
        page.metadata.description = extracted.description;
        page.metadata.keywords = extracted.keywords;
        page.metadata.published = extracted.published;
        page.metadata.og = extracted.og;
        page.metadata.word_count = page.word_count();
        page.processed_at = Some(Utc::now());
        Ok(page)
    }
}

struct Extracted {
    title: String,
    text: String,
    markdown: String,
    links: Vec<Url>,
    images: Vec<String>,
    author: Option<String>,
    description: Option<String>,
    keywords: Vec<String>,
    published: Option<DateTime<Utc>>,
    og: eddy_types::page::OpenGraph,
}

fn extract(html: &str, base: &Url) -> Extracted {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title").unwrap_or_default();

    let mut links = Vec::new();
    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            let Ok(joined) = base.join(href) else {
                debug!(href, "unresolvable link");
                continue;
            };
            if !matches!(joined.scheme(), "http" | "https") {
                continue;
            }
            if let Ok(url) = normalize_url(joined.as_str()) {
                if !links.contains(&url) {
                    links.push(url);
                }
            }
        }
    }

    let mut images = Vec::new();
    if let Ok(selector) = Selector::parse("img[src]") {
        for element in document.select(&selector) {
            if let Some(src) = element.value().attr("src") {
                if !images.iter().any(|i| i == src) {
                    images.push(src.to_string());
                }
            }
        }
    }

    let author = meta_content(&document, r#"meta[name="author"]"#);
    let description = meta_content(&document, r#"meta[name="description"]"#);
    let keywords = meta_content(&document, r#"meta[name="keywords"]"#)
        .map(|k| {
            k.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let published = meta_content(&document, r#"meta[property="article:published_time"]"#)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let og = eddy_types::page::OpenGraph {
        title: meta_content(&document, r#"meta[property="og:title"]"#),
        description: meta_content(&document, r#"meta[property="og:description"]"#),
        image: meta_content(&document, r#"meta[property="og:image"]"#),
        kind: meta_content(&document, r#"meta[property="og:type"]"#),
    };

    let (text, markdown) = render_body(&document);

    Extracted {
        title,
        text,
        markdown,
        links,
        images,
        author,
        description,
        keywords,
        published,
        og,
    }
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Walk the body once, producing cleaned text and block-level markdown.
fn render_body(document: &Html) -> (String, String) {
    let body = Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next());
    let Some(body) = body else {
        return (String::new(), String::new());
    };

    let mut text = String::new();
    let mut markdown = String::new();
    render_element(body, &mut text, &mut markdown);
    (collapse(&text), markdown.trim().to_string())
}

fn render_element(element: ElementRef<'_>, text: &mut String, markdown: &mut String) {
    let tag = element.value().name();
    match tag {
        "script" | "style" | "noscript" | "template" => return,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag.as_bytes()[1] - b'0';
            let heading = inline_text(element);
            if !heading.is_empty() {
                text.push_str(&heading);
                text.push('\n');
                markdown.push_str(&"#".repeat(level as usize));
                markdown.push(' ');
                markdown.push_str(&heading);
                markdown.push_str("\n\n");
            }
            return;
        }
        "p" | "blockquote" => {
            let paragraph = inline_text(element);
            if !paragraph.is_empty() {
                text.push_str(&paragraph);
                text.push('\n');
                if tag == "blockquote" {
                    markdown.push_str("> ");
                }
                markdown.push_str(&paragraph);
                markdown.push_str("\n\n");
            }
            return;
        }
        "li" => {
            let item = inline_text(element);
            if !item.is_empty() {
                text.push_str(&item);
                text.push('\n');
                markdown.push_str("- ");
                markdown.push_str(&item);
                markdown.push('\n');
            }
            return;
        }
        "pre" => {
            let code = element.text().collect::<String>();
            if !code.trim().is_empty() {
                text.push_str(code.trim());
                text.push('\n');
                markdown.push_str("```\n");
                markdown.push_str(code.trim_end());
                markdown.push_str("\n```\n\n");
            }
            return;
        }
        _ => {}
    }

    for child in element.children() {
        match child.value() {
            scraper::Node::Text(chunk) => {
                let chunk = chunk.trim();
                if !chunk.is_empty() {
                    text.push_str(chunk);
                    text.push(' ');
                }
            }
            scraper::Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    render_element(child, text, markdown);
                }
            }
            _ => {}
        }
    }
}

fn inline_text(element: ElementRef<'_>) -> String {
    collapse(&element.text().collect::<String>())
}

fn collapse(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank = false;
    for ch in text.chars() {
        if ch == '\n' {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            blank = false;
        } else if ch.is_whitespace() {
            if !blank && !out.is_empty() && !out.ends_with('\n') {
                out.push(' ');
            }
            blank = true;
        } else {
            out.push(ch);
            blank = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> Page {
        Page::new(
            Url::parse("https://example.com/articles/post").unwrap(),
            html.to_string(),
        )
    }

    #[tokio::test]
    async fn extracts_title_links_images_and_text() {
        let html = r#"
            <html><head><title>The Post</title></head><body>
              <h1>Heading</h1>
              <p>Some <b>bold</b> words here.</p>
              <a href="/next">next</a>
              <a href="https://other.example/x">other</a>
              <img src="/img/pic.png">
            </body></html>"#;
        let processed = HtmlProcessor::new().process(page(html)).await.unwrap();

        assert_eq!(processed.title, "The Post");
        assert!(processed.cleaned_text.contains("Some bold words here."));
        assert!(processed.markdown.starts_with("# Heading"));
        assert_eq!(processed.links.len(), 2);
        assert_eq!(processed.links[0].as_str(), "https://example.com/next");
        assert_eq!(processed.images, vec!["/img/pic.png"]);
        assert!(processed.processed_at.is_some());
        assert!(processed.metadata.word_count > 0);
    }

    #[tokio::test]
    async fn extracts_metadata_and_open_graph() {
        let html = r#"
            <html><head>
              <meta name="author" content="A. Writer">
              <meta name="description" content="About things">
              <meta name="keywords" content="rust, crawling ,engines">
              <meta property="og:title" content="OG Title">
              <meta property="og:type" content="article">
              <meta property="article:published_time" content="2024-03-01T12:00:00Z">
            </head><body><p>body text</p></body></html>"#;
        let processed = HtmlProcessor::new().process(page(html)).await.unwrap();

        assert_eq!(processed.metadata.author.as_deref(), Some("A. Writer"));
        assert_eq!(
            processed.metadata.keywords,
            vec!["rust", "crawling", "engines"]
        );
        assert_eq!(processed.metadata.og.title.as_deref(), Some("OG Title"));
        assert_eq!(processed.metadata.og.kind.as_deref(), Some("article"));
        assert!(processed.metadata.published.is_some());
    }

    #[tokio::test]
    async fn empty_document_fails_validation() {
        let err = HtmlProcessor::new()
            .process(page("<html><body><script>x()</script></body></html>"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Process(_)));
    }

    #[tokio::test]
    async fn plain_text_bodies_pass_through() {
        let processed = HtmlProcessor::new().process(page("just plain words")).await.unwrap();
        assert!(processed.cleaned_text.contains("just plain words"));
        assert!(processed.links.is_empty());
    }

    #[tokio::test]
    async fn fragment_and_javascript_links_are_skipped() {
        let html = r##"<body><p>t</p><a href="#top">a</a><a href="javascript:void(0)">b</a></body>"##;
        let processed = HtmlProcessor::new().process(page(html)).await.unwrap();
        assert!(processed.links.is_empty());
    }

    #[tokio::test]
    async fn lists_render_as_markdown_bullets() {
        let html = "<body><ul><li>one</li><li>two</li></ul></body>";
        let processed = HtmlProcessor::new().process(page(html)).await.unwrap();
        assert!(processed.markdown.contains("- one\n- two"));
    }
}
