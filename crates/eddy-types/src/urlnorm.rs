//! URL normalization and domain keying.
//!
//! Every URL the engine sees is normalized by the same function before
//! deduplication, caching, checkpointing, or rate limiting. The function is
//! idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.

use url::Url;

/// Query keys stripped during normalization: pure tracking/cosmetic noise
/// that would otherwise defeat deduplication.
const TRACKING_KEYS: &[&str] = &["fbclid", "gclid", "msclkid", "ref"];

/// Normalize a URL string into its canonical form.
///
/// Lowercases scheme and host, strips the fragment and default port, and
/// removes tracking query parameters (`utm_*` and the keys in
/// [`TRACKING_KEYS`]). Remaining query pairs keep their original order.
pub fn normalize_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;

    url.set_fragment(None);

    // The url crate already lowercases scheme and host and elides default
    // ports on serialization; re-setting the port covers explicit defaults.
    if let Some(port) = url.port() {
        let is_default = matches!(
            (url.scheme(), port),
            ("http", 80) | ("https", 443) | ("ftp", 21)
        );
        if is_default {
            let _ = url.set_port(None);
        }
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_key(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    Ok(url)
}

fn is_tracking_key(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_KEYS.contains(&key)
}

/// Canonical rate-limiter / admission key for a URL's domain.
///
/// Lowercased host with any default port stripped. Errors on URLs without a
/// host (e.g. `mailto:`).
pub fn domain_key(url: &Url) -> Result<String, String> {
    let host = url
        .host_str()
        .ok_or_else(|| format!("url has no host: {url}"))?;
    if host.is_empty() {
        return Err(format!("url has empty host: {url}"));
    }
    match url.port() {
        Some(port) => Ok(format!("{}:{}", host.to_ascii_lowercase(), port)),
        None => Ok(host.to_ascii_lowercase()),
    }
}
