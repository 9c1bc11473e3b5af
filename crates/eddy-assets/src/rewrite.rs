//! Rewrite phase: replace asset references with content-addressed paths.

use crate::decide::AssetMode;
use crate::execute::MaterializedAsset;
use crate::policy::AssetPolicy;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use url::Url;

/// Content-addressed path for a downloaded asset:
/// `{prefix}/{hash[0..2]}/{hash}{ext}` with the extension taken from the
/// original URL (lowercased) when it has one.
pub fn rewritten_path(policy: &AssetPolicy, hash: &str, original: &Url) -> String {
    let prefix = policy.rewrite_prefix.trim_end_matches('/');
    let ext = extension_of(original);
    format!("{}/{}/{}{}", prefix, &hash[..2], hash, ext)
}

/// Produce the rewritten page content.
///
/// Pure function of `(content, materialized, policy)`: the same inputs
/// always yield the same output. References without a materialization (a
/// failed fetch) are left untouched.
pub fn rewrite(content: &str, materialized: &[MaterializedAsset], policy: &AssetPolicy) -> String {
    // Longest original first so a reference that is a prefix of another
    // cannot clobber it; ties break on the text itself for determinism.
    let mut ordered: Vec<&MaterializedAsset> = materialized.iter().collect();
    ordered.sort_by(|a, b| {
        b.asset
            .original
            .len()
            .cmp(&a.asset.original.len())
            .then_with(|| a.asset.original.cmp(&b.asset.original))
    });

    let mut output = content.to_string();
    for asset in ordered {
        let replacement = match asset.mode {
            AssetMode::Inline => data_uri(asset),
            AssetMode::Download => rewritten_path(policy, &asset.hash, &asset.asset.url),
            AssetMode::Skip => continue,
        };
        output = output.replace(&asset.asset.original, &replacement);
    }
    output
}

fn data_uri(asset: &MaterializedAsset) -> String {
    let mime = mime_for(&asset.asset.url);
    format!("data:{};base64,{}", mime, BASE64.encode(&asset.bytes))
}

fn extension_of(url: &Url) -> String {
    let path = url.path();
    match path.rsplit('/').next().and_then(|name| {
        name.rsplit_once('.')
            .filter(|(stem, _)| !stem.is_empty())
            .map(|(_, ext)| ext)
    }) {
        Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
        None => String::new(),
    }
}

fn mime_for(url: &Url) -> &'static str {
    match extension_of(url).as_str() {
        ".svg" => "image/svg+xml",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".css" => "text/css",
        ".js" | ".mjs" => "text/javascript",
        _ => "application/octet-stream",
    }
}
