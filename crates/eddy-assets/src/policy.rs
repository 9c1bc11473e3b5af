//! Asset policy configuration.

use serde::{Deserialize, Serialize};

/// Broad asset classification used by allow/block rules and optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Stylesheet,
    Script,
    Media,
    Document,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Stylesheet => "stylesheet",
            AssetKind::Script => "script",
            AssetKind::Media => "media",
            AssetKind::Document => "document",
            AssetKind::Other => "other",
        }
    }
}

/// Policy for the asset engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPolicy {
    /// Master switch; a disabled policy skips the asset stage entirely.
    pub enabled: bool,
    /// Kinds to process; empty means all kinds.
    pub allow_kinds: Vec<AssetKind>,
    /// Kinds to drop unconditionally; wins over the allow list.
    pub block_kinds: Vec<AssetKind>,
    /// Cap on assets processed per page, in discovery order.
    pub max_per_page: usize,
    /// Total byte budget per page across all assets; 0 means unlimited.
    pub max_bytes: u64,
    /// Assets at or below this size may be inlined as data URIs.
    pub inline_max_bytes: u64,
    /// Prefix for content-addressed rewrite paths; must start with '/'.
    pub rewrite_prefix: String,
    /// Concurrent asset downloads per page batch.
    pub max_concurrent: usize,
    /// Apply type-specific optimization before hashing.
    pub optimize: bool,
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_kinds: Vec::new(),
            block_kinds: Vec::new(),
            max_per_page: 50,
            max_bytes: 10 * 1024 * 1024,
            inline_max_bytes: 2048,
            rewrite_prefix: "/assets".into(),
            max_concurrent: 4,
            optimize: true,
        }
    }
}

impl AssetPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !self.rewrite_prefix.starts_with('/') {
            return Err(format!(
                "asset rewrite_prefix must start with '/': {:?}",
                self.rewrite_prefix
            ));
        }
        if self.enabled && self.max_concurrent == 0 {
            return Err("asset max_concurrent must be > 0".into());
        }
        if self.enabled && self.max_per_page == 0 {
            return Err("asset max_per_page must be > 0".into());
        }
        Ok(())
    }

    pub(crate) fn kind_allowed(&self, kind: AssetKind) -> bool {
        if self.block_kinds.contains(&kind) {
            return false;
        }
        self.allow_kinds.is_empty() || self.allow_kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_validates() {
        assert!(AssetPolicy::default().validate().is_ok());
    }

    #[test]
    fn rewrite_prefix_requires_leading_slash() {
        let policy = AssetPolicy {
            rewrite_prefix: "assets".into(),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn block_list_wins_over_allow_list() {
        let policy = AssetPolicy {
            allow_kinds: vec![AssetKind::Image],
            block_kinds: vec![AssetKind::Image],
            ..Default::default()
        };
        assert!(!policy.kind_allowed(AssetKind::Image));
    }

    #[test]
    fn empty_allow_list_admits_all_kinds() {
        let policy = AssetPolicy::default();
        assert!(policy.kind_allowed(AssetKind::Script));
        assert!(policy.kind_allowed(AssetKind::Document));
    }
}
