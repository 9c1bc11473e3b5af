//! Decision phase: map discovered references to actions under the policy.

use crate::discover::AssetRef;
use crate::policy::{AssetKind, AssetPolicy};

/// What to do with one discovered asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMode {
    Download,
    Inline,
    Skip,
}

/// A reference paired with its decided mode.
#[derive(Debug, Clone)]
pub struct AssetAction {
    pub asset: AssetRef,
    pub mode: AssetMode,
}

/// Apply the policy rules in order: block list, allow list, per-page cap,
/// inline eligibility. Discovery order is preserved; references dropped by
/// the lists do not count against the cap.
pub fn decide(refs: Vec<AssetRef>, policy: &AssetPolicy) -> Vec<AssetAction> {
    let mut actions = Vec::new();
    for asset in refs {
        if !policy.kind_allowed(asset.kind) {
            continue;
        }
        if actions.len() >= policy.max_per_page {
            break;
        }
        let mode = if inline_candidate(&asset, policy) {
            AssetMode::Inline
        } else {
            AssetMode::Download
        };
        actions.push(AssetAction { asset, mode });
    }
    actions
}

/// Inline is reserved for small vector images; the size expectation is
/// re-checked against actual bytes at execute time.
fn inline_candidate(asset: &AssetRef, policy: &AssetPolicy) -> bool {
    policy.inline_max_bytes > 0
        && asset.kind == AssetKind::Image
        && asset.url.path().to_ascii_lowercase().ends_with(".svg")
}
