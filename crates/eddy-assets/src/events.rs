//! Asset events and their bounded history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Ring buffer capacity for recent asset events.
pub(crate) const EVENT_HISTORY: usize = 1024;

/// What happened to an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetEventKind {
    Discovered,
    Selected,
    Downloaded,
    Inlined,
    Failed,
}

impl AssetEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetEventKind::Discovered => "discovered",
            AssetEventKind::Selected => "selected",
            AssetEventKind::Downloaded => "downloaded",
            AssetEventKind::Inlined => "inlined",
            AssetEventKind::Failed => "failed",
        }
    }
}

/// One asset decision or materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetEvent {
    pub kind: AssetEventKind,
    pub url: String,
    pub bytes: Option<u64>,
    pub hash: Option<String>,
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl AssetEvent {
    pub(crate) fn new(kind: AssetEventKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            bytes: None,
            hash: None,
            error: None,
            time: Utc::now(),
        }
    }
}

/// Most-recent-N event history.
#[derive(Debug, Default)]
pub(crate) struct EventRing {
    events: Mutex<VecDeque<AssetEvent>>,
}

impl EventRing {
    pub fn push(&self, event: AssetEvent) {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if events.len() == EVENT_HISTORY {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn recent(&self) -> Vec<AssetEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
