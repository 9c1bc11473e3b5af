//! Label cardinality guard shared by the metric backends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Default cap on distinct label tuples per metric.
pub const DEFAULT_LABEL_LIMIT: usize = 100;

/// Tracks distinct label tuples for one metric and warns once when the
/// limit is exceeded. Recording keeps working past the limit; the guard is
/// an alarm, not a valve.
#[derive(Debug)]
pub struct CardinalityGuard {
    metric: String,
    limit: usize,
    seen: Mutex<HashSet<Vec<String>>>,
    warned: AtomicBool,
}

impl CardinalityGuard {
    pub fn new(metric: impl Into<String>) -> Self {
        Self::with_limit(metric, DEFAULT_LABEL_LIMIT)
    }

    pub fn with_limit(metric: impl Into<String>, limit: usize) -> Self {
        Self {
            metric: metric.into(),
            limit,
            seen: Mutex::new(HashSet::new()),
            warned: AtomicBool::new(false),
        }
    }

    /// Note one label tuple.
    pub fn observe(&self, labels: &[&str]) {
        if labels.is_empty() {
            return;
        }
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.len() > self.limit {
            return; // already over; the warning fired once
        }
        let tuple: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        seen.insert(tuple);
        if seen.len() > self.limit && !self.warned.swap(true, Relaxed) {
            warn!(
                metric = %self.metric,
                limit = self.limit,
                "metric label cardinality exceeded limit"
            );
        }
    }

    pub fn distinct(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn warned(&self) -> bool {
        self.warned.load(Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_distinct_tuples() {
        let guard = CardinalityGuard::with_limit("m", 10);
        guard.observe(&["a"]);
        guard.observe(&["a"]);
        guard.observe(&["b"]);
        assert_eq!(guard.distinct(), 2);
        assert!(!guard.warned());
    }

    #[test]
    fn warns_exactly_once_past_limit() {
        let guard = CardinalityGuard::with_limit("m", 2);
        for i in 0..10 {
            guard.observe(&[&format!("v{i}")]);
        }
        assert!(guard.warned());
        // Set growth stops once the limit is breached.
        assert!(guard.distinct() <= 4);
    }

    #[test]
    fn unlabeled_metrics_are_ignored() {
        let guard = CardinalityGuard::with_limit("m", 1);
        guard.observe(&[]);
        assert_eq!(guard.distinct(), 0);
    }
}
