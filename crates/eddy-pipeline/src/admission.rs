//! Admission control: allow-list, depth, dedup, and the page budget.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::{Mutex, PoisonError};

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    /// Already admitted once; silently dropped (the first admission owns
    /// the URL's single CrawlResult).
    Duplicate,
    /// Rejected with a reason; seeds surface this as a discovery failure.
    Rejected(String),
}

/// Monotonic admission state shared by the discovery workers.
///
/// The page budget is an atomic counter consumed here, at admission, so the
/// cap is exact rather than best-effort under concurrency.
pub struct Admission {
    allowed_domains: Vec<String>,
    max_depth: usize,
    max_pages: usize,
    seen: Mutex<HashSet<String>>,
    admitted: AtomicUsize,
}

impl Admission {
    pub fn new(allowed_domains: &[String], max_depth: usize, max_pages: usize) -> Self {
        Self {
            allowed_domains: allowed_domains
                .iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            max_depth,
            max_pages,
            seen: Mutex::new(HashSet::new()),
            admitted: AtomicUsize::new(0),
        }
    }

    /// Check one normalized URL. Order: domain allow-list, depth, dedup,
    /// page budget. The dedup set only grows; a URL is admitted at most
    /// once per engine lifetime.
    pub fn check(&self, normalized: &str, domain: &str, depth: usize) -> AdmissionOutcome {
        if !self.domain_allowed(domain) {
            return AdmissionOutcome::Rejected(format!("domain not allowed: {domain}"));
        }
        if depth > self.max_depth {
            return AdmissionOutcome::Rejected(format!(
                "depth {depth} exceeds limit {}",
                self.max_depth
            ));
        }

        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if !seen.insert(normalized.to_string()) {
                return AdmissionOutcome::Duplicate;
            }
        }

        if self.max_pages > 0 {
            let granted = self
                .admitted
                .fetch_update(Relaxed, Relaxed, |n| (n < self.max_pages).then_some(n + 1))
                .is_ok();
            if !granted {
                return AdmissionOutcome::Rejected(format!(
                    "page budget {} exhausted",
                    self.max_pages
                ));
            }
        } else {
            self.admitted.fetch_add(1, Relaxed);
        }

        AdmissionOutcome::Admitted
    }

    pub fn admitted_count(&self) -> usize {
        self.admitted.load(Relaxed)
    }

    fn domain_allowed(&self, domain: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        // Ports are not part of the allow-list vocabulary.
        let host = domain.split(':').next().unwrap_or(domain);
        self.allowed_domains.iter().any(|allowed| {
            host == allowed || host.ends_with(&format!(".{allowed}"))
        })
    }
}
