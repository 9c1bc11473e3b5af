//! Error taxonomy for the ingestion engine.
//!
//! Errors are discriminated by *kind*, not by type hierarchy: every failure
//! a caller can observe on the result stream is one variant of
//! [`CrawlError`]. Subsystem-internal failures (spill I/O, checkpoint
//! writes) are logged and counted where they happen and never surface here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The discriminated error value carried by a failed
/// [`CrawlResult`](crate::CrawlResult).
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlError {
    /// Invalid configuration; surfaced from engine construction or start.
    #[error("configuration error: {0}")]
    Config(String),

    /// URL rejected at admission (allow-list, depth, page budget, syntax).
    #[error("not admitted: {reason}")]
    Admission { reason: String },

    /// Network-level failure or retryable HTTP status (5xx, 429).
    #[error("transport error{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// Non-retryable HTTP client error (4xx other than 429).
    #[error("http status {status}")]
    Http { status: u16 },

    /// The rate limiter's circuit breaker denied the fetch.
    #[error("circuit open for {domain}")]
    CircuitOpen { domain: String },

    /// Parsing, extraction, or content-validation failure.
    #[error("processing failed: {0}")]
    Process(String),

    /// Per-asset failure; informational, never fails a page.
    #[error("asset failed: {0}")]
    Asset(String),

    /// An output sink rejected the result.
    #[error("sink {sink} failed: {message}")]
    Output { sink: String, message: String },

    /// Spill or checkpoint I/O trouble; logged and counted, non-fatal.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// The caller canceled the operation.
    #[error("canceled")]
    Canceled,
}

impl CrawlError {
    /// Whether the failure class is retryable in principle.
    ///
    /// Only transport failures qualify; circuit-open denials are re-probed
    /// by the breaker itself, everything else fails exactly once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Transport { .. })
    }

    /// Transport error from a plain message.
    pub fn transport(message: impl Into<String>) -> Self {
        CrawlError::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Transport error carrying the offending HTTP status.
    pub fn transport_status(message: impl Into<String>, status: u16) -> Self {
        CrawlError::Transport {
            message: message.into(),
            status: Some(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(CrawlError::transport("timeout").is_retryable());
        assert!(CrawlError::transport_status("bad gateway", 502).is_retryable());
        assert!(!CrawlError::Http { status: 404 }.is_retryable());
        assert!(!CrawlError::CircuitOpen { domain: "example.com".into() }.is_retryable());
        assert!(!CrawlError::Process("empty body".into()).is_retryable());
        assert!(!CrawlError::Canceled.is_retryable());
    }

    #[test]
    fn transport_display_includes_status_when_present() {
        let err = CrawlError::transport_status("server error", 503);
        assert!(err.to_string().contains("503"));
        let err = CrawlError::transport("dns failure");
        assert!(!err.to_string().contains("status"));
    }
}
