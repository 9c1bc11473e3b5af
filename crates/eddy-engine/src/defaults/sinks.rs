//! Built-in output sinks.

use async_trait::async_trait;
use eddy_types::{CrawlError, CrawlResult, OutputSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends one JSON document per result to a file.
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }
}

#[async_trait]
impl OutputSink for JsonlSink {
    async fn write(&self, result: &CrawlResult) -> Result<(), CrawlError> {
        let mut line = serde_json::to_vec(result)
            .map_err(|e| CrawlError::Output {
                sink: "jsonl".into(),
                message: format!("encode: {e}"),
            })?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        if file.is_none() {
            let opened = tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&self.path)
                .await
                .map_err(|e| CrawlError::Output {
                    sink: "jsonl".into(),
                    message: format!("open {}: {e}", self.path.display()),
                })?;
            *file = Some(opened);
        }
        // Opened above on this same path.
        if let Some(file) = file.as_mut() {
            file.write_all(&line).await.map_err(|e| CrawlError::Output {
                sink: "jsonl".into(),
                message: format!("write: {e}"),
            })?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), CrawlError> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush().await.map_err(|e| CrawlError::Output {
                sink: "jsonl".into(),
                message: format!("flush: {e}"),
            })?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        self.flush().await?;
        *self.file.lock().await = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

/// Collects results in memory; convenient for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    results: Arc<std::sync::Mutex<Vec<CrawlResult>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<CrawlResult> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write(&self, result: &CrawlResult) -> Result<(), CrawlError> {
        self.results
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
