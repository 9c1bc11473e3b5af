//! Append-only checkpoint log of completed URLs.
//!
//! `record` never blocks: the URL goes onto a bounded queue and a background
//! flusher appends batches to the checkpoint file. A full queue drops the
//! write with a counter; checkpoint lines are progress hints, not a
//! correctness mechanism.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lines accumulated before an early flush.
const BATCH_LINES: usize = 64;

/// Background checkpoint writer.
pub struct CheckpointWriter {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
    write_errors: Arc<AtomicU64>,
}

impl CheckpointWriter {
    /// Start the flusher. The parent directory is created eagerly; failure
    /// here is fatal, unlike per-line I/O errors later.
    pub fn new(
        path: PathBuf,
        interval: Duration,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let write_errors = Arc::new(AtomicU64::new(0));

        let task = tokio::spawn(flusher(
            path,
            interval,
            rx,
            Arc::clone(&queued),
            Arc::clone(&write_errors),
        ));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
            queued,
            dropped,
            write_errors,
        })
    }

    /// Queue one URL for appending. Never blocks; a full queue drops.
    pub fn record(&self, url: &str) {
        let guard = lock(&self.tx);
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(url.to_string()) {
            Ok(()) => {
                self.queued.fetch_add(1, Relaxed);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Relaxed);
            }
        }
    }

    /// URLs waiting to be flushed.
    pub fn queued(&self) -> usize {
        self.queued.load(Relaxed)
    }

    /// URLs dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Relaxed)
    }

    /// Flush remaining entries and join the flusher. Idempotent.
    pub async fn close(&self) {
        drop(lock(&self.tx).take());
        let task = lock(&self.task).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn flusher(
    path: PathBuf,
    interval: Duration,
    mut rx: mpsc::Receiver<String>,
    queued: Arc<AtomicUsize>,
    write_errors: Arc<AtomicU64>,
) {
    let mut file = match OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .await
    {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "checkpoint open failed");
            None
        }
    };

    let mut batch: Vec<String> = Vec::with_capacity(BATCH_LINES);
    loop {
        let flush_due = tokio::select! {
            item = rx.recv() => match item {
                Some(url) => {
                    batch.push(url);
                    batch.len() >= BATCH_LINES
                }
                None => {
                    // Sender gone: final flush, then exit.
                    write_batch(&mut file, &path, &mut batch, &queued, &write_errors).await;
                    break;
                }
            },
            _ = tokio::time::sleep(interval) => !batch.is_empty(),
        };

        if flush_due {
            write_batch(&mut file, &path, &mut batch, &queued, &write_errors).await;
        }
    }
    debug!(path = %path.display(), "checkpoint flusher stopped");
}

async fn write_batch(
    file: &mut Option<tokio::fs::File>,
    path: &Path,
    batch: &mut Vec<String>,
    queued: &AtomicUsize,
    write_errors: &AtomicU64,
) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len();
    let mut payload = String::with_capacity(batch.iter().map(|l| l.len() + 1).sum());
    for line in batch.drain(..) {
        payload.push_str(&line);
        payload.push('\n');
    }
    queued.fetch_sub(count.min(queued.load(Relaxed)), Relaxed);

    let Some(file) = file.as_mut() else {
        write_errors.fetch_add(count as u64, Relaxed);
        return;
    };
    if let Err(err) = file.write_all(payload.as_bytes()).await {
        warn!(path = %path.display(), error = %err, "checkpoint append failed");
        write_errors.fetch_add(count as u64, Relaxed);
        return;
    }
    if let Err(err) = file.flush().await {
        warn!(path = %path.display(), error = %err, "checkpoint flush failed");
        write_errors.fetch_add(count as u64, Relaxed);
    }
}

/// Read a checkpoint file into a set of completed URLs.
///
/// Only LF-terminated lines count; a trailing partial line from a crashed
/// writer is ignored. A missing file is an empty set.
pub fn read_checkpoint(path: &Path) -> HashSet<String> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashSet::new(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "checkpoint read failed");
            return HashSet::new();
        }
    };

    let mut set = HashSet::new();
    let mut rest = text.as_str();
    while let Some(pos) = rest.find('\n') {
        let line = rest[..pos].trim();
        if !line.is_empty() {
            set.insert(line.to_string());
        }
        rest = &rest[pos + 1..];
    }
    set
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_appended_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ck");
        let writer =
            CheckpointWriter::new(path.clone(), Duration::from_millis(10), 64).unwrap();

        writer.record("https://example.com/a");
        writer.record("https://example.com/b");
        writer.close().await;

        let set = read_checkpoint(&path);
        assert_eq!(set.len(), 2);
        assert!(set.contains("https://example.com/a"));
    }

    #[tokio::test]
    async fn interval_flush_happens_without_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ck");
        let writer =
            CheckpointWriter::new(path.clone(), Duration::from_millis(10), 64).unwrap();

        writer.record("https://example.com/a");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(read_checkpoint(&path).contains("https://example.com/a"));
        writer.close().await;
    }

    #[tokio::test]
    async fn full_queue_drops_with_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ck");
        let writer = CheckpointWriter::new(path, Duration::from_secs(60), 1).unwrap();

        // Saturate: capacity 1, flusher sleeping on the long interval.
        for i in 0..50 {
            writer.record(&format!("https://example.com/{i}"));
        }
        assert!(writer.dropped() > 0);
        writer.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let writer =
            CheckpointWriter::new(dir.path().join("ck"), Duration::from_millis(10), 8).unwrap();
        writer.close().await;
        writer.close().await;
        // Records after close are silently ignored.
        writer.record("https://example.com/late");
    }

    #[test]
    fn partial_last_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ck");
        std::fs::write(&path, "https://a/\nhttps://b/\nhttps://partial").unwrap();

        let set = read_checkpoint(&path);
        assert_eq!(set.len(), 2);
        assert!(!set.contains("https://partial"));
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_checkpoint(&dir.path().join("absent")).is_empty());
    }
}
