//! Event bus with bounded per-subscriber queues.
//!
//! `publish` never blocks: each subscriber gets a `try_send` on its own
//! bounded channel, and a full channel increments that subscriber's drop
//! counter plus a global one. Slow consumers therefore shed load instead of
//! stalling the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;

/// One telemetry event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Required routing key, e.g. `"health"`, `"asset"`, `"pipeline"`.
    pub category: String,
    /// Event name within the category, e.g. `"health_change"`.
    pub name: String,
    /// Stamped at publish time when absent.
    pub time: Option<DateTime<Utc>>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    /// Free-form payload fields.
    pub fields: HashMap<String, String>,
}

impl Event {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            time: None,
            trace_id: None,
            span_id: None,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Trace identifiers carried alongside a publish.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("event category is required")]
    MissingCategory,
}

struct Subscriber {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Fan-out event bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    dropped_total: AtomicU64,
    published_total: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped_total: AtomicU64::new(0),
            published_total: AtomicU64::new(0),
        })
    }

    /// Dispatch an event to every subscriber without blocking.
    pub fn publish(&self, mut event: Event) -> Result<(), PublishError> {
        if event.category.is_empty() {
            return Err(PublishError::MissingCategory);
        }
        if event.time.is_none() {
            event.time = Some(Utc::now());
        }
        self.published_total.fetch_add(1, Relaxed);

        let subscribers = match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for sub in subscribers.values() {
            if sub.tx.try_send(event.clone()).is_err() {
                sub.dropped.fetch_add(1, Relaxed);
                self.dropped_total.fetch_add(1, Relaxed);
            }
        }
        Ok(())
    }

    /// Publish, filling trace identifiers from the context when absent.
    ///
    /// Without a context a fresh trace id is minted so downstream consumers
    /// can always correlate.
    pub fn publish_traced(
        &self,
        mut event: Event,
        trace: Option<&TraceContext>,
    ) -> Result<(), PublishError> {
        match trace {
            Some(ctx) => {
                if event.trace_id.is_none() {
                    event.trace_id = Some(ctx.trace_id.clone());
                }
                if event.span_id.is_none() {
                    event.span_id = Some(ctx.span_id.clone());
                }
            }
            None => {
                if event.trace_id.is_none() {
                    event.trace_id = Some(uuid::Uuid::new_v4().simple().to_string());
                }
                if event.span_id.is_none() {
                    event.span_id = Some(short_id());
                }
            }
        }
        self.publish(event)
    }

    /// Register a subscriber with its own bounded buffer.
    pub fn subscribe(self: &Arc<Self>, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.next_id.fetch_add(1, Relaxed);

        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.insert(
            id,
            Subscriber {
                tx,
                dropped: Arc::clone(&dropped),
            },
        );

        Subscription {
            id,
            rx,
            dropped,
            bus: Arc::clone(self),
        }
    }

    /// Events dropped across all subscribers since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped_total.load(Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published_total.load(Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.remove(&id);
    }
}

fn short_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..16].to_string()
}

/// A registered subscriber; dropping it unregisters.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    bus: Arc<EventBus>,
}

impl Subscription {
    /// Receive the next event; `None` after `close`.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Events this subscriber lost to backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Relaxed)
    }

    /// Unregister from the bus.
    pub fn close(&mut self) {
        self.bus.unsubscribe(self.id);
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
