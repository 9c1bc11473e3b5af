//! Global in-flight fetch slots.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore capping concurrent in-flight work.
#[derive(Debug, Clone)]
pub struct Slots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Guard for one slot; dropping releases it. All exit paths through the
/// fetch stage release by construction.
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl Slots {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. Cancellation-safe: dropping the future before
    /// it resolves acquires nothing.
    pub async fn acquire(&self) -> SlotGuard {
        // The semaphore is never closed while the pipeline holds a Slots.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("slots semaphore closed"));
        SlotGuard { _permit: permit }
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
