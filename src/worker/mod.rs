//! Worker pool: a fixed set of sandbox slots with busy/idle accounting.
//!
//! Each in-flight execution owns exactly one slot from its first `run` call
//! through its terminal outcome - a slot stays busy across
//! suspend/resume cycles and is only marked idle when its guard drops.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::sandbox::{SandboxBackend, SandboxError};

struct PoolInner {
    /// busy flag per slot, indexed like `backends`.
    slots: Mutex<Vec<bool>>,
    backends: Vec<Arc<dyn SandboxBackend>>,
    semaphore: Arc<Semaphore>,
}

/// Pool of N sandbox workers (N >= 1).
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(backends: Vec<Arc<dyn SandboxBackend>>) -> Self {
        assert!(!backends.is_empty(), "worker pool needs at least one slot");
        let count = backends.len();
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(vec![false; count]),
                backends,
                semaphore: Arc::new(Semaphore::new(count)),
            }),
        }
    }

    /// Bring every backend up. Fails fast on the first broken one.
    pub async fn start_all(&self) -> Result<(), SandboxError> {
        for backend in &self.inner.backends {
            backend.start().await?;
        }
        Ok(())
    }

    /// Wait for an idle slot and claim it (first-idle order).
    pub async fn acquire(&self) -> SlotGuard {
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let index = {
            let mut slots = self.inner.slots.lock().expect("slot table lock");
            let index = slots
                .iter()
                .position(|busy| !busy)
                .expect("semaphore permit guarantees an idle slot");
            slots[index] = true;
            index
        };

        tracing::debug!(slot = index, "Claimed worker slot");
        SlotGuard {
            inner: Arc::clone(&self.inner),
            index,
            _permit: permit,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.inner.backends.len()
    }

    pub fn idle_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .map(|slots| slots.iter().filter(|busy| !**busy).count())
            .unwrap_or(0)
    }

    /// Tear down every backend.
    pub async fn shutdown(&self) {
        for backend in &self.inner.backends {
            backend.shutdown().await;
        }
    }
}

/// Exclusive claim on one pool slot. Dropping the guard marks the slot idle,
/// so release happens even if the driving task panics.
pub struct SlotGuard {
    inner: Arc<PoolInner>,
    index: usize,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn backend(&self) -> Arc<dyn SandboxBackend> {
        Arc::clone(&self.inner.backends[self.index])
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.inner.slots.lock() {
            slots[self.index] = false;
        }
        tracing::debug!(slot = self.index, "Released worker slot");
    }
}
