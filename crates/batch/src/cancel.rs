//! Shared record of batches cancelled by their owner.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use jobline_core::BatchId;

/// Batches whose owner asked for cancellation.
///
/// A running batch is not interrupted: it finishes its item loop, keeps `Cancelled` as
/// its final status, and triggers no follow-on jobs. Entries are cleared once the batch
/// is terminal.
#[derive(Debug, Clone, Default)]
pub struct CancelledBatches {
    inner: Arc<Mutex<HashSet<BatchId>>>,
}

impl CancelledBatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the batch was already marked.
    pub fn mark(&self, id: BatchId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    pub fn contains(&self, id: BatchId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Forget a batch once it is terminal. Returns false if it was not marked.
    pub fn clear(&self, id: BatchId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
