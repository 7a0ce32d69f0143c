//! Batch status persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobline_core::BatchId;

use crate::model::{BatchStatus, BatchStatusRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("batch store unavailable: {0}")]
    Unavailable(String),

    #[error("batch store lock poisoned")]
    Poisoned,
}

/// Where batch status records live between polls.
///
/// The orchestrator and cancelling callers write the same record from different tasks,
/// so both go through the conditional writes; `save_status` is for fresh records.
#[async_trait]
pub trait BatchStore: Send + Sync + 'static {
    /// Insert or overwrite the record for `record.id`.
    async fn save_status(&self, record: &BatchStatusRecord) -> Result<(), StoreError>;

    async fn load_status(&self, id: BatchId) -> Result<Option<BatchStatusRecord>, StoreError>;

    /// Write a progress checkpoint unless it would move the stored record backwards.
    ///
    /// See [`merge_checkpoint`]. Returns the record as stored afterwards.
    async fn save_checkpoint(
        &self,
        record: &BatchStatusRecord,
    ) -> Result<BatchStatusRecord, StoreError>;

    /// Move a record that is not yet terminal to `Cancelled`.
    ///
    /// Returns the record as stored afterwards (unchanged if it was already terminal), or
    /// `None` when there is no record.
    async fn mark_cancelled(
        &self,
        id: BatchId,
        at: DateTime<Utc>,
    ) -> Result<Option<BatchStatusRecord>, StoreError>;
}

/// Combine a stored record with an incoming checkpoint.
///
/// A checkpoint with fewer processed items than the stored record is dropped. A terminal
/// stored status is kept while the checkpoint's progress is taken over.
pub fn merge_checkpoint(
    stored: Option<&BatchStatusRecord>,
    incoming: &BatchStatusRecord,
) -> BatchStatusRecord {
    match stored {
        Some(stored) if incoming.processed < stored.processed => stored.clone(),
        Some(stored) if stored.status.is_terminal() => {
            let mut merged = incoming.clone();
            merged.status = stored.status;
            merged.completed_at = incoming.completed_at.or(stored.completed_at);
            merged
        }
        _ => incoming.clone(),
    }
}

/// In-memory batch store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    records: RwLock<HashMap<BatchId, BatchStatusRecord>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record.
    pub fn all(&self) -> Vec<BatchStatusRecord> {
        self.records
            .read()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn save_status(&self, record: &BatchStatusRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_status(&self, id: BatchId) -> Result<Option<BatchStatusRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&id).cloned())
    }

    async fn save_checkpoint(
        &self,
        record: &BatchStatusRecord,
    ) -> Result<BatchStatusRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let merged = merge_checkpoint(records.get(&record.id), record);
        records.insert(record.id, merged.clone());
        Ok(merged)
    }

    async fn mark_cancelled(
        &self,
        id: BatchId,
        at: DateTime<Utc>,
    ) -> Result<Option<BatchStatusRecord>, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get_mut(&id).map(|record| {
            if !record.status.is_terminal() {
                record.status = BatchStatus::Cancelled;
                record.completed_at = Some(at);
            }
            record.clone()
        }))
    }
}
