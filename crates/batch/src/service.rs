//! Batch creation, status, and cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::info;

use jobline_core::{BatchId, JobId, JobType, QueueName, ValidationError};
use jobline_scheduler::{JobOptions, SchedulerCore, SchedulerError};

use crate::cancel::CancelledBatches;
use crate::model::{
    BatchItem, BatchJob, BatchOptions, BatchReceipt, BatchStatus, BatchStatusRecord,
    BatchStatusView, estimate_processing_time,
};
use crate::store::{BatchStore, StoreError};

/// Largest batch accepted by [`BatchService::create_batch`].
pub const MAX_BATCH_ITEMS: usize = 50;
/// Attempts granted to a batch job.
pub const BATCH_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("batch not found: {0}")]
    NotFound(BatchId),

    #[error("batch {id} already finished ({status:?})")]
    AlreadyFinished { id: BatchId, status: BatchStatus },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode batch payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Entry point for callers working with whole batches.
pub struct BatchService {
    scheduler: SchedulerCore,
    store: Arc<dyn BatchStore>,
    cancelled: CancelledBatches,
    jobs: Mutex<HashMap<BatchId, JobId>>,
}

impl BatchService {
    /// `cancelled` must be the set shared with the batch orchestrator.
    pub fn new(
        scheduler: SchedulerCore,
        store: Arc<dyn BatchStore>,
        cancelled: CancelledBatches,
    ) -> Self {
        Self {
            scheduler,
            store,
            cancelled,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Validate, persist as `Queued`, and enqueue a batch.
    pub async fn create_batch(
        &self,
        owner: &str,
        items: Vec<BatchItem>,
        options: BatchOptions,
    ) -> Result<BatchReceipt, BatchError> {
        if owner.trim().is_empty() {
            return Err(ValidationError::field("owner", "must not be empty").into());
        }
        if items.is_empty() {
            return Err(ValidationError::field("items", "must not be empty").into());
        }
        if items.len() > MAX_BATCH_ITEMS {
            return Err(ValidationError::field(
                "items",
                format!("at most {MAX_BATCH_ITEMS} items per batch, got {}", items.len()),
            )
            .into());
        }
        if let Some(position) = items.iter().position(|item| item.name().trim().is_empty()) {
            return Err(
                ValidationError::field("items", format!("item {position} has no name")).into(),
            );
        }

        let priority = options.priority.job_priority();
        let job = BatchJob::new(owner, items, options);
        let total = job.items.len();

        self.store
            .save_status(&BatchStatusRecord::queued(&job))
            .await?;

        let job_id = self.scheduler.add(
            QueueName::Batch,
            JobType::ProcessBatch,
            serde_json::to_value(&job)?,
            JobOptions::default()
                .with_priority(priority)
                .with_max_attempts(BATCH_MAX_ATTEMPTS),
        )?;

        {
            let mut jobs = self.jobs();
            jobs.retain(|_, tracked| {
                self.scheduler
                    .get_job(*tracked)
                    .is_some_and(|job| !job.status.is_terminal())
            });
            jobs.insert(job.batch_id, job_id);
        }

        info!(batch_id = %job.batch_id, job_id = %job_id, owner, items = total, "batch created");

        Ok(BatchReceipt {
            batch_id: job.batch_id,
            job_id,
            status: BatchStatus::Queued,
            total,
            estimated_time_secs: estimate_processing_time(total).as_secs(),
        })
    }

    /// Current status of one of `owner`'s batches.
    pub async fn batch_status(
        &self,
        batch_id: BatchId,
        owner: &str,
    ) -> Result<BatchStatusView, BatchError> {
        let record = self.owned_record(batch_id, owner).await?;
        if record.status.is_terminal() {
            self.forget_job(batch_id);
        }
        Ok(record.into())
    }

    /// Cancel a batch.
    ///
    /// A queued batch is taken off the queue. A running batch is flagged and finishes its
    /// item loop, keeping `Cancelled` as its final status and skipping follow-on jobs.
    /// The store decides the race with a finishing batch: if the batch reached a terminal
    /// status first, the call fails with [`BatchError::AlreadyFinished`] and nothing is
    /// overwritten.
    pub async fn cancel_batch(
        &self,
        batch_id: BatchId,
        owner: &str,
    ) -> Result<BatchStatusView, BatchError> {
        let record = self.owned_record(batch_id, owner).await?;
        if record.status.is_terminal() {
            self.forget_job(batch_id);
            return Err(BatchError::AlreadyFinished {
                id: batch_id,
                status: record.status,
            });
        }

        let job_id = self.job_id(batch_id);
        let removed = job_id.is_some_and(|job_id| self.scheduler.remove(job_id));
        if removed {
            info!(batch_id = %batch_id, "queued batch job removed");
        } else {
            self.cancelled.mark(batch_id);
        }

        let stored = self
            .store
            .mark_cancelled(batch_id, Utc::now())
            .await?
            .ok_or(BatchError::NotFound(batch_id))?;

        // Nobody is left to clear the flag once the job is gone.
        if !removed && !self.job_is_live(job_id) {
            self.cancelled.clear(batch_id);
        }

        if stored.status != BatchStatus::Cancelled {
            self.cancelled.clear(batch_id);
            self.forget_job(batch_id);
            return Err(BatchError::AlreadyFinished {
                id: batch_id,
                status: stored.status,
            });
        }
        if removed {
            self.forget_job(batch_id);
        } else {
            info!(batch_id = %batch_id, "batch running; flagged as cancelled");
        }

        info!(batch_id = %batch_id, owner, "batch cancelled");
        Ok(stored.into())
    }

    /// Scheduler job driving `batch_id`, while this service still tracks it.
    pub fn job_id(&self, batch_id: BatchId) -> Option<JobId> {
        self.jobs().get(&batch_id).copied()
    }

    /// Number of batch to job mappings held. Finished batches are dropped on the next
    /// status read or batch creation.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs().len()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<BatchId, JobId>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget_job(&self, batch_id: BatchId) {
        self.jobs().remove(&batch_id);
    }

    fn job_is_live(&self, job_id: Option<JobId>) -> bool {
        job_id
            .and_then(|job_id| self.scheduler.get_job(job_id))
            .is_some_and(|job| !job.status.is_terminal())
    }

    async fn owned_record(
        &self,
        batch_id: BatchId,
        owner: &str,
    ) -> Result<BatchStatusRecord, BatchError> {
        self.store
            .load_status(batch_id)
            .await?
            .filter(|record| record.owner == owner)
            .ok_or(BatchError::NotFound(batch_id))
    }
}
