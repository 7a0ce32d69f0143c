use jobline_core::{JobId, ValidationError};

use crate::store::JobStoreError;

/// Errors returned by the scheduler API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// Bad `add()` arguments; nothing was enqueued.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The operation needs a running job.
    #[error("job {0} is not active")]
    NotActive(JobId),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}
