//! Batch orchestration on top of the job scheduler.
//!
//! A batch is a list of items analyzed one at a time by an [`AnalysisProvider`] inside a
//! single `Batch/ProcessBatch` job. Progress is checkpointed to a [`BatchStore`] after
//! every item; when the batch finishes, report and notification jobs are enqueued on
//! their own queues exactly once.

pub mod analyze;
pub mod cancel;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod service;
pub mod store;
pub mod summary;

pub use analyze::{AnalyzeItemHandler, AnalyzeItemRequest};
pub use cancel::CancelledBatches;
pub use model::{
    AnalysisOptions, BatchItem, BatchJob, BatchOptions, BatchOutcome, BatchPriority,
    BatchReceipt, BatchStatus, BatchStatusRecord, BatchStatusView, ItemAnalysis, ItemError,
    NotificationRequest, OutcomeSummary, ReportRequest, ReportType, estimate_processing_time,
};
pub use orchestrator::{BatchOrchestrator, DEFAULT_FAN_OUT_HISTORY, DEFAULT_PACING};
pub use provider::{AnalysisProvider, ProviderError};
pub use service::{BATCH_MAX_ATTEMPTS, BatchError, BatchService, MAX_BATCH_ITEMS};
pub use store::{BatchStore, InMemoryBatchStore, StoreError, merge_checkpoint};
pub use summary::{ExecutiveSummary, executive_summary};
