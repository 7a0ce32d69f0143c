//! In-process job scheduler with bounded concurrency, retry, and backoff.
//!
//! ## Design
//!
//! - Jobs live in named queues and are routed to handlers by [`JobType`]
//! - Each queue has its own concurrency bound, retry policy, and optional watchdog
//! - Pending jobs form a stable priority queue (priority desc, FIFO within a priority)
//! - Failed attempts are retried with capped exponential backoff up to `max_attempts`
//! - Lifecycle transitions are published on a typed event bus
//!
//! ## Components
//!
//! - [`Job`]: the job record and its state transitions
//! - [`JobStore`]: job records and queue membership ([`InMemoryJobStore`])
//! - [`QueueRegistry`]: per-queue configuration and the `JobType → handler` table
//! - [`SchedulerCore`]: the dispatch loop and public API
//! - [`JanitorHandle`]: periodic pruning of finished jobs
//!
//! [`JobType`]: jobline_core::JobType

pub mod error;
pub mod handler;
pub mod janitor;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use error::SchedulerError;
pub use handler::{HandlerError, HandlerFn, HandlerResult, JobContext, JobHandler, handler_fn};
pub use janitor::JanitorHandle;
pub use registry::{QueueConfig, QueueRegistry};
pub use scheduler::{SchedulerBuilder, SchedulerCore};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{
    GlobalStats, Job, JobLogEntry, JobOptions, JobStatus, QueueStats, RetryPolicy,
};
