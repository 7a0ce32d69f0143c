//! Handler abstraction and the per-job context handed to it.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use jobline_core::JobId;

use crate::error::SchedulerError;
use crate::scheduler::SchedulerCore;
use crate::types::Job;

/// A handler failure.
///
/// Every handler failure is treated the same way by the scheduler: it counts against the
/// job's `max_attempts` and is retried with backoff until those run out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid payload: {err}"))
    }
}

impl From<SchedulerError> for HandlerError {
    fn from(err: SchedulerError) -> Self {
        Self::new(err.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// Executes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, ctx: JobContext) -> HandlerResult;
}

/// What a running handler can see and do.
///
/// The context is scoped to one job: progress updates can only target that job.
#[derive(Clone)]
pub struct JobContext {
    job: Job,
    scheduler: SchedulerCore,
}

impl JobContext {
    pub(crate) fn new(job: Job, scheduler: SchedulerCore) -> Self {
        Self { job, scheduler }
    }

    /// Snapshot of the job taken when it was dispatched.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    /// 1-based attempt number of this run.
    pub fn attempt(&self) -> u32 {
        self.job.attempts_made
    }

    pub fn payload(&self) -> &Value {
        &self.job.payload
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(self.job.payload.clone())?)
    }

    /// Report progress for this job; returns the updated snapshot.
    pub fn update_progress(&self, percent: i64) -> Result<Job, SchedulerError> {
        self.scheduler.update_progress(self.job.id, percent)
    }

    /// The scheduler running this job, for enqueuing follow-on work.
    pub fn scheduler(&self) -> &SchedulerCore {
        &self.scheduler
    }
}

impl core::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job.id)
            .field("queue", &self.job.queue)
            .field("job_type", &self.job.job_type)
            .field("attempt", &self.job.attempts_made)
            .finish()
    }
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct HandlerFn<F>(F);

/// Build a handler from `|ctx| async move { ... }`.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> HandlerResult {
        (self.0)(ctx).await
    }
}
