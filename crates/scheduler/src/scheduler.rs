//! The scheduler: queue dispatch, handler execution, and the public job API.

use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Notify, OwnedSemaphorePermit};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use jobline_core::{JobId, JobType, QueueName, ValidationError};
use jobline_events::bus::{EventBus, Subscription};
use jobline_events::in_memory_bus::InMemoryEventBus;
use jobline_events::job_event::{JobEvent, JobEventKind};

use crate::error::SchedulerError;
use crate::handler::{HandlerError, HandlerResult, JobContext, JobHandler, handler_fn};
use crate::registry::{QueueConfig, QueueRegistry};
use crate::store::{InMemoryJobStore, JobStore};
use crate::types::{GlobalStats, Job, JobOptions, JobStatus, QueueStats, RetryPolicy};

struct State {
    store: Box<dyn JobStore>,
    registry: QueueRegistry,
}

/// Wall-clock time derived from the runtime's monotonic clock.
///
/// Readiness (`run_at`) is compared against this, so delays and backoff line up with
/// `tokio::time` sleeps, including under a paused test clock.
#[derive(Debug, Clone, Copy)]
struct Clock {
    wall: DateTime<Utc>,
    origin: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.wall + chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default()
    }
}

struct Inner {
    state: Mutex<State>,
    bus: Arc<InMemoryEventBus<JobEvent>>,
    clock: Clock,
    /// Woken whenever a job reaches a terminal state or leaves the store.
    settled: Notify,
}

/// A job picked by dispatch, ready to be spawned.
struct Launch {
    job: Job,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    permit: OwnedSemaphorePermit,
}

/// Handle to the scheduler. Cloning is cheap; all clones share the same queues.
///
/// Methods that may start jobs spawn Tokio tasks and must be called from within a
/// Tokio runtime.
#[derive(Clone)]
pub struct SchedulerCore {
    inner: Arc<Inner>,
}

/// Builder for [`SchedulerCore`].
#[derive(Default)]
pub struct SchedulerBuilder {
    registry: QueueRegistry,
    store: Option<Box<dyn JobStore>>,
    bus: Option<Arc<InMemoryEventBus<JobEvent>>>,
}

impl SchedulerBuilder {
    pub fn queue(mut self, queue: QueueName, config: QueueConfig) -> Self {
        self.registry.configure(queue, config);
        self
    }

    /// Use a custom store (defaults to [`InMemoryJobStore`]).
    pub fn store(mut self, store: impl JobStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Publish lifecycle events on an existing bus.
    pub fn bus(mut self, bus: Arc<InMemoryEventBus<JobEvent>>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> SchedulerCore {
        let store = self
            .store
            .unwrap_or_else(|| Box::new(InMemoryJobStore::new()));

        SchedulerCore {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    store,
                    registry: self.registry,
                }),
                bus: self.bus.unwrap_or_default(),
                clock: Clock::start(),
                settled: Notify::new(),
            }),
        }
    }
}

impl Default for SchedulerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("queues", &self.lock().registry)
            .finish_non_exhaustive()
    }
}

impl SchedulerCore {
    /// Scheduler with default queue settings and an in-memory store.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time as seen by the scheduler.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Enqueue a job.
    ///
    /// A job whose type has no registered handler stays waiting until one is registered.
    pub fn add(
        &self,
        queue: QueueName,
        job_type: impl Into<JobType>,
        payload: Value,
        options: JobOptions,
    ) -> Result<JobId, SchedulerError> {
        if options.max_attempts == 0 {
            return Err(ValidationError::field("max_attempts", "must be at least 1").into());
        }

        let job = Job::new_at(queue, job_type.into(), payload, &options, self.now());
        let job_id = job.id;

        {
            let mut state = self.lock();
            if !state.registry.has_handler(queue, &job.job_type) {
                warn!(
                    queue = %queue,
                    job_id = %job_id,
                    job_type = %job.job_type,
                    "no handler registered for job type; job stays waiting"
                );
            }
            let event = JobEvent::new(
                job_id,
                queue,
                job.job_type.clone(),
                JobEventKind::Added { priority: job.priority },
            );
            state.store.insert(job)?;
            self.publish(event);
        }

        info!(
            queue = %queue,
            job_id = %job_id,
            priority = options.priority,
            delay_ms = options.delay.as_millis() as u64,
            "job added"
        );

        if !options.delay.is_zero() {
            self.schedule_wakeup(queue, options.delay);
        }
        self.dispatch(queue);

        Ok(job_id)
    }

    /// Register the handler for `job_type` on `queue` and start dispatching.
    pub fn process(&self, queue: QueueName, job_type: impl Into<JobType>, handler: impl JobHandler) {
        let job_type = job_type.into();
        info!(queue = %queue, job_type = %job_type, "handler registered");

        self.lock()
            .registry
            .register(queue, job_type, Arc::new(handler));
        self.dispatch(queue);
    }

    /// [`process`](Self::process) with an async closure.
    pub fn process_fn<F, Fut>(&self, queue: QueueName, job_type: impl Into<JobType>, f: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.process(queue, job_type, handler_fn(f));
    }

    /// Raise the progress of a running job. Lower values are ignored.
    pub fn update_progress(&self, job_id: JobId, percent: i64) -> Result<Job, SchedulerError> {
        let mut state = self.lock();
        let job = state
            .store
            .get_mut(job_id)
            .ok_or(SchedulerError::NotFound(job_id))?;

        if job.status != JobStatus::Active {
            return Err(SchedulerError::NotActive(job_id));
        }

        let percent = u8::try_from(percent.clamp(0, 100)).unwrap_or(100);
        if job.advance_progress(percent) {
            debug!(job_id = %job_id, progress = job.progress, "job progress");
            self.emit(job, JobEventKind::Progress { progress: job.progress });
        }

        Ok(job.clone())
    }

    pub fn get_stats(&self, queue: QueueName) -> QueueStats {
        self.lock().store.stats(queue)
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.lock().store.global_stats()
    }

    /// Jobs of `queue` in `status`, sliced to `[start, end)`; `end = None` lists to the end.
    pub fn get_jobs(
        &self,
        queue: QueueName,
        status: JobStatus,
        start: usize,
        end: Option<usize>,
    ) -> Vec<Job> {
        self.lock().store.list(queue, status, start, end)
    }

    pub fn get_job(&self, job_id: JobId) -> Option<Job> {
        self.lock().store.get(job_id).cloned()
    }

    /// Remove a waiting job. Returns false (and changes nothing) for any other job.
    pub fn remove(&self, job_id: JobId) -> bool {
        let removed = self.lock().store.remove_waiting(job_id);
        if removed {
            info!(job_id = %job_id, "job removed");
            self.inner.settled.notify_waiters();
        }
        removed
    }

    /// Stop dispatching from `queue`. Running jobs are not interrupted.
    pub fn pause(&self, queue: QueueName) {
        self.lock().registry.set_paused(queue, true);
        info!(queue = %queue, "queue paused");
    }

    pub fn resume(&self, queue: QueueName) {
        self.lock().registry.set_paused(queue, false);
        info!(queue = %queue, "queue resumed");
        self.dispatch(queue);
    }

    pub fn is_paused(&self, queue: QueueName) -> bool {
        self.lock().registry.is_paused(queue)
    }

    /// Drop finished jobs that completed more than `older_than` ago.
    pub fn clean(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| self.now().checked_sub_signed(age))
        else {
            return 0;
        };

        let pruned = self.lock().store.prune(cutoff);
        if pruned > 0 {
            info!(pruned, "finished jobs cleaned");
            self.inner.settled.notify_waiters();
        }
        pruned
    }

    /// Wait until the job is completed or failed.
    ///
    /// Resolves to `None` when the job is unknown, removed, or pruned.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Option<Job> {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.get_job(job_id) {
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) => {}
                None => return None,
            }

            notified.await;
        }
    }

    pub fn subscribe(&self) -> Subscription<JobEvent> {
        self.inner.bus.subscribe()
    }

    pub fn bus(&self) -> Arc<InMemoryEventBus<JobEvent>> {
        Arc::clone(&self.inner.bus)
    }

    fn emit(&self, job: &Job, kind: JobEventKind) {
        self.publish(JobEvent::new(job.id, job.queue, job.job_type.clone(), kind));
    }

    fn publish(&self, event: JobEvent) {
        let job_id = event.job_id;
        if let Err(err) = self.inner.bus.publish(event) {
            warn!(job_id = %job_id, error = %err, "failed to publish job event");
        }
    }

    fn schedule_wakeup(&self, queue: QueueName, delay: Duration) {
        let core = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            core.dispatch(queue);
        });
    }

    /// Start as many eligible jobs of `queue` as free slots allow.
    fn dispatch(&self, queue: QueueName) {
        while let Some(launch) = self.claim(queue) {
            self.spawn(launch);
        }
    }

    fn claim(&self, queue: QueueName) -> Option<Launch> {
        let now = self.now();
        let mut state = self.lock();
        let State { store, registry } = &mut *state;

        let runtime = registry.runtime_mut(queue);
        if runtime.paused {
            return None;
        }

        let permit = Arc::clone(&runtime.permits).try_acquire_owned().ok()?;
        let handlers = &runtime.handlers;
        let job_id = store.claim_next(queue, now, &|job| handlers.contains_key(&job.job_type))?;

        let Some(job) = store.get_mut(job_id) else {
            error!(queue = %queue, job_id = %job_id, "claimed job missing from store");
            return None;
        };
        let Some(handler) = handlers.get(&job.job_type).cloned() else {
            error!(queue = %queue, job_id = %job_id, "claimed job has no handler");
            return None;
        };

        job.mark_active(now);
        self.emit(job, JobEventKind::Started { attempt: job.attempts_made });

        Some(Launch {
            job: job.clone(),
            handler,
            retry: runtime.config.retry.clone(),
            timeout: runtime.config.job_timeout,
            permit,
        })
    }

    fn spawn(&self, launch: Launch) {
        let Launch {
            job,
            handler,
            retry,
            timeout,
            permit,
        } = launch;

        let span = info_span!(
            "job",
            job.id = %job.id,
            queue = %job.queue,
            job_type = %job.job_type,
            attempt = job.attempts_made
        );
        let job_id = job.id;
        let queue = job.queue;
        let core = self.clone();

        tokio::spawn(
            async move {
                debug!("job started");
                let outcome = run_guarded(handler, JobContext::new(job, core.clone()), timeout).await;
                core.finish(queue, job_id, outcome, &retry, permit);
            }
            .instrument(span),
        );
    }

    /// Record the outcome of one attempt, free its slot, and dispatch again.
    fn finish(
        &self,
        queue: QueueName,
        job_id: JobId,
        outcome: HandlerResult,
        retry: &RetryPolicy,
        permit: OwnedSemaphorePermit,
    ) {
        let now = self.now();
        let terminal = {
            let mut state = self.lock();
            match state.store.get_mut(job_id) {
                Some(job) => {
                    let terminal = match outcome {
                        Ok(result) => {
                            job.mark_completed(result.clone(), now);
                            info!(attempts = job.attempts_made, "job completed");
                            self.emit(job, JobEventKind::Completed { result });
                            true
                        }
                        Err(err) => match job.mark_failed(err.message().to_string(), retry, now) {
                            Some(delay) => {
                                warn!(
                                    attempt = job.attempts_made,
                                    max_attempts = job.max_attempts,
                                    retry_in_ms = delay.as_millis() as u64,
                                    error = %err,
                                    "job failed, retrying"
                                );
                                self.schedule_wakeup(queue, delay);
                                false
                            }
                            None => {
                                error!(attempts = job.attempts_made, error = %err, "job failed permanently");
                                self.emit(
                                    job,
                                    JobEventKind::Failed {
                                        error: err.message().to_string(),
                                        attempts: job.attempts_made,
                                    },
                                );
                                true
                            }
                        },
                    };

                    if let Err(err) = state.store.settle(job_id) {
                        error!(job_id = %job_id, error = %err, "failed to settle job");
                    }
                    terminal
                }
                // The slot is still released and the queue dispatched below.
                None => {
                    error!(job_id = %job_id, queue = %queue, "finished job missing from store");
                    false
                }
            }
        };

        if terminal {
            self.inner.settled.notify_waiters();
        }
        drop(permit);
        self.dispatch(queue);
    }
}

/// Run one attempt on its own task so a panic or a watchdog timeout becomes a
/// handler error instead of taking the slot down with it.
async fn run_guarded(
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
    timeout: Option<Duration>,
) -> HandlerResult {
    let mut task = tokio::spawn(async move { handler.run(ctx).await }.in_current_span());

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(HandlerError::new(format!(
                    "job timed out after {}ms",
                    limit.as_millis()
                )));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(HandlerError::new(format!(
            "handler panicked: {}",
            panic_message(err.into_panic().as_ref())
        ))),
        Err(err) => Err(HandlerError::new(format!("handler task failed: {err}"))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
