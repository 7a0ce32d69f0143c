//! Queue registry: per-queue settings, concurrency permits, and handler tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use jobline_core::{JobType, QueueName};

use crate::handler::JobHandler;
use crate::types::RetryPolicy;

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum simultaneously active jobs
    pub concurrency: usize,
    /// Backoff between attempts
    pub retry: RetryPolicy,
    /// Watchdog: a run taking longer than this counts as a failed attempt
    pub job_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry: RetryPolicy::default(),
            job_timeout: None,
        }
    }
}

impl QueueConfig {
    /// Concurrency is clamped to at least one slot.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }
}

pub(crate) struct QueueRuntime {
    pub(crate) config: QueueConfig,
    /// One permit per concurrency slot; a dispatched job holds its permit until settled.
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    pub(crate) paused: bool,
}

impl QueueRuntime {
    fn new(config: QueueConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            config,
            handlers: HashMap::new(),
            paused: false,
        }
    }
}

/// Named queues, created with default settings on first use.
#[derive(Default)]
pub struct QueueRegistry {
    queues: HashMap<QueueName, QueueRuntime>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a queue's configuration. Meant for start-up, before any job is dispatched.
    pub fn configure(&mut self, queue: QueueName, config: QueueConfig) {
        self.queues.insert(queue, QueueRuntime::new(config));
    }

    pub fn config(&self, queue: QueueName) -> QueueConfig {
        self.queues
            .get(&queue)
            .map(|rt| rt.config.clone())
            .unwrap_or_default()
    }

    /// Register (or replace) the handler for `job_type` on `queue`.
    pub fn register(&mut self, queue: QueueName, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.runtime_mut(queue).handlers.insert(job_type, handler);
    }

    pub fn has_handler(&self, queue: QueueName, job_type: &JobType) -> bool {
        self.queues
            .get(&queue)
            .is_some_and(|rt| rt.handlers.contains_key(job_type))
    }

    pub fn is_paused(&self, queue: QueueName) -> bool {
        self.queues.get(&queue).is_some_and(|rt| rt.paused)
    }

    pub fn set_paused(&mut self, queue: QueueName, paused: bool) {
        self.runtime_mut(queue).paused = paused;
    }

    pub(crate) fn runtime_mut(&mut self, queue: QueueName) -> &mut QueueRuntime {
        self.queues
            .entry(queue)
            .or_insert_with(|| QueueRuntime::new(QueueConfig::default()))
    }
}

impl core::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (name, rt) in &self.queues {
            let handlers: Vec<&str> = rt.handlers.keys().map(JobType::as_str).collect();
            map.entry(
                name,
                &format_args!(
                    "concurrency={} paused={} handlers={:?}",
                    rt.config.concurrency, rt.paused, handlers
                ),
            );
        }
        map.finish()
    }
}
