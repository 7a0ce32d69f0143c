//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobline_core::{JobId, JobType, QueueName};

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// In `pending`, waiting for a slot (or for its delay/backoff to elapse)
    Waiting,
    /// Handler currently running
    Active,
    /// Handler returned normally
    Completed,
    /// Retries exhausted
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-job options accepted by `add()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Higher runs first
    pub priority: i32,
    /// Not eligible for dispatch before `now + delay`
    pub delay: Duration,
    /// Total attempts allowed (first run included)
    pub max_attempts: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: Duration::ZERO,
            max_attempts: 3,
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Retry backoff for a queue.
///
/// The delay after the n-th failed attempt is `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Record of a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: JobType,
    /// Opaque data handed to the handler
    pub payload: Value,
    pub priority: i32,
    pub max_attempts: u32,
    /// Dispatch attempts so far (mutated only by the scheduler)
    pub attempts_made: u32,
    pub status: JobStatus,
    /// 0..=100, written only through the running job's context
    pub progress: u8,
    pub result: Option<Value>,
    /// Last handler error (terminal error once `Failed`)
    pub error: Option<String>,
    /// Not eligible before this instant (initial delay or retry backoff)
    pub run_at: Option<DateTime<Utc>>,
    pub logs: Vec<JobLogEntry>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new waiting job.
    pub fn new(queue: QueueName, job_type: JobType, payload: Value, options: &JobOptions) -> Self {
        Self::new_at(queue, job_type, payload, options, Utc::now())
    }

    /// Create a new waiting job as of `now`.
    pub fn new_at(
        queue: QueueName,
        job_type: JobType,
        payload: Value,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let run_at = (!options.delay.is_zero())
            .then(|| now + chrono::Duration::from_std(options.delay).unwrap_or_default());

        Self {
            id: JobId::new(),
            queue,
            job_type,
            payload,
            priority: options.priority,
            max_attempts: options.max_attempts,
            attempts_made: 0,
            status: JobStatus::Waiting,
            progress: 0,
            result: None,
            error: None,
            run_at,
            logs: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Check if the job's delay/backoff has elapsed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.run_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Mark job as active (one dispatch attempt).
    pub fn mark_active(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.attempts_made += 1;
        self.started_at = Some(now);
        self.run_at = None;
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    /// Record a failed attempt.
    ///
    /// Returns the backoff delay when another attempt is scheduled, `None` when the job
    /// has exhausted its attempts and is now `Failed`.
    pub fn mark_failed(
        &mut self,
        error: String,
        retry: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        self.logs.push(JobLogEntry {
            attempt: self.attempts_made,
            timestamp: now,
            message: error.clone(),
        });
        self.error = Some(error);

        if self.can_retry() {
            let delay = retry.delay_for_attempt(self.attempts_made);
            self.status = JobStatus::Waiting;
            self.run_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            Some(delay)
        } else {
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
            None
        }
    }

    /// Raise progress to `percent` (clamped to 100).
    ///
    /// Progress never moves backwards; returns whether the value changed.
    pub fn advance_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }
}

/// Per-queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Counts across all queues.
///
/// `processed`/`failed` are lifetime totals and survive pruning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub waiting: usize,
    pub active: usize,
    pub processed: u64,
    pub failed: u64,
}
