//! Job storage: job records and queue membership.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};

use jobline_core::{JobId, QueueName};

use crate::types::{GlobalStats, Job, JobStatus, QueueStats};

/// Job store abstraction.
///
/// The store is a passive data structure: the scheduler calls it while holding its own
/// lock, so implementations need no internal synchronisation. A durable broker could
/// implement the same contract for multi-process deployments.
pub trait JobStore: Send {
    /// Register a new waiting job and place it in its queue's pending set.
    fn insert(&mut self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Option<&Job>;

    /// Get a job by ID for mutation.
    fn get_mut(&mut self, job_id: JobId) -> Option<&mut Job>;

    /// Move the best eligible pending job of `queue` into the active set.
    ///
    /// Order: highest priority first, then earliest insertion. Jobs that are not ready
    /// at `now`, or rejected by `runnable`, are skipped but keep their position.
    fn claim_next(
        &mut self,
        queue: QueueName,
        now: DateTime<Utc>,
        runnable: &dyn Fn(&Job) -> bool,
    ) -> Option<JobId>;

    /// Take an active job out of the active set and file it according to its status:
    /// `Waiting` goes back to pending (behind jobs already there), terminal statuses go
    /// to history.
    fn settle(&mut self, job_id: JobId) -> Result<(), JobStoreError>;

    /// Delete a job that is still waiting. Returns false for any other status.
    fn remove_waiting(&mut self, job_id: JobId) -> bool;

    /// Get queue statistics.
    fn stats(&self, queue: QueueName) -> QueueStats;

    /// Get statistics across all queues.
    fn global_stats(&self) -> GlobalStats;

    /// List jobs of `queue` in `status`, sliced to `[start, end)` (`end = None`: to the end).
    ///
    /// Waiting jobs are listed in dispatch order, the others oldest first.
    fn list(
        &self,
        queue: QueueName,
        status: JobStatus,
        start: usize,
        end: Option<usize>,
    ) -> Vec<Job>;

    /// Drop finished jobs whose `completed_at` is before `cutoff`. Returns how many.
    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is not active")]
    NotActive(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Pending order key: priority descending, then insertion sequence ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Reverse<i32>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueSlots {
    pending: BTreeMap<PendingKey, JobId>,
    active: Vec<JobId>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
}

/// In-memory job store (single process).
///
/// Finished jobs are kept for inspection up to `history_limit` per queue and status;
/// older entries are evicted first.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: HashMap<JobId, Job>,
    queues: HashMap<QueueName, QueueSlots>,
    next_seq: u64,
    history_limit: usize,
    processed_total: u64,
    failed_total: u64,
}

impl InMemoryJobStore {
    pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

    pub fn new() -> Self {
        Self::with_history_limit(Self::DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            queues: HashMap::new(),
            next_seq: 0,
            history_limit,
            processed_total: 0,
            failed_total: 0,
        }
    }

    fn push_pending(&mut self, queue: QueueName, priority: i32, job_id: JobId) {
        let key = PendingKey {
            priority: Reverse(priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queues.entry(queue).or_default().pending.insert(key, job_id);
    }

    fn push_history(&mut self, queue: QueueName, status: JobStatus, job_id: JobId) {
        let slots = self.queues.entry(queue).or_default();
        let history = match status {
            JobStatus::Completed => &mut slots.completed,
            _ => &mut slots.failed,
        };
        history.push_back(job_id);

        while history.len() > self.history_limit {
            if let Some(evicted) = history.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&mut self, job: Job) -> Result<JobId, JobStoreError> {
        if self.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let (id, queue, priority) = (job.id, job.queue, job.priority);
        self.jobs.insert(id, job);
        self.push_pending(queue, priority, id);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    fn get_mut(&mut self, job_id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&job_id)
    }

    fn claim_next(
        &mut self,
        queue: QueueName,
        now: DateTime<Utc>,
        runnable: &dyn Fn(&Job) -> bool,
    ) -> Option<JobId> {
        let slots = self.queues.get_mut(&queue)?;
        let jobs = &self.jobs;

        let key = slots
            .pending
            .iter()
            .find(|(_, id)| {
                jobs.get(*id)
                    .is_some_and(|job| job.is_ready(now) && runnable(job))
            })
            .map(|(key, _)| *key)?;

        let job_id = slots.pending.remove(&key)?;
        slots.active.push(job_id);
        Some(job_id)
    }

    fn settle(&mut self, job_id: JobId) -> Result<(), JobStoreError> {
        let (queue, status, priority) = self
            .jobs
            .get(&job_id)
            .map(|job| (job.queue, job.status, job.priority))
            .ok_or(JobStoreError::NotFound(job_id))?;

        let slots = self.queues.entry(queue).or_default();
        let before = slots.active.len();
        slots.active.retain(|id| *id != job_id);
        if slots.active.len() == before {
            return Err(JobStoreError::NotActive(job_id));
        }

        match status {
            JobStatus::Waiting => self.push_pending(queue, priority, job_id),
            JobStatus::Completed => {
                self.processed_total += 1;
                self.push_history(queue, status, job_id);
            }
            JobStatus::Failed => {
                self.failed_total += 1;
                self.push_history(queue, status, job_id);
            }
            JobStatus::Active => {
                return Err(JobStoreError::Storage(format!(
                    "job {job_id} settled while still active"
                )));
            }
        }
        Ok(())
    }

    fn remove_waiting(&mut self, job_id: JobId) -> bool {
        let Some(job) = self.jobs.get(&job_id) else {
            return false;
        };
        if job.status != JobStatus::Waiting {
            return false;
        }

        let Some(slots) = self.queues.get_mut(&job.queue) else {
            return false;
        };
        let Some(key) = slots
            .pending
            .iter()
            .find(|(_, id)| **id == job_id)
            .map(|(key, _)| *key)
        else {
            return false;
        };

        slots.pending.remove(&key);
        self.jobs.remove(&job_id);
        true
    }

    fn stats(&self, queue: QueueName) -> QueueStats {
        self.queues
            .get(&queue)
            .map(|slots| QueueStats {
                waiting: slots.pending.len(),
                active: slots.active.len(),
                completed: slots.completed.len(),
                failed: slots.failed.len(),
            })
            .unwrap_or_default()
    }

    fn global_stats(&self) -> GlobalStats {
        let (waiting, active) = self.queues.values().fold((0, 0), |(w, a), slots| {
            (w + slots.pending.len(), a + slots.active.len())
        });

        GlobalStats {
            waiting,
            active,
            processed: self.processed_total,
            failed: self.failed_total,
        }
    }

    fn list(
        &self,
        queue: QueueName,
        status: JobStatus,
        start: usize,
        end: Option<usize>,
    ) -> Vec<Job> {
        let Some(slots) = self.queues.get(&queue) else {
            return Vec::new();
        };

        let ids: Vec<JobId> = match status {
            JobStatus::Waiting => slots.pending.values().copied().collect(),
            JobStatus::Active => slots.active.clone(),
            JobStatus::Completed => slots.completed.iter().copied().collect(),
            JobStatus::Failed => slots.failed.iter().copied().collect(),
        };

        let end = end.unwrap_or(ids.len()).min(ids.len());
        if start >= end {
            return Vec::new();
        }

        ids[start..end]
            .iter()
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect()
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let jobs = &mut self.jobs;
        let mut pruned = 0;

        for slots in self.queues.values_mut() {
            for history in [&mut slots.completed, &mut slots.failed] {
                history.retain(|id| {
                    let expired = jobs
                        .get(id)
                        .and_then(|job| job.completed_at)
                        .is_none_or(|at| at < cutoff);
                    if expired {
                        jobs.remove(id);
                        pruned += 1;
                    }
                    !expired
                });
            }
        }

        pruned
    }
}
