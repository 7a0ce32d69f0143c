//! Job lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobline_core::{JobId, JobType, QueueName};

use crate::event::Event;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Inserted into the queue's pending set.
    Added { priority: i32 },
    /// Dispatched to its handler (`attempt` is 1-based).
    Started { attempt: u32 },
    /// The running handler reported progress (0..=100).
    Progress { progress: u8 },
    /// The handler returned normally.
    Completed { result: Value },
    /// The handler failed on its last allowed attempt.
    Failed { error: String, attempts: u32 },
}

/// A lifecycle notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue: QueueName,
    pub job_type: JobType,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn new(job_id: JobId, queue: QueueName, job_type: JobType, kind: JobEventKind) -> Self {
        Self {
            job_id,
            queue,
            job_type,
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            JobEventKind::Completed { .. } | JobEventKind::Failed { .. }
        )
    }
}

impl Event for JobEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            JobEventKind::Added { .. } => "job-added",
            JobEventKind::Started { .. } => "job-started",
            JobEventKind::Progress { .. } => "job-progress",
            JobEventKind::Completed { .. } => "job-completed",
            JobEventKind::Failed { .. } => "job-failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_follow_lifecycle_names() {
        let id = JobId::new();
        let ev = |kind| JobEvent::new(id, QueueName::Batch, JobType::ProcessBatch, kind);

        assert_eq!(ev(JobEventKind::Added { priority: 0 }).event_type(), "job-added");
        assert_eq!(ev(JobEventKind::Started { attempt: 1 }).event_type(), "job-started");
        assert_eq!(ev(JobEventKind::Progress { progress: 50 }).event_type(), "job-progress");
        assert!(ev(JobEventKind::Completed { result: Value::Null }).is_terminal());
        assert!(
            ev(JobEventKind::Failed {
                error: "boom".into(),
                attempts: 3
            })
            .is_terminal()
        );
    }

    #[test]
    fn serialized_event_is_flat() {
        let ev = JobEvent::new(
            JobId::new(),
            QueueName::Email,
            JobType::BatchComplete,
            JobEventKind::Progress { progress: 40 },
        );
        let json = serde_json::to_value(&ev).unwrap();

        assert_eq!(json["kind"], "progress");
        assert_eq!(json["progress"], 40);
        assert_eq!(json["queue"], "email");
        assert_eq!(json["job_type"], "batch-complete");
    }
}
