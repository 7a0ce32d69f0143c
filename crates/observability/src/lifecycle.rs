//! Consumer task for job lifecycle events.
//!
//! Logs every event with structured fields and keeps running totals per kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use jobline_events::bus::Subscription;
use jobline_events::event::Event;
use jobline_events::job_event::{JobEvent, JobEventKind};

/// Running totals of lifecycle events seen.
#[derive(Debug, Default)]
pub struct LifecycleCounters {
    added: AtomicU64,
    started: AtomicU64,
    progress: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`LifecycleCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub added: u64,
    pub started: u64,
    pub progress: u64,
    pub completed: u64,
    pub failed: u64,
}

impl LifecycleCounters {
    pub fn record(&self, kind: &JobEventKind) {
        let counter = match kind {
            JobEventKind::Added { .. } => &self.added,
            JobEventKind::Started { .. } => &self.started,
            JobEventKind::Progress { .. } => &self.progress,
            JobEventKind::Completed { .. } => &self.completed,
            JobEventKind::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            added: self.added.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            progress: self.progress.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running event logger.
#[derive(Debug)]
pub struct EventLoggerHandle {
    counters: Arc<LifecycleCounters>,
    join: JoinHandle<()>,
}

impl EventLoggerHandle {
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Stop consuming events; returns the final counts.
    pub fn shutdown(self) -> CounterSnapshot {
        self.join.abort();
        self.counters.snapshot()
    }

    /// Wait for the task to end on its own (when the bus goes away).
    pub async fn finished(self) -> CounterSnapshot {
        let _ = self.join.await;
        self.counters.snapshot()
    }
}

/// Spawn a task that logs every event from `subscription` until the bus is dropped.
pub fn spawn_event_logger(mut subscription: Subscription<JobEvent>) -> EventLoggerHandle {
    let counters = Arc::new(LifecycleCounters::default());
    let task_counters = Arc::clone(&counters);

    let join = tokio::spawn(
        async move {
            while let Some(event) = subscription.recv().await {
                task_counters.record(&event.kind);
                log_event(&event);
            }
            debug!("event bus closed; logger stopping");
        }
        .instrument(info_span!("event_logger")),
    );

    EventLoggerHandle { counters, join }
}

fn log_event(event: &JobEvent) {
    let event_type = event.event_type();
    let job_id = &event.job_id;
    let queue = event.queue.as_str();
    let job_type = event.job_type.as_str();

    match &event.kind {
        JobEventKind::Added { priority } => {
            info!(event_type, job_id = %job_id, queue, job_type, priority, "job event");
        }
        JobEventKind::Started { attempt } => {
            info!(event_type, job_id = %job_id, queue, job_type, attempt, "job event");
        }
        JobEventKind::Progress { progress } => {
            debug!(event_type, job_id = %job_id, queue, job_type, progress, "job event");
        }
        JobEventKind::Completed { .. } => {
            info!(event_type, job_id = %job_id, queue, job_type, "job event");
        }
        JobEventKind::Failed { error, attempts } => {
            error!(event_type, job_id = %job_id, queue, job_type, attempts, error = %error, "job event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jobline_core::{JobId, JobType, QueueName};
    use jobline_events::bus::EventBus;
    use jobline_events::in_memory_bus::InMemoryEventBus;

    use super::*;

    fn event(kind: JobEventKind) -> JobEvent {
        JobEvent::new(JobId::new(), QueueName::Email, JobType::BatchComplete, kind)
    }

    #[tokio::test]
    async fn counts_every_kind_and_stops_with_the_bus() {
        let bus = InMemoryEventBus::new();
        let logger = spawn_event_logger(bus.subscribe());

        bus.publish(event(JobEventKind::Added { priority: 0 })).unwrap();
        bus.publish(event(JobEventKind::Started { attempt: 1 })).unwrap();
        bus.publish(event(JobEventKind::Progress { progress: 50 })).unwrap();
        bus.publish(event(JobEventKind::Completed {
            result: serde_json::json!(null),
        }))
        .unwrap();
        bus.publish(event(JobEventKind::Failed {
            error: "boom".into(),
            attempts: 3,
        }))
        .unwrap();
        drop(bus);

        let counts = tokio::time::timeout(Duration::from_secs(5), logger.finished())
            .await
            .unwrap();
        assert_eq!(
            counts,
            CounterSnapshot {
                added: 1,
                started: 1,
                progress: 1,
                completed: 1,
                failed: 1,
            }
        );
    }

    #[test]
    fn snapshot_starts_at_zero() {
        assert_eq!(LifecycleCounters::default().snapshot(), CounterSnapshot::default());
    }
}
