//! Batch orchestrator: drives one batch through its items and fans out follow-on jobs.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use jobline_core::{BatchId, JobType, QueueName};
use jobline_scheduler::{HandlerResult, JobContext, JobHandler, JobOptions, SchedulerCore};

use crate::cancel::CancelledBatches;
use crate::model::{
    BatchJob, BatchOutcome, BatchStatus, BatchStatusRecord, ItemError, NotificationRequest,
    OutcomeSummary, ReportRequest, ReportType,
};
use crate::provider::AnalysisProvider;
use crate::store::BatchStore;
use crate::summary::executive_summary;

/// Default pause between two item analyses.
pub const DEFAULT_PACING: Duration = Duration::from_secs(2);
/// Default number of fanned-out batch ids remembered per orchestrator.
pub const DEFAULT_FAN_OUT_HISTORY: usize = 1024;

/// Batch ids whose follow-on jobs were enqueued; the oldest are evicted past `capacity`.
#[derive(Debug)]
struct FanOutLedger {
    seen: HashSet<BatchId>,
    order: VecDeque<BatchId>,
    capacity: usize,
}

impl FanOutLedger {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false if `id` is already recorded.
    fn record(&mut self, id: BatchId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Handler for `Batch/ProcessBatch` jobs.
///
/// Items are analyzed strictly one after another with a pacing delay in between. Item
/// failures are collected, never fatal. The batch ends `Failed` only when every item
/// failed; the job itself still completes, so the scheduler does not retry a batch for
/// business-level failures. A retried attempt resumes after the items already recorded.
#[derive(Clone)]
pub struct BatchOrchestrator {
    provider: Arc<dyn AnalysisProvider>,
    store: Arc<dyn BatchStore>,
    cancelled: CancelledBatches,
    fanned_out: Arc<Mutex<FanOutLedger>>,
    pacing: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        store: Arc<dyn BatchStore>,
        cancelled: CancelledBatches,
    ) -> Self {
        Self {
            provider,
            store,
            cancelled,
            fanned_out: Arc::new(Mutex::new(FanOutLedger::with_capacity(
                DEFAULT_FAN_OUT_HISTORY,
            ))),
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// How many fanned-out batches to remember (at least one).
    pub fn with_fan_out_history(mut self, capacity: usize) -> Self {
        self.fanned_out = Arc::new(Mutex::new(FanOutLedger::with_capacity(capacity)));
        self
    }

    /// Register as the `Batch/ProcessBatch` handler.
    pub fn register(&self, scheduler: &SchedulerCore) {
        scheduler.process(QueueName::Batch, JobType::ProcessBatch, self.clone());
    }

    fn fanned_out(&self) -> std::sync::MutexGuard<'_, FanOutLedger> {
        self.fanned_out.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `record` through the store's conditional write and adopt a cancellation
    /// made by someone else in the meantime.
    async fn checkpoint(&self, record: &mut BatchStatusRecord) {
        if self.cancelled.contains(record.id) {
            record.status = BatchStatus::Cancelled;
        }
        match self.store.save_checkpoint(record).await {
            Ok(stored) if stored.status == BatchStatus::Cancelled => {
                record.status = BatchStatus::Cancelled;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(batch_id = %record.id, error = %err, "failed to persist batch checkpoint");
            }
        }
    }

    /// Stored progress of an earlier attempt of the same batch, if any.
    async fn resume_point(&self, ctx: &JobContext, job: &BatchJob) -> Option<BatchStatusRecord> {
        if ctx.attempt() <= 1 {
            return None;
        }
        match self.store.load_status(job.batch_id).await {
            Ok(Some(record)) if record.processed <= job.items.len() => Some(record),
            Ok(_) => None,
            Err(err) => {
                warn!(batch_id = %job.batch_id, error = %err, "failed to load batch for resume");
                None
            }
        }
    }

    async fn process(&self, ctx: &JobContext, job: &BatchJob) -> BatchStatusRecord {
        let total = job.items.len();
        let mut record = match self.resume_point(ctx, job).await {
            Some(record) => {
                info!(batch_id = %job.batch_id, processed = record.processed, "resuming batch");
                record
            }
            None => BatchStatusRecord::queued(job),
        };
        if !record.status.is_terminal() {
            record.status = BatchStatus::Processing;
        }
        record.started_at.get_or_insert_with(Utc::now);

        info!(batch_id = %job.batch_id, items = total, attempt = ctx.attempt(), "batch processing started");
        self.checkpoint(&mut record).await;

        let skip = record.processed;
        for (index, item) in job.items.iter().enumerate().skip(skip) {
            debug!(item = item.name(), position = index + 1, total, "analyzing item");

            match self.provider.analyze(item, &job.options.analysis).await {
                Ok(analysis) => record.record_success(analysis),
                Err(err) => {
                    warn!(item = item.name(), error = %err, "item analysis failed");
                    record.record_error(ItemError {
                        item: item.name().to_string(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }

            self.checkpoint(&mut record).await;
            if let Err(err) = ctx.update_progress(i64::from(record.progress())) {
                warn!(error = %err, "failed to report batch progress");
            }

            if index + 1 < total && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        if record.results.len() > 1 {
            match self.provider.compare(&record.results).await {
                Ok(comparative) => record.comparative = Some(comparative),
                Err(err) => warn!(error = %err, "comparative analysis failed; continuing without it"),
            }
        }

        let now = Utc::now();
        record.executive_summary = executive_summary(&record.results, now);
        record.status = if record.status == BatchStatus::Cancelled
            || self.cancelled.contains(job.batch_id)
        {
            BatchStatus::Cancelled
        } else if total > 0 && record.errors.len() == total {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        record.completed_at = Some(now);

        // A cancellation stored after the status above was chosen still wins.
        match self.store.save_checkpoint(&record).await {
            Ok(stored) => record = stored,
            Err(err) => {
                warn!(batch_id = %job.batch_id, error = %err, "failed to persist final batch status");
            }
        }

        info!(
            batch_id = %job.batch_id,
            status = ?record.status,
            succeeded = record.success_count,
            failed = record.error_count,
            "batch processing finished"
        );
        record
    }

    /// Enqueue report and notification jobs for a finished batch, at most once per batch.
    ///
    /// `record` must be the final record as stored; a cancelled batch gets nothing.
    fn fan_out(&self, scheduler: &SchedulerCore, job: &BatchJob, record: &BatchStatusRecord) {
        {
            let mut ledger = self.fanned_out();
            if record.status == BatchStatus::Cancelled {
                info!(batch_id = %record.id, "batch cancelled; no follow-on jobs");
                return;
            }
            if !ledger.record(record.id) {
                debug!(batch_id = %record.id, "follow-on jobs already enqueued");
                return;
            }
        }

        let options = &job.options;
        if options.include_report && !record.results.is_empty() {
            let request = ReportRequest {
                batch_id: record.id,
                owner: record.owner.clone(),
                results: record.results.clone(),
                comparative: record.comparative.clone(),
                report_type: if record.results.len() > 1 {
                    ReportType::Comparative
                } else {
                    ReportType::Standard
                },
                options: options.clone(),
            };
            enqueue(scheduler, record.id, QueueName::Report, JobType::GenerateReport, &request);
        }

        if options.send_email || options.send_webhook {
            let processing_time_ms = record
                .completed_at
                .map(|done| (done - job.created_at).num_milliseconds().max(0) as u64)
                .unwrap_or_default();
            let notification = NotificationRequest {
                batch_id: record.id,
                owner: record.owner.clone(),
                outcome: OutcomeSummary {
                    status: record.status,
                    total: record.total,
                    success_count: record.success_count,
                    error_count: record.error_count,
                    processing_time_ms,
                },
                include_report: options.include_report,
            };

            if options.send_email {
                enqueue(scheduler, record.id, QueueName::Email, JobType::BatchComplete, &notification);
            }
            if options.send_webhook {
                enqueue(scheduler, record.id, QueueName::Webhook, JobType::BatchWebhook, &notification);
            }
        }
    }
}

/// Add a follow-on job; failures are logged and never fail the batch.
fn enqueue<T: Serialize>(
    scheduler: &SchedulerCore,
    batch_id: BatchId,
    queue: QueueName,
    job_type: JobType,
    payload: &T,
) {
    let payload = match serde_json::to_value(payload) {
        Ok(payload) => payload,
        Err(err) => {
            error!(batch_id = %batch_id, queue = %queue, error = %err, "failed to encode follow-on job");
            return;
        }
    };

    match scheduler.add(queue, job_type, payload, JobOptions::default()) {
        Ok(job_id) => info!(batch_id = %batch_id, queue = %queue, job_id = %job_id, "follow-on job enqueued"),
        Err(err) => error!(batch_id = %batch_id, queue = %queue, error = %err, "failed to enqueue follow-on job"),
    }
}

#[async_trait]
impl JobHandler for BatchOrchestrator {
    async fn run(&self, ctx: JobContext) -> HandlerResult {
        let job: BatchJob = ctx.payload_as()?;

        if self.cancelled.contains(job.batch_id) {
            info!(batch_id = %job.batch_id, "batch cancelled before start; skipping");
            let mut record = match self.store.load_status(job.batch_id).await {
                Ok(Some(record)) => record,
                _ => BatchStatusRecord::queued(&job),
            };
            record.status = BatchStatus::Cancelled;
            self.cancelled.clear(job.batch_id);
            return Ok(serde_json::to_value(BatchOutcome::from(&record))?);
        }

        let record = self.process(&ctx, &job).await;
        self.fan_out(ctx.scheduler(), &job, &record);
        self.cancelled.clear(job.batch_id);

        Ok(serde_json::to_value(BatchOutcome::from(&record))?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::model::{AnalysisOptions, BatchItem, BatchOptions, ItemAnalysis};
    use crate::provider::ProviderError;
    use crate::store::InMemoryBatchStore;

    /// Fails every item whose name starts with `fail`.
    #[derive(Default)]
    struct ScriptedProvider {
        compares: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisProvider for ScriptedProvider {
        async fn analyze(
            &self,
            item: &BatchItem,
            _options: &AnalysisOptions,
        ) -> Result<ItemAnalysis, ProviderError> {
            if item.name().starts_with("fail") {
                return Err(ProviderError::Failed(format!("{} rejected", item.name())));
            }
            Ok(ItemAnalysis {
                item: item.name().to_string(),
                result_data: json!({ "overview": "tech company" }),
                units_consumed: 5,
            })
        }

        async fn compare(&self, results: &[ItemAnalysis]) -> Result<Value, ProviderError> {
            self.compares.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "compared": results.len() }))
        }
    }

    struct Harness {
        scheduler: SchedulerCore,
        store: Arc<InMemoryBatchStore>,
        provider: Arc<ScriptedProvider>,
        orchestrator: BatchOrchestrator,
    }

    fn harness() -> Harness {
        let scheduler = SchedulerCore::new();
        let store = Arc::new(InMemoryBatchStore::new());
        let provider = Arc::new(ScriptedProvider::default());
        let orchestrator =
            BatchOrchestrator::new(provider.clone(), store.clone(), CancelledBatches::new())
                .with_pacing(Duration::from_millis(500));
        orchestrator.register(&scheduler);
        Harness {
            scheduler,
            store,
            provider,
            orchestrator,
        }
    }

    async fn run_batch(h: &Harness, items: &[&str], options: BatchOptions) -> BatchStatusRecord {
        let job = BatchJob::new(
            "owner-1",
            items.iter().map(|name| BatchItem::from(*name)).collect(),
            options,
        );
        let job_id = h
            .scheduler
            .add(
                QueueName::Batch,
                JobType::ProcessBatch,
                serde_json::to_value(&job).unwrap(),
                JobOptions::default(),
            )
            .unwrap();

        let finished = h.scheduler.wait_for_terminal(job_id).await.unwrap();
        assert_eq!(finished.status, jobline_scheduler::JobStatus::Completed);
        assert_eq!(finished.progress, 100);
        h.store.load_status(job.batch_id).await.unwrap().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn all_items_succeeding_completes_the_batch() {
        let h = harness();
        let record = run_batch(&h, &["a", "b", "c"], BatchOptions::default().with_email()).await;

        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.processed, 3);
        assert!(record.errors.is_empty());
        assert_eq!(record.comparative, Some(json!({ "compared": 3 })));
        assert!(record.executive_summary.is_some());
        assert!(record.started_at.is_some() && record.completed_at.is_some());
        assert_eq!(h.scheduler.get_stats(QueueName::Email).waiting, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_items_failing_fails_the_batch() {
        let h = harness();
        let record = run_batch(
            &h,
            &["fail-1", "fail-2"],
            BatchOptions::default().with_report().with_email(),
        )
        .await;

        assert_eq!(record.status, BatchStatus::Failed);
        assert_eq!(record.errors.len(), 2);
        assert!(record.results.is_empty());
        assert!(record.executive_summary.is_none());
        assert_eq!(h.provider.compares.load(Ordering::SeqCst), 0);
        // No successes, so no report; the owner is still notified.
        assert_eq!(h.scheduler.get_stats(QueueName::Report).waiting, 0);
        assert_eq!(h.scheduler.get_stats(QueueName::Email).waiting, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_success_skips_comparison() {
        let h = harness();
        let record = run_batch(&h, &["fail-1", "only"], BatchOptions::default().with_report()).await;

        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.success_count, 1);
        assert!(record.comparative.is_none());
        assert_eq!(h.provider.compares.load(Ordering::SeqCst), 0);

        let report = h
            .scheduler
            .get_jobs(QueueName::Report, jobline_scheduler::JobStatus::Waiting, 0, None);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].payload["report_type"], json!("standard"));
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_happens_once_per_batch() {
        let h = harness();
        let job = BatchJob::new("owner-1", vec!["a".into()], BatchOptions::default().with_webhook());
        let mut record = BatchStatusRecord::queued(&job);
        record.status = BatchStatus::Completed;
        record.completed_at = Some(Utc::now());

        h.orchestrator.fan_out(&h.scheduler, &job, &record);
        h.orchestrator.clone().fan_out(&h.scheduler, &job, &record);

        assert_eq!(h.scheduler.get_stats(QueueName::Webhook).waiting, 1);
    }

    #[test]
    fn fan_out_ledger_forgets_the_oldest_batches() {
        let mut ledger = FanOutLedger::with_capacity(2);
        let (a, b, c) = (BatchId::new(), BatchId::new(), BatchId::new());

        assert!(ledger.record(a));
        assert!(!ledger.record(a));
        assert!(ledger.record(b));
        assert!(ledger.record(c));

        assert_eq!(ledger.len(), 2);
        assert!(ledger.record(a), "evicted id is accepted again");
        assert!(!ledger.record(c));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_batches_never_fan_out() {
        let h = harness();
        let job = BatchJob::new("owner-1", vec!["a".into()], BatchOptions::default().with_email());
        let mut record = BatchStatusRecord::queued(&job);
        record.status = BatchStatus::Cancelled;

        h.orchestrator.fan_out(&h.scheduler, &job, &record);

        assert_eq!(h.scheduler.get_stats(QueueName::Email).waiting, 0);
        assert_eq!(h.orchestrator.fanned_out().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_adopts_a_stored_cancellation() {
        let h = harness();
        let job = BatchJob::new("owner-1", vec!["a".into(), "b".into()], BatchOptions::default());
        let mut record = BatchStatusRecord::queued(&job);
        h.store.save_status(&record).await.unwrap();
        h.store.mark_cancelled(job.batch_id, Utc::now()).await.unwrap();

        record.status = BatchStatus::Processing;
        h.orchestrator.checkpoint(&mut record).await;

        assert_eq!(record.status, BatchStatus::Cancelled);
        let stored = h.store.load_status(job.batch_id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Cancelled);
    }

    /// Hangs the first time it sees `b`; counts analyses per item.
    #[derive(Default)]
    struct HangOnceProvider {
        calls: Mutex<std::collections::HashMap<String, usize>>,
    }

    #[async_trait]
    impl AnalysisProvider for HangOnceProvider {
        async fn analyze(
            &self,
            item: &BatchItem,
            _options: &AnalysisOptions,
        ) -> Result<ItemAnalysis, ProviderError> {
            let seen = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(item.name().to_string()).or_default();
                *count += 1;
                *count
            };
            if item.name() == "b" && seen == 1 {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Ok(ItemAnalysis {
                item: item.name().to_string(),
                result_data: json!({ "overview": "retail" }),
                units_consumed: 1,
            })
        }

        async fn compare(&self, results: &[ItemAnalysis]) -> Result<Value, ProviderError> {
            Ok(json!({ "compared": results.len() }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_watchdog_timeout_resumes_from_stored_progress() {
        let scheduler = SchedulerCore::builder()
            .queue(
                QueueName::Batch,
                jobline_scheduler::QueueConfig::default()
                    .with_job_timeout(Duration::from_secs(1))
                    .with_retry(jobline_scheduler::RetryPolicy::exponential(
                        Duration::from_millis(100),
                        Duration::from_secs(1),
                    )),
            )
            .build();
        let store = Arc::new(InMemoryBatchStore::new());
        let provider = Arc::new(HangOnceProvider::default());
        BatchOrchestrator::new(provider.clone(), store.clone(), CancelledBatches::new())
            .with_pacing(Duration::ZERO)
            .register(&scheduler);

        let job = BatchJob::new(
            "owner-1",
            vec!["a".into(), "b".into(), "c".into()],
            BatchOptions::default(),
        );
        let job_id = scheduler
            .add(
                QueueName::Batch,
                JobType::ProcessBatch,
                serde_json::to_value(&job).unwrap(),
                JobOptions::default(),
            )
            .unwrap();

        let finished = scheduler.wait_for_terminal(job_id).await.unwrap();
        assert_eq!(finished.status, jobline_scheduler::JobStatus::Completed);
        assert_eq!(finished.attempts_made, 2);

        let record = store.load_status(job.batch_id).await.unwrap().unwrap();
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.processed, 3);
        assert_eq!(record.success_count, 3);
        assert_eq!(record.results.len(), 3);

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls["a"], 1, "items finished before the timeout are not analyzed again");
        assert_eq!(calls["b"], 2);
        assert_eq!(calls["c"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_separates_items() {
        let h = harness();
        let started = tokio::time::Instant::now();
        run_batch(&h, &["a", "b", "c"], BatchOptions::default()).await;

        assert!(started.elapsed() >= Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_payload_fails_the_job() {
        let h = harness();
        let job_id = h
            .scheduler
            .add(
                QueueName::Batch,
                JobType::ProcessBatch,
                json!({ "items": 3 }),
                JobOptions::default().with_max_attempts(1),
            )
            .unwrap();

        let job = h.scheduler.wait_for_terminal(job_id).await.unwrap();
        assert_eq!(job.status, jobline_scheduler::JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("invalid payload"));
    }
}
