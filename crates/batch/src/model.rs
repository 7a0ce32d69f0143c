//! Batch data model: payloads, persisted status, and follow-on job requests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use jobline_core::{BatchId, JobId};

use crate::summary::ExecutiveSummary;

/// Seconds budgeted per item when estimating batch duration.
pub const SECONDS_PER_ITEM: u64 = 15;
/// Seconds budgeted for queueing when estimating batch duration.
pub const QUEUE_OVERHEAD_SECS: u64 = 30;

/// One thing to analyze: a bare name, or an object carrying at least a `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    Name(String),
    Detailed {
        name: String,
        #[serde(flatten)]
        attributes: Map<String, Value>,
    },
}

impl BatchItem {
    pub fn name(&self) -> &str {
        match self {
            BatchItem::Name(name) => name,
            BatchItem::Detailed { name, .. } => name,
        }
    }
}

impl From<&str> for BatchItem {
    fn from(name: &str) -> Self {
        BatchItem::Name(name.to_string())
    }
}

impl From<String> for BatchItem {
    fn from(name: String) -> Self {
        BatchItem::Name(name)
    }
}

/// Queue priority requested for a batch.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl BatchPriority {
    /// Scheduler priority for the batch job.
    pub fn job_priority(self) -> i32 {
        match self {
            BatchPriority::High => 10,
            BatchPriority::Normal => 0,
            BatchPriority::Low => -10,
        }
    }
}

/// Options passed to the analysis provider for every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub analysis_type: String,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            analysis_type: "comprehensive".to_string(),
        }
    }
}

/// What the caller asked for when creating the batch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    #[serde(flatten)]
    pub analysis: AnalysisOptions,
    /// Generate a report once the batch finishes (needs at least one success)
    pub include_report: bool,
    /// Notify the owner by email when the batch finishes
    pub send_email: bool,
    /// Deliver the outcome to the owner's webhook when the batch finishes
    pub send_webhook: bool,
    pub priority: BatchPriority,
}

impl BatchOptions {
    pub fn with_report(mut self) -> Self {
        self.include_report = true;
        self
    }

    pub fn with_email(mut self) -> Self {
        self.send_email = true;
        self
    }

    pub fn with_webhook(mut self) -> Self {
        self.send_webhook = true;
        self
    }

    pub fn with_priority(mut self, priority: BatchPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_analysis_type(mut self, analysis_type: impl Into<String>) -> Self {
        self.analysis.analysis_type = analysis_type.into();
        self
    }
}

/// Payload of a `Batch/ProcessBatch` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: BatchId,
    pub owner: String,
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub options: BatchOptions,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(owner: impl Into<String>, items: Vec<BatchItem>, options: BatchOptions) -> Self {
        Self {
            batch_id: BatchId::new(),
            owner: owner.into(),
            items,
            options,
            created_at: Utc::now(),
        }
    }
}

/// Batch lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    /// Every item failed.
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// A successful per-item analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAnalysis {
    pub item: String,
    pub result_data: Value,
    /// Provider usage attributed to this item (tokens, credits, ...)
    #[serde(default)]
    pub units_consumed: u64,
}

/// A failed per-item analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted batch status, read by status-polling callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatusRecord {
    pub id: BatchId,
    pub owner: String,
    pub status: BatchStatus,
    pub total: usize,
    pub processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<ItemAnalysis>,
    pub errors: Vec<ItemError>,
    pub comparative: Option<Value>,
    pub executive_summary: Option<ExecutiveSummary>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchStatusRecord {
    /// Initial record for a freshly created batch.
    pub fn queued(job: &BatchJob) -> Self {
        Self {
            id: job.batch_id,
            owner: job.owner.clone(),
            status: BatchStatus::Queued,
            total: job.items.len(),
            processed: 0,
            success_count: 0,
            error_count: 0,
            results: Vec::new(),
            errors: Vec::new(),
            comparative: None,
            executive_summary: None,
            created_at: job.created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn record_success(&mut self, analysis: ItemAnalysis) {
        self.results.push(analysis);
        self.processed += 1;
        self.success_count = self.results.len();
    }

    pub fn record_error(&mut self, error: ItemError) {
        self.errors.push(error);
        self.processed += 1;
        self.error_count = self.errors.len();
    }

    /// Share of items attempted, rounded to the nearest percent.
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let percent = (self.processed.min(self.total) * 100 + self.total / 2) / self.total;
        u8::try_from(percent).unwrap_or(100)
    }

    /// Rough time left while the batch is running.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        (self.status == BatchStatus::Processing).then(|| {
            let remaining = self.total.saturating_sub(self.processed) as u64;
            Duration::from_secs(remaining * SECONDS_PER_ITEM)
        })
    }
}

/// Status as returned to callers: the record plus derived progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatusView {
    #[serde(flatten)]
    pub record: BatchStatusRecord,
    pub progress: u8,
    pub estimated_remaining_secs: Option<u64>,
}

impl From<BatchStatusRecord> for BatchStatusView {
    fn from(record: BatchStatusRecord) -> Self {
        Self {
            progress: record.progress(),
            estimated_remaining_secs: record.estimated_remaining().map(|d| d.as_secs()),
            record,
        }
    }
}

/// Returned by `create_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub batch_id: BatchId,
    pub job_id: JobId,
    pub status: BatchStatus,
    pub total: usize,
    pub estimated_time_secs: u64,
}

/// Expected wall time for a batch of `items` items, queueing included.
pub fn estimate_processing_time(items: usize) -> Duration {
    Duration::from_secs(items as u64 * SECONDS_PER_ITEM + QUEUE_OVERHEAD_SECS)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Standard,
    Comparative,
}

/// Payload of a `Report/GenerateReport` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub batch_id: BatchId,
    pub owner: String,
    pub results: Vec<ItemAnalysis>,
    pub comparative: Option<Value>,
    pub report_type: ReportType,
    pub options: BatchOptions,
}

/// Outcome numbers handed to notifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub status: BatchStatus,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub processing_time_ms: u64,
}

/// Payload of `Email/BatchComplete` and `Webhook/BatchWebhook` jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub batch_id: BatchId,
    pub owner: String,
    pub outcome: OutcomeSummary,
    pub include_report: bool,
}

/// Result value of a finished `ProcessBatch` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub has_comparative: bool,
    pub has_executive_summary: bool,
}

impl From<&BatchStatusRecord> for BatchOutcome {
    fn from(record: &BatchStatusRecord) -> Self {
        Self {
            batch_id: record.id,
            status: record.status,
            processed: record.processed,
            success_count: record.success_count,
            error_count: record.error_count,
            has_comparative: record.comparative.is_some(),
            has_executive_summary: record.executive_summary.is_some(),
        }
    }
}
