//! Closed sets of queue and job type names.
//!
//! Queues are a fixed set known at compile time. Job types are a small closed enum with
//! a `Custom` escape hatch for application-defined work.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Named queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Batch,
    Report,
    Email,
    Webhook,
    Analysis,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::Batch,
        QueueName::Report,
        QueueName::Email,
        QueueName::Webhook,
        QueueName::Analysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Batch => "batch",
            QueueName::Report => "report",
            QueueName::Email => "email",
            QueueName::Webhook => "webhook",
            QueueName::Analysis => "analysis",
        }
    }
}

impl core::fmt::Display for QueueName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| ValidationError::unknown_name(format!("queue {s}")))
    }
}

/// Job type, used to route a job to its handler within a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    /// Drive a whole batch through the orchestrator.
    ProcessBatch,
    /// Render a report for a finished batch.
    GenerateReport,
    /// Deliver a rendered report.
    SendReport,
    /// Notify the batch owner that the batch finished.
    BatchComplete,
    /// Deliver the batch outcome to a webhook endpoint.
    BatchWebhook,
    /// Analyze a single item outside of a batch.
    AnalyzeItem,
    /// Application-defined work.
    Custom(String),
}

impl JobType {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom(kind.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobType::ProcessBatch => "process-batch",
            JobType::GenerateReport => "generate-pdf",
            JobType::SendReport => "send-report",
            JobType::BatchComplete => "batch-complete",
            JobType::BatchWebhook => "batch-webhook",
            JobType::AnalyzeItem => "analyze-item",
            JobType::Custom(kind) => kind,
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "process-batch" => JobType::ProcessBatch,
            "generate-pdf" => JobType::GenerateReport,
            "send-report" => JobType::SendReport,
            "batch-complete" => JobType::BatchComplete,
            "batch-webhook" => JobType::BatchWebhook,
            "analyze-item" => JobType::AnalyzeItem,
            _ => JobType::Custom(value),
        }
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        JobType::from(value.to_string())
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.as_str().to_string()
    }
}
