//! Log-only consumers for the report, email, and webhook queues.
//!
//! Rendering and delivery live outside this process; the worker records what would be sent.

use serde_json::json;
use tracing::info;

use jobline_batch::{NotificationRequest, ReportRequest};
use jobline_core::{JobType, QueueName};
use jobline_scheduler::{HandlerResult, JobContext, SchedulerCore};

pub fn register(scheduler: &SchedulerCore) {
    scheduler.process_fn(QueueName::Report, JobType::GenerateReport, generate_report);
    scheduler.process_fn(QueueName::Email, JobType::BatchComplete, |ctx| async move {
        notify(ctx, "email")
    });
    scheduler.process_fn(QueueName::Webhook, JobType::BatchWebhook, |ctx| async move {
        notify(ctx, "webhook")
    });
}

async fn generate_report(ctx: JobContext) -> HandlerResult {
    let request: ReportRequest = ctx.payload_as()?;
    info!(
        batch_id = %request.batch_id,
        owner = %request.owner,
        report_type = ?request.report_type,
        items = request.results.len(),
        comparative = request.comparative.is_some(),
        "report generated"
    );
    ctx.update_progress(100)?;
    Ok(json!({ "batch_id": request.batch_id, "pages": request.results.len() + 1 }))
}

fn notify(ctx: JobContext, channel: &'static str) -> HandlerResult {
    let request: NotificationRequest = ctx.payload_as()?;
    info!(
        channel,
        batch_id = %request.batch_id,
        owner = %request.owner,
        status = ?request.outcome.status,
        success_count = request.outcome.success_count,
        error_count = request.outcome.error_count,
        "batch notification delivered"
    );
    Ok(json!({ "channel": channel, "batch_id": request.batch_id }))
}

#[cfg(test)]
mod tests {
    use jobline_batch::{BatchOptions, ReportType};
    use jobline_core::BatchId;
    use jobline_scheduler::{JobOptions, JobStatus};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follow_on_jobs_complete() {
        let scheduler = SchedulerCore::new();
        register(&scheduler);

        let batch_id = BatchId::new();
        let report = ReportRequest {
            batch_id,
            owner: "cli".into(),
            results: Vec::new(),
            comparative: None,
            report_type: ReportType::Standard,
            options: BatchOptions::default(),
        };
        let report_job = scheduler
            .add(
                QueueName::Report,
                JobType::GenerateReport,
                serde_json::to_value(&report).unwrap(),
                JobOptions::default(),
            )
            .unwrap();

        let webhook_job = scheduler
            .add(
                QueueName::Webhook,
                JobType::BatchWebhook,
                json!({ "not": "a notification" }),
                JobOptions::default().with_max_attempts(1),
            )
            .unwrap();

        let done = scheduler.wait_for_terminal(report_job).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result.unwrap()["pages"], json!(1));

        let rejected = scheduler.wait_for_terminal(webhook_job).await.unwrap();
        assert_eq!(rejected.status, JobStatus::Failed);
    }
}
