//! Runs one batch end to end against the offline provider.
//!
//! ```text
//! jobline-worker [--report] [--email] [--webhook] [--high|--low] ITEM...
//! ```
//!
//! Prefix an item with `!` to make the dry-run provider reject it.

mod config;
mod dry_run;
mod follow_on;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{info, warn};

use jobline_batch::{
    AnalyzeItemHandler, BatchItem, BatchOptions, BatchOrchestrator, BatchPriority, BatchService,
    CancelledBatches, InMemoryBatchStore,
};
use jobline_core::QueueName;
use jobline_scheduler::{InMemoryJobStore, SchedulerCore};

use crate::config::WorkerConfig;
use crate::dry_run::DryRunProvider;

const DRAIN_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobline_observability::init();

    let (items, options) = parse_args(std::env::args().skip(1))?;
    let config = WorkerConfig::from_env();
    info!(?config, "worker starting");

    let scheduler = SchedulerCore::builder()
        .queue(QueueName::Batch, config.queue(config.batch_concurrency))
        .queue(QueueName::Report, config.queue(config.report_concurrency))
        .queue(QueueName::Email, config.queue(config.email_concurrency))
        .queue(QueueName::Webhook, config.queue(config.webhook_concurrency))
        .queue(QueueName::Analysis, config.queue(config.batch_concurrency))
        .store(InMemoryJobStore::with_history_limit(config.history_limit))
        .build();

    let logger = jobline_observability::spawn_event_logger(scheduler.subscribe());
    let janitor = scheduler.spawn_janitor(config.clean_interval, config.job_retention);

    let provider = Arc::new(DryRunProvider);
    let store = Arc::new(InMemoryBatchStore::new());
    let cancelled = CancelledBatches::new();

    BatchOrchestrator::new(provider.clone(), store.clone(), cancelled.clone())
        .with_pacing(config.batch_pacing)
        .register(&scheduler);
    AnalyzeItemHandler::new(provider).register(&scheduler);
    follow_on::register(&scheduler);

    let service = BatchService::new(scheduler.clone(), store, cancelled);
    let receipt = service
        .create_batch("cli", items, options)
        .await
        .context("batch rejected")?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);

    let job = scheduler
        .wait_for_terminal(receipt.job_id)
        .await
        .context("batch job disappeared before finishing")?;
    if let Some(error) = &job.error {
        warn!(job_id = %job.id, error = %error, "batch job failed");
    }

    // Follow-on jobs are enqueued by the batch handler; let them settle too.
    loop {
        let stats = scheduler.global_stats();
        if stats.waiting == 0 && stats.active == 0 {
            break;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }

    let view = service
        .batch_status(receipt.batch_id, "cli")
        .await
        .context("batch status unavailable")?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    janitor.shutdown();
    let counts = logger.shutdown();
    info!(?counts, stats = ?scheduler.global_stats(), "worker finished");
    Ok(())
}

fn parse_args(args: impl Iterator<Item = String>) -> anyhow::Result<(Vec<BatchItem>, BatchOptions)> {
    let mut options = BatchOptions::default();
    let mut items = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--report" => options = options.with_report(),
            "--email" => options = options.with_email(),
            "--webhook" => options = options.with_webhook(),
            "--high" => options = options.with_priority(BatchPriority::High),
            "--low" => options = options.with_priority(BatchPriority::Low),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ => items.push(BatchItem::from(arg)),
        }
    }

    if items.is_empty() {
        bail!("usage: jobline-worker [--report] [--email] [--webhook] [--high|--low] ITEM...");
    }
    Ok((items, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn flags_and_items_are_split() {
        let (items, options) = parse_args(args(&["--report", "Acme", "--high", "!Beta"])).unwrap();

        assert_eq!(items, vec![BatchItem::from("Acme"), BatchItem::from("!Beta")]);
        assert!(options.include_report);
        assert!(!options.send_email);
        assert_eq!(options.priority, BatchPriority::High);
    }

    #[test]
    fn unknown_flags_and_empty_batches_are_rejected() {
        assert!(parse_args(args(&["--fast", "Acme"])).is_err());
        assert!(parse_args(args(&["--report"])).is_err());
    }
}
