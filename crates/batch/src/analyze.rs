//! Single-item analysis outside of a batch.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jobline_core::{JobType, QueueName};
use jobline_scheduler::{HandlerResult, JobContext, JobHandler, SchedulerCore};

use crate::model::{AnalysisOptions, BatchItem};
use crate::provider::AnalysisProvider;

/// Payload of an `Analysis/AnalyzeItem` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeItemRequest {
    pub item: BatchItem,
    #[serde(default)]
    pub options: AnalysisOptions,
}

/// Runs one provider call per job. Provider failures fail the attempt and are retried.
#[derive(Clone)]
pub struct AnalyzeItemHandler {
    provider: Arc<dyn AnalysisProvider>,
}

impl AnalyzeItemHandler {
    pub fn new(provider: Arc<dyn AnalysisProvider>) -> Self {
        Self { provider }
    }

    pub fn register(&self, scheduler: &SchedulerCore) {
        scheduler.process(QueueName::Analysis, JobType::AnalyzeItem, self.clone());
    }
}

#[async_trait]
impl JobHandler for AnalyzeItemHandler {
    async fn run(&self, ctx: JobContext) -> HandlerResult {
        let request: AnalyzeItemRequest = ctx.payload_as()?;
        ctx.update_progress(10)?;

        let analysis = self.provider.analyze(&request.item, &request.options).await?;

        ctx.update_progress(100)?;
        Ok(serde_json::to_value(analysis)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::{Value, json};

    use super::*;
    use crate::model::ItemAnalysis;
    use crate::provider::ProviderError;
    use jobline_scheduler::{JobOptions, JobStatus};

    /// Unavailable on the first call, fine afterwards.
    #[derive(Default)]
    struct FlakyProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AnalysisProvider for FlakyProvider {
        async fn analyze(
            &self,
            item: &BatchItem,
            options: &AnalysisOptions,
        ) -> Result<ItemAnalysis, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ProviderError::Unavailable("rate limited".into()));
            }
            Ok(ItemAnalysis {
                item: item.name().to_string(),
                result_data: json!({ "type": options.analysis_type }),
                units_consumed: 1,
            })
        }

        async fn compare(&self, _results: &[ItemAnalysis]) -> Result<Value, ProviderError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn provider_failures_are_retried() {
        let scheduler = SchedulerCore::new();
        AnalyzeItemHandler::new(Arc::new(FlakyProvider::default())).register(&scheduler);

        let request = AnalyzeItemRequest {
            item: "Acme".into(),
            options: AnalysisOptions::default(),
        };
        let id = scheduler
            .add(
                QueueName::Analysis,
                JobType::AnalyzeItem,
                serde_json::to_value(&request).unwrap(),
                JobOptions::default(),
            )
            .unwrap();

        let job = scheduler.wait_for_terminal(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts_made, 2);
        assert_eq!(job.logs[0].message, "provider unavailable: rate limited");
        assert_eq!(job.result.unwrap()["result_data"]["type"], json!("comprehensive"));
    }
}
