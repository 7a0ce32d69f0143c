//! The external analysis collaborator.

use async_trait::async_trait;
use serde_json::Value;

use crate::model::{AnalysisOptions, BatchItem, ItemAnalysis};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider could not analyze this input.
    #[error("analysis failed: {0}")]
    Failed(String),

    /// The provider could not be reached or refused service.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Produces per-item analyses and cross-item comparisons.
///
/// Implementations talk to a remote service; calls are awaited one at a time by the
/// batch orchestrator.
#[async_trait]
pub trait AnalysisProvider: Send + Sync + 'static {
    async fn analyze(
        &self,
        item: &BatchItem,
        options: &AnalysisOptions,
    ) -> Result<ItemAnalysis, ProviderError>;

    /// Synthesize a comparison across several successful analyses.
    async fn compare(&self, results: &[ItemAnalysis]) -> Result<Value, ProviderError>;
}

impl From<ProviderError> for jobline_scheduler::HandlerError {
    fn from(err: ProviderError) -> Self {
        Self::new(err.to_string())
    }
}
