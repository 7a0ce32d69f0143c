//! Offline analysis provider for local runs.

use async_trait::async_trait;
use serde_json::{Value, json};

use jobline_batch::{AnalysisOptions, AnalysisProvider, BatchItem, ItemAnalysis, ProviderError};

/// Answers every item from its own name and attributes, without network access.
///
/// Items whose name starts with `!` are rejected, which makes partial failures easy to try.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunProvider;

#[async_trait]
impl AnalysisProvider for DryRunProvider {
    async fn analyze(
        &self,
        item: &BatchItem,
        options: &AnalysisOptions,
    ) -> Result<ItemAnalysis, ProviderError> {
        let name = item.name();
        if let Some(rest) = name.strip_prefix('!') {
            return Err(ProviderError::Failed(format!("dry run rejected {rest}")));
        }

        let overview = match item {
            BatchItem::Detailed { attributes, .. } => attributes
                .get("overview")
                .and_then(Value::as_str)
                .map(str::to_string),
            BatchItem::Name(_) => None,
        }
        .unwrap_or_else(|| format!("{name} (no description provided)"));

        Ok(ItemAnalysis {
            item: name.to_string(),
            result_data: json!({
                "overview": overview,
                "analysis_type": options.analysis_type,
                "dry_run": true,
            }),
            units_consumed: u64::try_from(name.len()).unwrap_or(u64::MAX),
        })
    }

    async fn compare(&self, results: &[ItemAnalysis]) -> Result<Value, ProviderError> {
        let mut ranked: Vec<&ItemAnalysis> = results.iter().collect();
        ranked.sort_by(|a, b| b.units_consumed.cmp(&a.units_consumed));
        Ok(json!({
            "ranked": ranked.iter().map(|r| r.item.as_str()).collect::<Vec<_>>(),
            "dry_run": true,
        }))
    }
}
