//! Executive summary computed locally from successful analyses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ItemAnalysis;

/// Industry label and the overview keywords that suggest it.
const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    ("Technology", &["technology", "tech"]),
    ("Finance", &["finance", "fintech"]),
    ("Healthcare", &["health", "medical"]),
    ("Retail", &["retail", "e-commerce"]),
];

const RECOMMENDED_ACTIONS: &[&str] = &[
    "Review individual analyses for detailed insights",
    "Consider comparative analysis for strategic planning",
    "Monitor industry trends and competitive positioning",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Comprehensive,
    Limited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOverview {
    pub total_items: usize,
    /// Analyses that returned a non-empty result
    pub successful_analyses: usize,
    pub failed_analyses: usize,
    pub avg_units_consumed: u64,
    pub industries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInsights {
    pub most_analyzed_industries: Vec<String>,
    pub analysis_depth: AnalysisDepth,
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub overview: SummaryOverview,
    pub key_insights: KeyInsights,
    pub generated_at: DateTime<Utc>,
}

/// Summarize a batch's successful analyses. `None` when there are none.
pub fn executive_summary(results: &[ItemAnalysis], now: DateTime<Utc>) -> Option<ExecutiveSummary> {
    if results.is_empty() {
        return None;
    }

    let substantive: Vec<&ItemAnalysis> = results
        .iter()
        .filter(|analysis| has_content(&analysis.result_data))
        .collect();

    let total_units: u64 = results.iter().map(|analysis| analysis.units_consumed).sum();
    let industries = detect_industries(&substantive);

    Some(ExecutiveSummary {
        overview: SummaryOverview {
            total_items: results.len(),
            successful_analyses: substantive.len(),
            failed_analyses: results.len() - substantive.len(),
            avg_units_consumed: total_units / results.len() as u64,
            industries: industries.clone(),
        },
        key_insights: KeyInsights {
            most_analyzed_industries: industries.into_iter().take(3).collect(),
            analysis_depth: if substantive.is_empty() {
                AnalysisDepth::Limited
            } else {
                AnalysisDepth::Comprehensive
            },
            recommended_actions: RECOMMENDED_ACTIONS.iter().map(|s| s.to_string()).collect(),
        },
        generated_at: now,
    })
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn detect_industries(analyses: &[&ItemAnalysis]) -> Vec<String> {
    let overviews: Vec<String> = analyses
        .iter()
        .filter_map(|analysis| {
            analysis
                .result_data
                .get("overview")
                .or_else(|| analysis.result_data.get("business_overview"))
                .and_then(Value::as_str)
                .map(str::to_lowercase)
        })
        .collect();

    INDUSTRY_KEYWORDS
        .iter()
        .filter(|(_, keywords)| {
            overviews
                .iter()
                .any(|overview| keywords.iter().any(|keyword| overview.contains(keyword)))
        })
        .map(|(industry, _)| industry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn analysis(item: &str, result_data: Value, units: u64) -> ItemAnalysis {
        ItemAnalysis {
            item: item.to_string(),
            result_data,
            units_consumed: units,
        }
    }

    #[test]
    fn no_results_means_no_summary() {
        assert!(executive_summary(&[], Utc::now()).is_none());
    }

    #[test]
    fn summary_counts_and_detects_industries() {
        let results = vec![
            analysis("Acme", json!({"overview": "A FinTech lender"}), 120),
            analysis("Gamma", json!({"business_overview": "Medical devices and tech"}), 80),
            analysis("Delta", json!({}), 10),
        ];

        let summary = executive_summary(&results, Utc::now()).unwrap();
        assert_eq!(summary.overview.total_items, 3);
        assert_eq!(summary.overview.successful_analyses, 2);
        assert_eq!(summary.overview.failed_analyses, 1);
        assert_eq!(summary.overview.avg_units_consumed, 70);
        assert_eq!(
            summary.overview.industries,
            vec!["Technology", "Finance", "Healthcare"]
        );
        assert_eq!(summary.key_insights.analysis_depth, AnalysisDepth::Comprehensive);
        assert_eq!(summary.key_insights.recommended_actions.len(), 3);
    }

    #[test]
    fn empty_results_give_limited_depth() {
        let results = vec![analysis("Acme", Value::Null, 0)];
        let summary = executive_summary(&results, Utc::now()).unwrap();
        assert_eq!(summary.key_insights.analysis_depth, AnalysisDepth::Limited);
        assert!(summary.overview.industries.is_empty());
    }

    proptest! {
        /// Property: every analysis is counted exactly once as successful or failed.
        #[test]
        fn counts_partition_the_results(flags in proptest::collection::vec(any::<bool>(), 1..40)) {
            let results: Vec<ItemAnalysis> = flags
                .iter()
                .enumerate()
                .map(|(i, filled)| {
                    let data = if *filled { json!({"overview": "retail"}) } else { json!({}) };
                    analysis(&format!("item-{i}"), data, i as u64)
                })
                .collect();

            let summary = executive_summary(&results, Utc::now()).unwrap();
            prop_assert_eq!(
                summary.overview.successful_analyses + summary.overview.failed_analyses,
                results.len()
            );
            prop_assert!(summary.key_insights.most_analyzed_industries.len() <= 3);
        }
    }
}
