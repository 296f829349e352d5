use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::labels::{Category, Sentiment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub comment: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    pub comment: String,
    pub sentiment: Sentiment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub comment: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub sentiment: Sentiment,
    /// Set when a classification failed and `UNKNOWN` was substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_comments: usize,
    pub category_distribution: BTreeMap<Category, Share>,
    pub sentiment_distribution: BTreeMap<Sentiment, Share>,
}

/// Entry of the HTTP server's analysis history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub analyzed_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_field_is_optional_on_the_wire() {
        let ok = AnalysisResult {
            comment: "Great crew".into(),
            category: Category::Travel,
            sentiment: Sentiment::Positive,
            error: None,
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"comment": "Great crew", "category": "TRAVEL", "sentiment": "POSITIVE"})
        );

        let parsed: AnalysisResult =
            serde_json::from_value(serde_json::json!({"comment": "no labels"})).unwrap();
        assert_eq!(parsed.category, Category::Unknown);
        assert_eq!(parsed.sentiment, Sentiment::Unknown);
        assert!(parsed.is_complete());
    }

    #[test]
    fn distributions_serialize_with_label_keys() {
        let mut stats = Statistics {
            total_comments: 1,
            ..Default::default()
        };
        stats.category_distribution.insert(
            Category::Food,
            Share {
                count: 1,
                percentage: 100.0,
            },
        );
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["category_distribution"]["FOOD"]["count"], 1);

        let back: Statistics = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }
}
