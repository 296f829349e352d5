use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::completion::{CompletionError, CompletionService};
use crate::labels::{Category, Label, Sentiment};
use crate::templates::{self, Template, TemplateError, TemplateStore};
use crate::types::{AnalysisResult, Share, Statistics};

/// Generation budget for every classification call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            temperature: 0.1,
        }
    }
}

/// Why a single classification fell back to `UNKNOWN`.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisFailed {
    #[error("generation failed: {0}")]
    Generation(#[from] CompletionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("unrecognized reply {reply:?}")]
    Unrecognized { reply: String },
}

pub struct ClassificationEngine {
    completion: Arc<dyn CompletionService>,
    classification: Template,
    sentiment: Template,
    params: GenerationParams,
}

impl std::fmt::Debug for ClassificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationEngine")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ClassificationEngine {
    /// Loads both prompt templates up front; they're held for the engine's lifetime.
    pub fn new(
        completion: Arc<dyn CompletionService>,
        store: &TemplateStore,
        params: GenerationParams,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            completion,
            classification: store.load(templates::CLASSIFICATION)?,
            sentiment: store.load(templates::SENTIMENT)?,
            params,
        })
    }

    pub async fn classify_category(&self, text: &str) -> Category {
        self.try_classify_category(text)
            .await
            .unwrap_or_else(|e| fallback("category", e))
    }

    pub async fn classify_sentiment(&self, text: &str) -> Sentiment {
        self.try_classify_sentiment(text)
            .await
            .unwrap_or_else(|e| fallback("sentiment", e))
    }

    pub async fn try_classify_category(&self, text: &str) -> Result<Category, AnalysisFailed> {
        self.classify(&self.classification, text).await
    }

    pub async fn try_classify_sentiment(&self, text: &str) -> Result<Sentiment, AnalysisFailed> {
        self.classify(&self.sentiment, text).await
    }

    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    pub async fn analyze(&self, text: &str) -> AnalysisResult {
        let mut failures = Vec::new();

        let category = self
            .try_classify_category(text)
            .await
            .unwrap_or_else(|e| {
                failures.push(format!("category: {e}"));
                fallback("category", e)
            });
        let sentiment = self
            .try_classify_sentiment(text)
            .await
            .unwrap_or_else(|e| {
                failures.push(format!("sentiment: {e}"));
                fallback("sentiment", e)
            });

        AnalysisResult {
            comment: text.to_string(),
            category,
            sentiment,
            error: (!failures.is_empty())
                .then(|| format!("AnalysisFailed: {}", failures.join("; "))),
        }
    }

    /// Sequential; a failing item is recorded in its own result and the run continues.
    #[tracing::instrument(skip(self, texts), fields(batch_size = texts.len()))]
    pub async fn analyze_batch(&self, texts: &[String]) -> Vec<AnalysisResult> {
        let mut results = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let result = self.analyze(text).await;
            if let Some(error) = &result.error {
                tracing::warn!(index, %error, "Batch item analysis failed");
            }
            results.push(result);
        }
        tracing::info!(
            failed = results.iter().filter(|r| !r.is_complete()).count(),
            "Batch analyzed"
        );
        results
    }

    pub fn statistics(results: &[AnalysisResult]) -> Statistics {
        let total = results.len();
        let mut categories: BTreeMap<Category, usize> = BTreeMap::new();
        let mut sentiments: BTreeMap<Sentiment, usize> = BTreeMap::new();
        for result in results {
            *categories.entry(result.category).or_default() += 1;
            *sentiments.entry(result.sentiment).or_default() += 1;
        }

        Statistics {
            total_comments: total,
            category_distribution: distribution(categories, total),
            sentiment_distribution: distribution(sentiments, total),
        }
    }

    async fn classify<L: Label>(&self, template: &Template, text: &str) -> Result<L, AnalysisFailed> {
        let variables = HashMap::from([("comment", text)]);
        let prompt = template.render(&variables)?;

        let reply = self
            .completion
            .generate(&prompt, self.params.max_tokens, self.params.temperature)
            .await?;

        match L::parse_reply(&reply) {
            Some(label) => {
                tracing::debug!(template = template.name(), label = label.as_str(), "Classified");
                Ok(label)
            }
            None => {
                tracing::warn!(template = template.name(), raw_reply = %reply, "Unrecognized model reply");
                Err(AnalysisFailed::Unrecognized { reply })
            }
        }
    }
}

fn fallback<L: Label>(operation: &str, error: AnalysisFailed) -> L {
    tracing::error!(operation, error = %error, "Classification failed, using fallback label");
    L::fallback()
}

fn distribution<L: Ord>(counts: BTreeMap<L, usize>, total: usize) -> BTreeMap<L, Share> {
    counts
        .into_iter()
        .map(|(label, count)| {
            let percentage = (count as f64 / total as f64 * 1000.0).round() / 10.0;
            (label, Share { count, percentage })
        })
        .collect()
}
