use serde::Serialize;
use serde_json::{Map, Value, json};
use std::str::FromStr;

use crate::engine::ClassificationEngine;
use crate::types::{AnalysisResult, CategoryResult, SentimentResult};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown tool: {0}")]
    UnknownOperation(String),

    #[error("invalid arguments for {tool}: {reason}")]
    ArgumentValidation { tool: &'static str, reason: String },

    #[error("failed to encode result: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    String,
    StringArray,
    ResultArray,
}

impl ArgumentKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::ResultArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_object)),
        }
    }

    fn is_empty(value: &Value) -> bool {
        match value {
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    fn schema(&self, description: &str) -> Value {
        match self {
            Self::String => json!({ "type": "string", "description": description }),
            Self::StringArray => json!({
                "type": "array",
                "items": { "type": "string" },
                "description": description,
            }),
            Self::ResultArray => json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "comment": { "type": "string" },
                        "category": { "type": "string" },
                        "sentiment": { "type": "string" },
                    }
                },
                "description": description,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgumentSpec {
    pub name: &'static str,
    pub kind: ArgumentKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ClassifyComment,
    AnalyzeSentiment,
    AnalyzeComment,
    AnalyzeBatch,
    GetStatistics,
}

const COMMENT: ArgumentSpec = ArgumentSpec {
    name: "comment",
    kind: ArgumentKind::String,
    required: true,
    description: "The customer comment text",
};

impl Operation {
    pub const ALL: [Operation; 5] = [
        Self::ClassifyComment,
        Self::AnalyzeSentiment,
        Self::AnalyzeComment,
        Self::AnalyzeBatch,
        Self::GetStatistics,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ClassifyComment => "classify_comment",
            Self::AnalyzeSentiment => "analyze_sentiment",
            Self::AnalyzeComment => "analyze_comment",
            Self::AnalyzeBatch => "analyze_batch",
            Self::GetStatistics => "get_statistics",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ClassifyComment => {
                "Classify a customer comment into one of three categories: TRAVEL, ACCOMMODATION, or FOOD."
            }
            Self::AnalyzeSentiment => {
                "Analyze the sentiment of a customer comment: POSITIVE, NEGATIVE, or NEUTRAL."
            }
            Self::AnalyzeComment => {
                "Classify a customer comment and analyze its sentiment in one call."
            }
            Self::AnalyzeBatch => {
                "Analyze several customer comments; results come back in input order."
            }
            Self::GetStatistics => {
                "Category and sentiment distribution, with counts and percentages, over analysis results."
            }
        }
    }

    pub fn arguments(&self) -> &'static [ArgumentSpec] {
        match self {
            Self::ClassifyComment | Self::AnalyzeSentiment | Self::AnalyzeComment => &[COMMENT],
            Self::AnalyzeBatch => &[ArgumentSpec {
                name: "comments",
                kind: ArgumentKind::StringArray,
                required: true,
                description: "Customer comment texts to analyze",
            }],
            Self::GetStatistics => &[ArgumentSpec {
                name: "results",
                kind: ArgumentKind::ResultArray,
                required: true,
                description: "Analysis results with comment, category, and sentiment",
            }],
        }
    }

    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .arguments()
            .iter()
            .map(|arg| (arg.name.to_string(), arg.kind.schema(arg.description)))
            .collect();
        let required: Vec<&str> = self
            .arguments()
            .iter()
            .filter(|arg| arg.required)
            .map(|arg| arg.name)
            .collect();
        json!({ "type": "object", "properties": properties, "required": required })
    }

    fn validate(&self, arguments: &Map<String, Value>) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::ArgumentValidation {
            tool: self.name(),
            reason,
        };
        for spec in self.arguments() {
            match arguments.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(invalid(format!("{} is required", spec.name)));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(invalid(format!("{} must be {:?}", spec.name, spec.kind)));
                }
                Some(value) if spec.required && ArgumentKind::is_empty(value) => {
                    return Err(invalid(format!("{} must not be empty", spec.name)));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl FromStr for Operation {
    type Err = RegistryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name)
            .ok_or_else(|| RegistryError::UnknownOperation(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Owns the engine and dispatches tool calls onto it.
#[derive(Debug)]
pub struct ToolRegistry {
    engine: ClassificationEngine,
}

impl ToolRegistry {
    pub fn new(engine: ClassificationEngine) -> Self {
        Self { engine }
    }

    pub fn list_operations(&self) -> Vec<ToolDescriptor> {
        Operation::ALL
            .iter()
            .map(|op| ToolDescriptor {
                name: op.name().to_string(),
                description: op.description().to_string(),
                input_schema: op.input_schema(),
            })
            .collect()
    }

    #[tracing::instrument(skip(self, arguments))]
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, RegistryError> {
        let operation: Operation = name.parse()?;
        operation.validate(arguments)?;

        let value = match operation {
            Operation::ClassifyComment => {
                let comment = string_arg(arguments, "comment");
                let category = self.engine.classify_category(&comment).await;
                serde_json::to_value(CategoryResult { comment, category })?
            }
            Operation::AnalyzeSentiment => {
                let comment = string_arg(arguments, "comment");
                let sentiment = self.engine.classify_sentiment(&comment).await;
                serde_json::to_value(SentimentResult { comment, sentiment })?
            }
            Operation::AnalyzeComment => {
                let comment = string_arg(arguments, "comment");
                serde_json::to_value(self.engine.analyze(&comment).await)?
            }
            Operation::AnalyzeBatch => {
                let comments: Vec<String> = decode_arg(operation, arguments, "comments")?;
                serde_json::to_value(self.engine.analyze_batch(&comments).await)?
            }
            Operation::GetStatistics => {
                let results: Vec<AnalysisResult> = decode_arg(operation, arguments, "results")?;
                serde_json::to_value(ClassificationEngine::statistics(&results))?
            }
        };
        Ok(value)
    }
}

fn string_arg(arguments: &Map<String, Value>, name: &str) -> String {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decode_arg<T: serde::de::DeserializeOwned>(
    operation: Operation,
    arguments: &Map<String, Value>,
    name: &str,
) -> Result<T, RegistryError> {
    let value = arguments.get(name).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| RegistryError::ArgumentValidation {
        tool: operation.name(),
        reason: format!("{name}: {e}"),
    })
}
