use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::labels::{Category, Sentiment};
use crate::registry::{Operation, ToolDescriptor};
use crate::relay::{Relay, RelayConfig, RelayError, RelayState};
use crate::types::{AnalysisResult, CategoryResult, SentimentResult, Statistics};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("unexpected payload from {tool}: {source}")]
    Payload {
        tool: &'static str,
        source: serde_json::Error,
    },
}

impl ClientError {
    /// True when the caller has to reconnect before trying again.
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Self::Relay(
                RelayError::NotConnected
                    | RelayError::RelayTimeout(_)
                    | RelayError::WorkerExited { .. }
                    | RelayError::HandshakeTimeout(_)
                    | RelayError::Spawn { .. }
            )
        )
    }
}

/// Typed, blocking call surface over a worker process.
///
/// Dropping the client disconnects from the worker.
pub struct AnalyzerClient {
    relay: Relay,
}

impl AnalyzerClient {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: Relay::new(config),
        }
    }

    /// Build and connect in one step; the worker is shut down when the client drops.
    pub fn connected(config: RelayConfig) -> Result<Self, ClientError> {
        let mut client = Self::new(config);
        client.connect()?;
        Ok(client)
    }

    pub fn connect(&mut self) -> Result<(), ClientError> {
        Ok(self.relay.connect()?)
    }

    pub fn disconnect(&mut self) {
        self.relay.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.relay.is_connected()
    }

    pub fn state(&self) -> RelayState {
        self.relay.state()
    }

    pub fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let payload = self.relay.list_tools()?;
        serde_json::from_value(payload).map_err(|source| ClientError::Payload {
            tool: "list_tools",
            source,
        })
    }

    pub fn classify_category(&mut self, comment: &str) -> Result<Category, ClientError> {
        let result: CategoryResult =
            self.call(Operation::ClassifyComment, json!({ "comment": comment }))?;
        Ok(result.category)
    }

    pub fn classify_sentiment(&mut self, comment: &str) -> Result<Sentiment, ClientError> {
        let result: SentimentResult =
            self.call(Operation::AnalyzeSentiment, json!({ "comment": comment }))?;
        Ok(result.sentiment)
    }

    pub fn analyze(&mut self, comment: &str) -> Result<AnalysisResult, ClientError> {
        self.call(Operation::AnalyzeComment, json!({ "comment": comment }))
    }

    pub fn analyze_batch(&mut self, comments: &[String]) -> Result<Vec<AnalysisResult>, ClientError> {
        self.call(Operation::AnalyzeBatch, json!({ "comments": comments }))
    }

    pub fn statistics(&mut self, results: &[AnalysisResult]) -> Result<Statistics, ClientError> {
        self.call(Operation::GetStatistics, json!({ "results": results }))
    }

    fn call<T: DeserializeOwned>(
        &mut self,
        operation: Operation,
        arguments: Value,
    ) -> Result<T, ClientError> {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let payload = self.relay.invoke(operation.name(), arguments)?;
        serde_json::from_value(payload).map_err(|source| ClientError::Payload {
            tool: operation.name(),
            source,
        })
    }
}
