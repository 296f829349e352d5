use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_VERSION: &str = "1";
pub const SERVER_NAME: &str = "customer-comment-analyzer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Request {
    Call {
        tool: String,
        #[serde(default)]
        arguments: Map<String, Value>,
    },
    Control {
        method: ControlMethod,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMethod {
    Initialize,
    ListTools,
    Shutdown,
}

impl Request {
    pub fn call(tool: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self::Call {
            tool: tool.into(),
            arguments,
        }
    }

    pub fn initialize(client: PeerInfo) -> Self {
        Self::Control {
            method: ControlMethod::Initialize,
            params: serde_json::to_value(InitializeParams {
                protocol_version: PROTOCOL_VERSION.to_string(),
                client,
            })
            .unwrap_or_default(),
        }
    }

    pub fn control(method: ControlMethod) -> Self {
        Self::Control {
            method,
            params: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub version: String,
}

impl PeerInfo {
    pub fn this_crate(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client: PeerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server: PeerInfo,
    pub tools: Vec<String>,
}

/// `{"error": ..}` and nothing else. Results may carry an `error` field of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorFrame {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error(ErrorFrame),
    Ok(Value),
}

impl Response {
    pub fn error(message: impl ToString) -> Self {
        Self::Error(ErrorFrame {
            error: message.to_string(),
        })
    }

    pub fn ok(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::error(format!("failed to encode result: {e}")),
        }
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Error(frame) => Err(frame.error),
        }
    }
}

pub fn encode_line<T: Serialize>(frame: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim())
}
