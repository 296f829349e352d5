use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::protocol::{
    ControlMethod, InitializeParams, InitializeResult, PROTOCOL_VERSION, PeerInfo, Request,
    Response, SERVER_NAME, decode_line, encode_line,
};
use crate::registry::ToolRegistry;

const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Serves relay requests read from `input` until shutdown or end of input.
///
/// Every request line gets exactly one response line; failures are reported
/// as error frames and never end the loop.
pub struct Worker {
    registry: ToolRegistry,
    initialized: bool,
}

enum Flow {
    Continue,
    Stop,
}

impl Worker {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            initialized: false,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn serve<R, W>(mut self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut requests = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let mut responses = FramedWrite::new(output, LinesCodec::new());

        tracing::info!("Worker ready, waiting for requests");
        while let Some(line) = requests.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable request frame");
                    responses
                        .send(frame(&Response::error(format!("invalid request: {e}"))))
                        .await?;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let (response, flow) = self.handle(&line).await;
            responses.send(frame(&response)).await?;
            if let Flow::Stop = flow {
                tracing::info!("Shutdown requested");
                break;
            }
        }

        tracing::info!("Worker stopped");
        Ok(())
    }

    async fn handle(&mut self, line: &str) -> (Response, Flow) {
        let request: Request = match decode_line(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request frame");
                return (Response::error(format!("invalid request: {e}")), Flow::Continue);
            }
        };

        match request {
            Request::Control { method, params } => match method {
                ControlMethod::Initialize => (self.initialize(params), Flow::Continue),
                ControlMethod::ListTools => {
                    (Response::ok(self.registry.list_operations()), Flow::Continue)
                }
                ControlMethod::Shutdown => (Response::ok(serde_json::json!({})), Flow::Stop),
            },
            Request::Call { .. } if !self.initialized => (
                Response::error("session not initialized; send initialize first"),
                Flow::Continue,
            ),
            Request::Call { tool, arguments } => {
                let response = match self.registry.invoke(&tool, &arguments).await {
                    Ok(value) => Response::Ok(value),
                    Err(e) => {
                        tracing::warn!(%tool, error = %e, "Tool call failed");
                        Response::error(e)
                    }
                };
                (response, Flow::Continue)
            }
        }
    }

    fn initialize(&mut self, params: serde_json::Value) -> Response {
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => return Response::error(format!("invalid initialize params: {e}")),
        };
        if params.protocol_version != PROTOCOL_VERSION {
            return Response::error(format!(
                "unsupported protocol version {} (worker speaks {PROTOCOL_VERSION})",
                params.protocol_version
            ));
        }

        tracing::info!(client = %params.client.name, client_version = %params.client.version, "Session initialized");
        self.initialized = true;
        Response::ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            server: PeerInfo::this_crate(SERVER_NAME),
            tools: self
                .registry
                .list_operations()
                .into_iter()
                .map(|tool| tool.name)
                .collect(),
        })
    }
}

fn frame(response: &Response) -> String {
    // LinesCodec appends the newline itself
    encode_line(response)
        .map(|line| line.trim_end().to_string())
        .unwrap_or_else(|e| format!(r#"{{"error":"failed to encode response: {e}"}}"#))
}
