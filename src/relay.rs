use serde_json::{Map, Value};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::protocol::{
    ControlMethod, InitializeResult, PROTOCOL_VERSION, PeerInfo, Request, Response, decode_line,
    encode_line,
};

const CLIENT_NAME: &str = "customer-comment-analyzer-client";

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("not connected to the worker")]
    NotConnected,

    #[error("failed to start worker {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("worker did not complete the handshake within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("worker handshake failed: {0}")]
    ProtocolMismatch(String),

    #[error("no response from worker within {0:?}; connection dropped")]
    RelayTimeout(Duration),

    #[error("{0}")]
    RemoteOperation(String),

    #[error("worker exited unexpectedly{}", .status.as_ref().map(|s| format!(" ({s})")).unwrap_or_default())]
    WorkerExited { status: Option<String> },

    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode request: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Handshaking,
    Ready,
    AwaitingResponse,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl RelayConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            handshake_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// A live worker process: its stdin plus the channel fed by the stdout reader thread.
struct Connection {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: flume::Receiver<String>,
}

impl Connection {
    fn send(&mut self, request: &Request) -> Result<(), RelayError> {
        let line = encode_line(request)?;
        let stdin = self.stdin.as_mut().ok_or(RelayError::NotConnected)?;
        stdin.write_all(line.as_bytes())?;
        stdin.flush()?;
        Ok(())
    }

    /// Next JSON frame from the worker. Noise lines are skipped.
    fn receive(&mut self, timeout: Duration) -> Result<Response, ReceiveError> {
        let deadline = Instant::now() + timeout;
        loop {
            let line = self
                .lines
                .recv_deadline(deadline)
                .map_err(|e| match e {
                    flume::RecvTimeoutError::Timeout => ReceiveError::Timeout,
                    flume::RecvTimeoutError::Disconnected => ReceiveError::Closed,
                })?;
            if line.trim().is_empty() {
                continue;
            }
            match decode_line::<Response>(&line) {
                Ok(response) => return Ok(response),
                Err(e) => tracing::warn!(error = %e, %line, "Skipping non-JSON output from worker"),
            }
        }
    }

    fn exit_status(&mut self) -> Option<String> {
        self.child
            .try_wait()
            .ok()
            .flatten()
            .map(|status| status.to_string())
    }

    /// Best-effort shutdown frame, then close stdin and wait out the grace period.
    fn close(mut self, grace: Duration) {
        if let Err(e) = self.send(&Request::control(ControlMethod::Shutdown)) {
            tracing::debug!(error = %e, "Shutdown frame not delivered");
        }
        drop(self.stdin.take());

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "Worker exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll worker status");
                    break;
                }
            }
        }
        tracing::warn!("Worker still running after grace period, killing it");
        self.kill();
    }

    fn kill(mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "Kill failed (worker may have exited)");
        }
        let _ = self.child.wait();
    }
}

enum ReceiveError {
    Timeout,
    Closed,
}

pub struct Relay {
    config: RelayConfig,
    state: RelayState,
    connection: Option<Connection>,
    worker: Option<InitializeResult>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            state: RelayState::Disconnected,
            connection: None,
            worker: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn worker_info(&self) -> Option<&InitializeResult> {
        self.worker.as_ref()
    }

    /// Spawn the worker and complete the handshake. No-op when already connected.
    #[tracing::instrument(skip(self), fields(program = %self.config.program.display()))]
    pub fn connect(&mut self) -> Result<(), RelayError> {
        if self.connection.is_some() {
            return Ok(());
        }

        self.state = RelayState::Handshaking;
        let result = self.spawn().and_then(|connection| self.handshake(connection));
        match result {
            Ok((connection, info)) => {
                tracing::info!(
                    server = %info.server.name,
                    server_version = %info.server.version,
                    tools = info.tools.len(),
                    "Connected to worker"
                );
                self.connection = Some(connection);
                self.worker = Some(info);
                self.state = RelayState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Connecting to worker failed");
                self.state = RelayState::Disconnected;
                Err(e)
            }
        }
    }

    fn spawn(&self) -> Result<Connection, RelayError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .envs(self.config.envs.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RelayError::Spawn {
                program: self.config.program.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, lines) = flume::unbounded();
        if let Some(stdout) = stdout {
            thread::Builder::new()
                .name("relay-stdout".into())
                .spawn(move || {
                    for line in BufReader::new(stdout).lines() {
                        let Ok(line) = line else { break };
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                })?;
        }
        if let Some(stderr) = stderr {
            thread::Builder::new()
                .name("relay-stderr".into())
                .spawn(move || {
                    // already formatted by the worker's own subscriber
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        tracing::debug!(target: "worker", "{line}");
                    }
                })?;
        }

        Ok(Connection {
            child,
            stdin,
            lines,
        })
    }

    fn handshake(
        &self,
        mut connection: Connection,
    ) -> Result<(Connection, InitializeResult), RelayError> {
        let timeout = self.config.handshake_timeout;
        let reply = connection
            .send(&Request::initialize(PeerInfo::this_crate(CLIENT_NAME)))
            .map_err(|e| match e {
                // a worker that died at startup closes its stdin
                RelayError::Io(_) => RelayError::WorkerExited { status: None },
                other => other,
            })
            .and_then(|()| match connection.receive(timeout) {
                Ok(response) => Ok(response),
                Err(ReceiveError::Timeout) => Err(RelayError::HandshakeTimeout(timeout)),
                Err(ReceiveError::Closed) => {
                    // give the exit status a moment to become observable
                    thread::sleep(Duration::from_millis(50));
                    Err(RelayError::WorkerExited {
                        status: connection.exit_status(),
                    })
                }
            });

        let info = reply.and_then(|response| {
            let payload = response.into_result().map_err(RelayError::ProtocolMismatch)?;
            let info: InitializeResult = serde_json::from_value(payload)
                .map_err(|e| RelayError::ProtocolMismatch(format!("bad initialize reply: {e}")))?;
            if info.protocol_version != PROTOCOL_VERSION {
                return Err(RelayError::ProtocolMismatch(format!(
                    "worker speaks protocol {}, expected {PROTOCOL_VERSION}",
                    info.protocol_version
                )));
            }
            Ok(info)
        });

        match info {
            Ok(info) => Ok((connection, info)),
            Err(e) => {
                connection.kill();
                Err(e)
            }
        }
    }

    pub fn invoke(&mut self, tool: &str, arguments: Map<String, Value>) -> Result<Value, RelayError> {
        let timeout = self.config.call_timeout;
        self.invoke_with_timeout(tool, arguments, timeout)
    }

    #[tracing::instrument(skip(self, arguments))]
    pub fn invoke_with_timeout(
        &mut self,
        tool: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, RelayError> {
        let request = Request::call(tool, arguments);
        self.roundtrip(&request, timeout)?
            .into_result()
            .map_err(RelayError::RemoteOperation)
    }

    pub fn list_tools(&mut self) -> Result<Value, RelayError> {
        let timeout = self.config.call_timeout;
        self.roundtrip(&Request::control(ControlMethod::ListTools), timeout)?
            .into_result()
            .map_err(RelayError::RemoteOperation)
    }

    fn roundtrip(&mut self, request: &Request, timeout: Duration) -> Result<Response, RelayError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(RelayError::NotConnected);
        };

        self.state = RelayState::AwaitingResponse;
        let started = Instant::now();
        let outcome = match connection.send(request) {
            Ok(()) => connection.receive(timeout).map_err(|e| match e {
                ReceiveError::Timeout => RelayError::RelayTimeout(timeout),
                ReceiveError::Closed => RelayError::WorkerExited {
                    status: connection.exit_status(),
                },
            }),
            Err(RelayError::Io(_)) => Err(RelayError::WorkerExited {
                status: connection.exit_status(),
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => {
                tracing::debug!(elapsed_ms = started.elapsed().as_millis(), "Worker responded");
                self.state = RelayState::Ready;
                Ok(response)
            }
            Err(RelayError::Codec(e)) => {
                self.state = RelayState::Ready;
                Err(RelayError::Codec(e))
            }
            Err(e) => {
                // framing can't be trusted any more
                tracing::error!(error = %e, "Relay call failed, dropping connection");
                if let Some(connection) = self.connection.take() {
                    connection.kill();
                }
                self.worker = None;
                self.state = RelayState::Disconnected;
                Err(e)
            }
        }
    }

    /// Shut the worker down. Safe to call in any state.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::info!("Disconnecting from worker");
            connection.close(self.config.shutdown_grace);
        }
        self.worker = None;
        self.state = RelayState::Disconnected;
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> RelayConfig {
        RelayConfig::new("sh")
            .arg("-c")
            .arg(script)
            .handshake_timeout(Duration::from_secs(1))
            .call_timeout(Duration::from_millis(500))
    }

    const HANDSHAKE_REPLY: &str = r#"{"protocol_version":"1","server":{"name":"fake","version":"0"},"tools":["classify_comment"]}"#;

    #[test]
    fn calls_before_connect_fail() {
        let mut relay = Relay::new(shell("cat"));
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert!(matches!(
            relay.invoke("analyze_comment", Map::new()),
            Err(RelayError::NotConnected)
        ));
    }

    #[test]
    fn silent_worker_times_out_handshake() {
        let mut relay = Relay::new(shell("sleep 5"));
        let err = relay.connect().unwrap_err();
        assert!(matches!(err, RelayError::HandshakeTimeout(_)));
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert!(!relay.is_connected());
    }

    #[test]
    fn worker_that_exits_at_startup() {
        let mut relay = Relay::new(shell("echo missing token >&2; exit 3"));
        let err = relay.connect().unwrap_err();
        assert!(matches!(err, RelayError::WorkerExited { .. }), "{err}");
        assert_eq!(relay.state(), RelayState::Disconnected);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let mut relay = Relay::new(RelayConfig::new("/nonexistent/worker-binary"));
        assert!(matches!(relay.connect(), Err(RelayError::Spawn { .. })));
        assert_eq!(relay.state(), RelayState::Disconnected);
    }

    #[test]
    fn handshake_error_is_a_protocol_mismatch() {
        let mut relay = Relay::new(shell(r#"read line; echo '{"error":"unsupported protocol version"}'; sleep 5"#));
        let err = relay.connect().unwrap_err();
        assert!(matches!(err, RelayError::ProtocolMismatch(ref m) if m.contains("unsupported")));
        assert_eq!(relay.state(), RelayState::Disconnected);
    }

    #[test]
    fn remote_error_keeps_connection_and_timeout_drops_it() {
        let script = format!(
            r#"read line; echo '{HANDSHAKE_REPLY}'
read line; echo 'log noise'; echo '{{"error":"Unknown tool: nope"}}'
read line; echo '{{"comment":"c","category":"FOOD"}}'
read line; sleep 5"#
        );
        let mut relay = Relay::new(shell(&script));
        relay.connect().unwrap();
        assert_eq!(relay.state(), RelayState::Ready);
        assert_eq!(relay.worker_info().unwrap().server.name, "fake");

        let err = relay.invoke("nope", Map::new()).unwrap_err();
        assert!(matches!(err, RelayError::RemoteOperation(ref m) if m == "Unknown tool: nope"));
        assert_eq!(relay.state(), RelayState::Ready);

        let value = relay.invoke("classify_comment", Map::new()).unwrap();
        assert_eq!(value["category"], "FOOD");

        let err = relay.invoke("classify_comment", Map::new()).unwrap_err();
        assert!(matches!(err, RelayError::RelayTimeout(_)));
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert!(matches!(
            relay.invoke("classify_comment", Map::new()),
            Err(RelayError::NotConnected)
        ));
    }

    #[test]
    fn stderr_chatter_stays_out_of_responses() {
        let script = format!(
            r#"echo 'DEBUG comment="WARNING: ERROR on the sign"' >&2
read line; echo '{HANDSHAKE_REPLY}'
read line; echo 'ERROR completion failed' >&2
echo '{{"comment":"c","category":"UNKNOWN","sentiment":"UNKNOWN","error":"AnalysisFailed: x"}}'
cat > /dev/null"#
        );
        let mut relay = Relay::new(shell(&script));
        relay.connect().unwrap();

        let value = relay.invoke("analyze_comment", Map::new()).unwrap();
        assert_eq!(value["category"], "UNKNOWN");
        assert_eq!(value["error"], "AnalysisFailed: x");
        assert_eq!(relay.state(), RelayState::Ready);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let script = format!(r#"read line; echo '{HANDSHAKE_REPLY}'; cat > /dev/null"#);
        let mut relay = Relay::new(shell(&script));
        relay.disconnect();
        relay.connect().unwrap();
        relay.disconnect();
        relay.disconnect();
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert!(relay.worker_info().is_none());
    }
}
