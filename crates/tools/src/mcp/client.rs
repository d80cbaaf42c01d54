use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use autopilot_core::error::ToolError;
use autopilot_core::tool::Closeable;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::gateway::McpServerSpec;

/// Maximum size (in bytes) for a single JSON-RPC response line.
const MAX_RESPONSE_BYTES: usize = 512 * 1024;

/// Timeout for a single JSON-RPC round-trip (request + response).
const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the handshake (initialize + notifications/initialized).
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for a killed server to be reaped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const PROTOCOL_VERSION: &str = "2024-11-05";

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpToolInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// JSON-RPC client for one MCP server.
///
/// Cheap to clone; clones share the connection. Round-trips are serialized
/// on the reader so responses can never be handed to the wrong caller.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<Inner>,
}

struct Inner {
    server: String,
    reader: Mutex<Reader>,
    writer: Mutex<Option<Writer>>,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl McpClient {
    /// Launch the server process described by `spec` and perform the handshake.
    ///
    /// The child inherits this process' environment plus `spec.env`. Its
    /// stderr is forwarded to the log.
    pub async fn spawn(spec: &McpServerSpec) -> Result<Self, ToolError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| ToolError::ConnectionFailed {
                server: spec.name.clone(),
                reason: "empty launch command".into(),
            })?;

        let mut child = Command::new(program)
            .args(args)
            .envs(&spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ConnectionFailed {
                server: spec.name.clone(),
                reason: format!("failed to launch '{program}': {e}"),
            })?;

        let missing = |what: &str| ToolError::ConnectionFailed {
            server: spec.name.clone(),
            reason: format!("failed to capture server {what}"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim_end();
                    if !line.is_empty() {
                        warn!(mcp_server = %server, "{}", line);
                    }
                }
            });
        }

        Self::handshake(&spec.name, Box::new(stdout), Box::new(stdin), Some(child)).await
    }

    /// Connect over an already-open byte stream pair.
    pub async fn connect<R, W>(server: &str, reader: R, writer: W) -> Result<Self, ToolError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::handshake(server, Box::new(reader), Box::new(writer), None).await
    }

    async fn handshake(
        server: &str,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Writer,
        child: Option<Child>,
    ) -> Result<Self, ToolError> {
        let client = Self {
            inner: Arc::new(Inner {
                server: server.to_string(),
                reader: Mutex::new(BufReader::new(reader)),
                writer: Mutex::new(Some(writer)),
                child: Mutex::new(child),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        };

        let init = async {
            client
                .request_inner(
                    "initialize",
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": {
                            "name": "autopilot",
                            "version": env!("CARGO_PKG_VERSION"),
                        }
                    }),
                )
                .await?;
            client
                .notify("notifications/initialized", json!({}))
                .await
        };

        let outcome = match tokio::time::timeout(INIT_TIMEOUT, init).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Protocol {
                server: server.to_string(),
                reason: format!("initialization timed out after {INIT_TIMEOUT:?}"),
            }),
        };

        match outcome {
            Ok(()) => {
                debug!(server, "MCP server initialized");
                Ok(client)
            }
            Err(e) => {
                // Never hand back a half-open server; reap it here.
                if let Err(close_err) = client.shutdown().await {
                    warn!(server, error = %close_err, "Error closing failed MCP server");
                }
                Err(ToolError::ConnectionFailed {
                    server: server.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Server name this client was launched for.
    pub fn server(&self) -> &str {
        &self.inner.server
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response, bounded by the RPC timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        match tokio::time::timeout(RPC_TIMEOUT, self.request_inner(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(self.protocol(format!(
                "call '{method}' timed out after {RPC_TIMEOUT:?}"
            ))),
        }
    }

    async fn request_inner(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        if self.is_closed() {
            return Err(self.protocol("connection is closed"));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut reader = self.inner.reader.lock().await;
        self.write_line(&request).await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            // One byte past the cap tells an oversized line from one at the limit.
            let read = (&mut *reader)
                .take(MAX_RESPONSE_BYTES as u64 + 1)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| self.protocol(format!("read failed: {e}")))?;
            if read == 0 {
                return Err(self.protocol("server closed stdout"));
            }
            if line.len() > MAX_RESPONSE_BYTES {
                return Err(self.protocol(format!(
                    "response exceeded size limit ({MAX_RESPONSE_BYTES} bytes)"
                )));
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                debug!(server = %self.inner.server, "Skipping non-UTF-8 line from MCP server");
                continue;
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    debug!(server = %self.inner.server, error = %e, "Skipping non-JSON line from MCP server");
                    continue;
                }
            };

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                // Server-initiated notifications and stale responses.
                debug!(server = %self.inner.server, "Skipping unrelated MCP message");
                continue;
            }

            if let Some(error) = message.get("error") {
                let reason = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(self.protocol(format!("'{method}' failed: {reason}")));
            }

            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolError> {
        self.write_line(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }

    async fn write_line(&self, message: &Value) -> Result<(), ToolError> {
        let mut line = message.to_string();
        line.push('\n');

        let mut writer = self.inner.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| self.protocol("connection is closed"))?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.protocol(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.protocol(format!("flush failed: {e}")))
    }

    /// List the tools the server exposes.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, ToolError> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(tools).map_err(|e| self.protocol(format!("bad tools/list result: {e}")))
    }

    /// Invoke a tool and return the raw `tools/call` result.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        self.request(
            "tools/call",
            json!({
                "name": name,
                "arguments": arguments,
            }),
        )
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Terminate the server. Safe to call repeatedly and after the server exited.
    async fn shutdown(&self) -> Result<(), ToolError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Kill first so a reader blocked on the server sees EOF.
        let child = self.inner.child.lock().await.take();
        let result = match child {
            Some(mut child) => {
                if let Err(e) = child.start_kill() {
                    debug!(server = %self.inner.server, error = %e, "MCP server already exited");
                }
                match tokio::time::timeout(CLOSE_TIMEOUT, child.wait()).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(ToolError::CloseFailed {
                        server: self.inner.server.clone(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(ToolError::CloseFailed {
                        server: self.inner.server.clone(),
                        reason: format!("server did not exit within {CLOSE_TIMEOUT:?}"),
                    }),
                }
            }
            None => Ok(()),
        };

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        result
    }

    fn protocol(&self, reason: impl Into<String>) -> ToolError {
        ToolError::Protocol {
            server: self.inner.server.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Closeable for McpClient {
    fn name(&self) -> &str {
        &self.inner.server
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.shutdown().await
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server", &self.inner.server)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// In-memory MCP server answering `initialize`, `tools/list` and
    /// `tools/call` for the given tool names.
    pub(crate) async fn fake_server(server: &str, tools: &[&str]) -> McpClient {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let tools: Vec<String> = tools.iter().map(|t| t.to_string()).collect();

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let reply = match msg["method"].as_str().unwrap_or("") {
                    "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0"}
                    }}),
                    "tools/list" => {
                        let listed: Vec<Value> = tools
                            .iter()
                            .map(|name| json!({
                                "name": name,
                                "description": format!("The {name} tool"),
                                "inputSchema": {"type": "object", "properties": {}}
                            }))
                            .collect();
                        json!({"jsonrpc": "2.0", "id": id, "result": {"tools": listed}})
                    }
                    "tools/call" => {
                        let name = msg["params"]["name"].as_str().unwrap_or("");
                        if name == "broken" {
                            json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32000, "message": "tool exploded"}})
                        } else {
                            // A progress notification before the real response.
                            let note = json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {}});
                            write.write_all(format!("{note}\n").as_bytes()).await.unwrap();
                            json!({"jsonrpc": "2.0", "id": id, "result": {"content": [
                                {"type": "text", "text": format!("ran {name}")},
                                {"type": "text", "text": msg["params"]["arguments"].to_string()}
                            ]}})
                        }
                    }
                    other => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": format!("unknown method {other}")}}),
                };
                if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let (read, write) = tokio::io::split(client_io);
        McpClient::connect(server, read, write).await.unwrap()
    }

    /// MCP server that completes the handshake, then answers `tools/list`
    /// with whatever bytes `reply` produces for the request id.
    async fn raw_server(reply: impl Fn(&Value) -> Vec<u8> + Send + 'static) -> McpClient {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                let Some(id) = msg.get("id").cloned() else {
                    continue;
                };
                let bytes = match msg["method"].as_str().unwrap_or("") {
                    "initialize" => {
                        format!("{}\n", json!({"jsonrpc": "2.0", "id": id, "result": {}})).into_bytes()
                    }
                    _ => reply(&id),
                };
                if write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        let (read, write) = tokio::io::split(client_io);
        McpClient::connect("raw", read, write).await.unwrap()
    }

    #[tokio::test]
    async fn invalid_utf8_lines_are_skipped() {
        let client = raw_server(|id| {
            let mut bytes = b"\xff\xfe not text\n".to_vec();
            let listed = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                {"name": "search", "inputSchema": {"type": "object"}}
            ]}});
            bytes.extend_from_slice(format!("{listed}\n").as_bytes());
            bytes
        })
        .await;

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
    }

    #[tokio::test]
    async fn oversized_line_fails_without_reading_it_whole() {
        let client = raw_server(|_| vec![b'x'; MAX_RESPONSE_BYTES * 2]).await;

        let err = client.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("size limit"), "{err}");
    }

    #[tokio::test]
    async fn lists_tools_after_handshake() {
        let client = fake_server("planner", &["start_task", "complete_task"]).await;
        let tools = client.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["start_task", "complete_task"]);
        assert_eq!(tools[0].description, "The start_task tool");
    }

    #[tokio::test]
    async fn call_skips_notifications_and_returns_result() {
        let client = fake_server("planner", &["do_thing"]).await;
        let result = client.call_tool("do_thing", json!({"x": 1})).await.unwrap();
        let content = result["content"].as_array().unwrap();
        assert_eq!(content[0]["text"], "ran do_thing");
        assert_eq!(content[1]["text"], r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn error_response_is_execution_failure() {
        let client = fake_server("planner", &["broken"]).await;
        let err = client.call_tool("broken", json!({})).await.unwrap_err();
        match err {
            ToolError::ExecutionFailed { tool_name, reason } => {
                assert_eq!(tool_name, "broken");
                assert!(reason.contains("tool exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_calls() {
        let client = fake_server("planner", &["do_thing"]).await;
        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(client.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn handshake_fails_when_server_hangs_up() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        drop(server_io);
        let (read, write) = tokio::io::split(client_io);
        let err = McpClient::connect("gone", read, write).await.unwrap_err();
        assert!(matches!(err, ToolError::ConnectionFailed { ref server, .. } if server == "gone"));
    }

    #[tokio::test]
    async fn spawn_missing_binary_is_connection_failure() {
        let spec = McpServerSpec::new(
            "ghost",
            vec!["autopilot-test-no-such-binary-7f3a".to_string()],
        );
        let err = McpClient::spawn(&spec).await.unwrap_err();
        assert!(matches!(err, ToolError::ConnectionFailed { .. }));
    }
}
