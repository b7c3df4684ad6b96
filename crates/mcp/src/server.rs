//! MCP server implementation.
//!
//! Wraps a `ToolRegistry` and exposes its tools over the MCP protocol.
//! `tools/call` requests run as independent tasks so a slow query never
//! holds up grounding calls issued alongside it; everything else is
//! answered inline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use kg_tool_runtime::{ToolContext, ToolError, ToolRegistry, ToolResult};

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

pub const DEFAULT_SERVER_NAME: &str = "kg-gate";

/// One parsed line from a client.
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// Unparsable input, already turned into an error response.
    Invalid(JsonRpcResponse),
}

/// Distinguish requests (have "id") from notifications (no "id") by parsing
/// as a generic `Value` first.
pub fn parse_message(line: &str) -> Incoming {
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to parse JSON");
            return Incoming::Invalid(JsonRpcResponse::from_error(RpcId::Number(0), &McpError::JsonParse(e)));
        }
    };

    if raw.get("id").is_none() {
        return match serde_json::from_value::<JsonRpcNotification>(raw) {
            Ok(notif) => Incoming::Notification(notif),
            Err(e) => {
                let err = McpError::InvalidRequest(e.to_string());
                Incoming::Invalid(JsonRpcResponse::from_error(RpcId::Number(0), &err))
            }
        };
    }

    let id = raw
        .get("id")
        .and_then(|v| serde_json::from_value::<RpcId>(v.clone()).ok())
        .unwrap_or(RpcId::Number(0));
    match serde_json::from_value::<JsonRpcRequest>(raw) {
        Ok(req) => Incoming::Request(req),
        Err(e) => {
            warn!(error = %e, "Failed to parse JSON-RPC request");
            Incoming::Invalid(JsonRpcResponse::from_error(id, &McpError::InvalidRequest(e.to_string())))
        }
    }
}

enum Event {
    Incoming(Option<String>),
    Finished(RpcId, String),
}

/// MCP server that bridges a `ToolRegistry` to MCP clients.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    server_name: String,
    server_version: String,
    tool_timeout: Duration,
}

impl McpServer {
    /// Create a new MCP server wrapping the given tool registry.
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            tool_timeout: Duration::from_secs(90),
        }
    }

    /// Set the server name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Bound every tool call; on expiry the call is dropped and answered with TIMEOUT.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.server_name
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.list().into_iter().map(|d| d.name).collect()
    }

    /// Run the server loop, reading from and writing to the transport.
    ///
    /// Processes JSON-RPC messages until the transport is closed, then waits
    /// for in-flight tool calls and flushes their responses.
    pub async fn run<T: McpTransport>(&self, transport: &mut T) -> Result<(), McpError> {
        info!(server = %self.server_name, tools = self.registry.len(), "MCP server starting");

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(RpcId, String)>();
        let mut in_flight: HashMap<RpcId, AbortHandle> = HashMap::new();

        loop {
            let event = tokio::select! {
                incoming = transport.receive() => Event::Incoming(incoming?),
                Some((id, json)) = done_rx.recv() => Event::Finished(id, json),
            };
            let line = match event {
                Event::Finished(id, json) => {
                    if in_flight.remove(&id).is_some() {
                        transport.send(&json).await?;
                    }
                    continue;
                }
                Event::Incoming(Some(line)) => line,
                Event::Incoming(None) => {
                    info!(in_flight = in_flight.len(), "Transport closed, shutting down");
                    break;
                }
            };

            debug!(message = %line, "Received message");

            match parse_message(&line) {
                Incoming::Invalid(resp) => {
                    transport.send(&serde_json::to_string(&resp)?).await?;
                }
                Incoming::Notification(notif) => {
                    if let Some(id) = self.handle_notification(&notif) {
                        if let Some(handle) = in_flight.remove(&id) {
                            handle.abort();
                            info!(request_id = %id, "Tool call cancelled by client");
                        }
                    }
                }
                Incoming::Request(request) if Method::parse(&request.method) == Method::CallTool => {
                    let id = request.id.clone();
                    let server = self.clone();
                    let tx = done_tx.clone();
                    let handle = tokio::spawn(async move {
                        let response = server.handle_request(&request).await;
                        match serde_json::to_string(&response) {
                            Ok(json) => {
                                let _ = tx.send((response.id, json));
                            }
                            Err(e) => warn!(error = %e, "Failed to encode tool response"),
                        }
                    });
                    in_flight.insert(id, handle.abort_handle());
                }
                Incoming::Request(request) => {
                    let response = self.handle_request(&request).await;
                    let json = serde_json::to_string(&response)?;
                    debug!(response = %json, "Sending response");
                    transport.send(&json).await?;
                }
            }
        }

        // Only spawned calls hold senders now; a call that panicked drops its
        // sender without answering, so the channel still closes.
        drop(done_tx);
        while !in_flight.is_empty() {
            match done_rx.recv().await {
                Some((id, json)) => {
                    if in_flight.remove(&id).is_some() {
                        transport.send(&json).await?;
                    }
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Answer one request. `tools/call` is bounded by the tool timeout.
    pub async fn handle_request(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome = match Method::parse(&request.method) {
            Method::Initialize => Ok(self.initialize(request)),
            Method::Ping => Ok(JsonRpcResponse::success(id.clone(), serde_json::json!({}))),
            Method::ListTools => Ok(self.list_tools(id.clone())),
            Method::CallTool => self.call_tool(request).await,
            Method::Unsupported(method) => {
                warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method))
            }
        };
        outcome.unwrap_or_else(|e| JsonRpcResponse::from_error(id, &e))
    }

    /// Log a notification. Returns the request id a `notifications/cancelled`
    /// refers to.
    pub fn handle_notification(&self, notif: &JsonRpcNotification) -> Option<RpcId> {
        match Notice::from_notification(notif) {
            Notice::Initialized => {
                info!("Client confirmed initialization");
                None
            }
            Notice::Cancelled(p) => {
                debug!(request_id = %p.request_id, reason = ?p.reason, "Client cancelled a request");
                Some(p.request_id)
            }
            Notice::Ignored(what) => {
                debug!(notification = %what, "Ignoring notification");
                None
            }
        }
    }

    fn initialize(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let params = request.params_as::<InitializeParams>().unwrap_or_default();
        let client = params.client_info.map(|c| c.name).unwrap_or_else(|| "unknown".to_string());
        info!(
            client = %client,
            requested = params.protocol_version.as_deref().unwrap_or("-"),
            "Handling initialize"
        );

        JsonRpcResponse::encode(
            request.id.clone(),
            &InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability { list_changed: false }),
                },
                server_info: Implementation {
                    name: self.server_name.clone(),
                    version: self.server_version.clone(),
                },
            },
        )
    }

    fn list_tools(&self, id: RpcId) -> JsonRpcResponse {
        let tools: Vec<ToolInfo> = self.registry.list().into_iter().map(ToolInfo::from).collect();
        debug!(count = tools.len(), "Handling tools/list");
        JsonRpcResponse::encode(id, &ListToolsResult { tools })
    }

    async fn call_tool(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let id = request.id.clone();
        let params: CallToolParams = request.params_as()?;
        let tool = self
            .registry
            .get(&params.name)
            .ok_or_else(|| McpError::ToolNotFound(params.name.clone()))?;

        let ctx = ToolContext::new(id.to_string());
        let started = Instant::now();
        let result = match tokio::time::timeout(self.tool_timeout, tool.execute(params.arguments, &ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %params.name, error = %e, "Tool returned an error");
                ToolResult::failure(&e.classified())
            }
            Err(_) => {
                warn!(tool = %params.name, timeout_secs = self.tool_timeout.as_secs(), "Tool call timed out");
                ToolResult::failure(&ToolError::Timeout(self.tool_timeout).classified())
            }
        };
        info!(
            tool = %params.name,
            request_id = %id,
            is_error = result.is_error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool call finished"
        );

        Ok(JsonRpcResponse::encode(id, &CallToolResult::from(result)))
    }
}
