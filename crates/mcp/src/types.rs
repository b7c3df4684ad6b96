//! Wire types: JSON-RPC 2.0 framing plus the MCP payloads this server speaks
//! (`initialize`, `ping`, `tools/list`, `tools/call`, `notifications/*`).

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use kg_tool_runtime::{ToolDefinition, ToolResult};

use crate::error::McpError;

/// The MCP protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ── Framing ───────────────────────────────────────────────────

/// The `"jsonrpc": "2.0"` marker. Any other value fails to deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(de::Error::custom(format!("unsupported jsonrpc version '{raw}'")))
        }
    }
}

/// Request id: a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcId::Number(n) => write!(f, "{n}"),
            RpcId::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Version,
    pub id: RpcId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            id,
            method: method.into(),
            params,
        }
    }

    /// Decode `params` into `T`; absent params decode from `{}`.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, McpError> {
        let raw = self.params.clone().unwrap_or_else(|| Value::Object(Default::default()));
        serde_json::from_value(raw).map_err(|e| McpError::InvalidParams(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A response carries exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Version,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Serialize `payload` as the result; a payload that will not encode
    /// becomes an internal error response instead.
    pub fn encode<T: Serialize>(id: RpcId, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Self::success(id, value),
            Err(e) => Self {
                jsonrpc: Version,
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: error_codes::INTERNAL_ERROR,
                    message: format!("failed to encode result: {e}"),
                    data: None,
                }),
            },
        }
    }

    pub fn from_error(id: RpcId, err: &McpError) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: None,
            error: Some(err.to_rpc_error()),
        }
    }
}

// ── Method routing ────────────────────────────────────────────

/// Request methods the server answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Ping,
    ListTools,
    CallTool,
    Unsupported(String),
}

impl Method {
    pub fn parse(name: &str) -> Self {
        match name {
            "initialize" => Self::Initialize,
            "ping" => Self::Ping,
            "tools/list" => Self::ListTools,
            "tools/call" => Self::CallTool,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

/// Notifications the server reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Initialized,
    Cancelled(CancelledParams),
    Ignored(String),
}

impl Notice {
    pub fn from_notification(notif: &JsonRpcNotification) -> Self {
        match notif.method.as_str() {
            "notifications/initialized" => Self::Initialized,
            "notifications/cancelled" => notif
                .params
                .clone()
                .and_then(|p| serde_json::from_value(p).ok())
                .map(Self::Cancelled)
                .unwrap_or_else(|| Self::Ignored("notifications/cancelled without requestId".to_string())),
            other => Self::Ignored(other.to_string()),
        }
    }
}

// ── MCP payloads ──────────────────────────────────────────────

/// `initialize` params. Only the client name is used, for logs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub client_info: Option<Implementation>,
}

/// Name and version of a client or server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolInfo>,
}

/// A `tools/list` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<ToolDefinition> for ToolInfo {
    fn from(def: ToolDefinition) -> Self {
        Self {
            name: def.name,
            description: def.description,
            input_schema: def.input_schema,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool output as one JSON text block; `isError` marks classified failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
}

impl From<ToolResult> for CallToolResult {
    fn from(result: ToolResult) -> Self {
        Self {
            content: vec![ToolContent::Text { text: result.content }],
            is_error: result.is_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    pub request_id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_version_marker_rejects_other_versions() {
        let ok: Result<JsonRpcRequest, _> = serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));
        assert!(ok.is_ok());
        let old: Result<JsonRpcRequest, _> = serde_json::from_value(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}));
        assert!(old.is_err());
    }

    #[test]
    fn test_rpc_id_number_and_string() {
        assert_eq!(serde_json::to_string(&RpcId::Number(42)).unwrap(), "42");
        let parsed: RpcId = serde_json::from_str("\"req-1\"").unwrap();
        assert_eq!(parsed, RpcId::String("req-1".to_string()));
        assert_eq!(parsed.to_string(), "req-1");
    }

    #[test]
    fn test_request_without_params_omits_field() {
        let req = JsonRpcRequest::new(RpcId::Number(1), "tools/list", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert!(json.get("params").is_none());
    }

    #[test]
    fn test_params_as_reports_invalid_params() {
        let req = JsonRpcRequest::new(RpcId::Number(1), "tools/call", Some(json!({"arguments": {}})));
        match req.params_as::<CallToolParams>() {
            Err(McpError::InvalidParams(msg)) => assert!(msg.contains("name")),
            other => panic!("expected invalid params, got {other:?}"),
        }
        let bare = JsonRpcRequest::new(RpcId::Number(2), "initialize", None);
        assert!(bare.params_as::<InitializeParams>().unwrap().client_info.is_none());
    }

    #[test]
    fn test_method_routing() {
        assert_eq!(Method::parse("tools/call"), Method::CallTool);
        assert_eq!(Method::parse("resources/list"), Method::Unsupported("resources/list".to_string()));
    }

    #[test]
    fn test_cancel_notice() {
        let notif = JsonRpcNotification::new(
            "notifications/cancelled",
            Some(json!({"requestId": 7, "reason": "user abort"})),
        );
        match Notice::from_notification(&notif) {
            Notice::Cancelled(p) => {
                assert_eq!(p.request_id, RpcId::Number(7));
                assert_eq!(p.reason.as_deref(), Some("user abort"));
            }
            other => panic!("expected cancel, got {other:?}"),
        }
        let broken = JsonRpcNotification::new("notifications/cancelled", Some(json!({})));
        assert!(matches!(Notice::from_notification(&broken), Notice::Ignored(_)));
    }

    #[test]
    fn test_error_response_from_mcp_error() {
        let resp = JsonRpcResponse::from_error(RpcId::Number(2), &McpError::MethodNotFound("resources/list".to_string()));
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
        assert!(err.message.contains("resources/list"));
    }

    #[test]
    fn test_tool_info_uses_camel_case_schema() {
        let def = ToolDefinition {
            name: "run_query".to_string(),
            description: "Run a query".to_string(),
            input_schema: json!({"type": "object"}),
        };
        let json = serde_json::to_value(ToolInfo::from(def)).unwrap();
        assert_eq!(json["inputSchema"]["type"], "object");
    }

    #[test]
    fn test_call_tool_result_error_flag() {
        let ok = CallToolResult::from(ToolResult {
            content: "{}".to_string(),
            is_error: false,
        });
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("isError").is_none());
        assert_eq!(json["content"][0]["type"], "text");

        let failed = CallToolResult::from(ToolResult {
            content: "{}".to_string(),
            is_error: true,
        });
        assert_eq!(serde_json::to_value(&failed).unwrap()["isError"], true);
    }
}
