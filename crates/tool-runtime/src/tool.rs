use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use kg_core::{Classified, ErrorCode};

/// Describes a tool's interface for agent consumption.
/// Maps directly onto an MCP `tools/list` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "search_entity", "run_query")
    pub name: String,
    /// Human-readable description for the agent
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// Result of executing a tool, sent back to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// JSON text payload
    pub content: String,
    /// Whether this result represents a classified failure
    pub is_error: bool,
}

impl ToolResult {
    /// Serialize `payload` as the result content.
    pub fn json<T: Serialize>(payload: &T, is_error: bool) -> Result<Self, ToolError> {
        let content = serde_json::to_string_pretty(payload)
            .map_err(|e| ToolError::ExecutionFailed(format!("JSON serialization failed: {e}")))?;
        Ok(Self { content, is_error })
    }

    /// The `{ok: false, error_code, hint}` payload for a classified failure.
    pub fn failure(classified: &Classified) -> Self {
        Self {
            content: failure_payload(classified).to_string(),
            is_error: true,
        }
    }
}

/// JSON body shared by every failure the agent sees.
pub fn failure_payload(classified: &Classified) -> Value {
    let mut payload = json!({
        "ok": false,
        "error_code": classified.code,
        "hint": classified.hint,
    });
    if !classified.message.is_empty() {
        payload["error_message"] = Value::String(classified.message.clone());
    }
    payload
}

/// Context passed to tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Protocol-level request id, for log correlation
    pub request_id: String,
}

impl ToolContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    /// Map onto the closed error taxonomy so the agent always gets a code and hint.
    pub fn classified(&self) -> Classified {
        let code = match self {
            Self::InvalidInput(_) => ErrorCode::Syntax,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::ExecutionFailed(_) | Self::Other(_) => ErrorCode::Unknown,
        };
        let mut classified = Classified::new(code, self.to_string());
        if let Self::InvalidInput(_) = self {
            classified.hint = "Check the tool arguments against its input schema.".to_string();
        }
        classified
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Required string argument.
pub fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing '{field}' field")))
}

/// Optional non-negative integer argument.
pub fn optional_u64(input: &Value, field: &str) -> Result<Option<u64>, ToolError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::InvalidInput(format!("'{field}' must be a non-negative integer"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition {
            name: "test_tool".to_string(),
            description: "A test tool".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_string(&def).unwrap();
        let roundtrip: ToolDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.name, "test_tool");
    }

    #[test]
    fn test_failure_payload_carries_code_and_hint() {
        let result = ToolResult::failure(&Classified::new(ErrorCode::RateLimit, "HTTP 429"));
        assert!(result.is_error);
        let parsed: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(parsed["ok"], false);
        assert_eq!(parsed["error_code"], "RATE_LIMIT");
        assert_eq!(parsed["hint"], ErrorCode::RateLimit.hint());
        assert_eq!(parsed["error_message"], "HTTP 429");
    }

    #[test]
    fn test_tool_errors_classify() {
        let err = ToolError::InvalidInput("missing 'text' field".to_string());
        assert_eq!(err.classified().code, ErrorCode::Syntax);
        let err = ToolError::Timeout(std::time::Duration::from_secs(90));
        assert_eq!(err.classified().code, ErrorCode::Timeout);
        assert_eq!(err.classified().hint, ErrorCode::Timeout.hint());
    }

    #[test]
    fn test_argument_helpers() {
        let input = serde_json::json!({"text": "spouse", "k": 3, "bad": -1});
        assert_eq!(required_str(&input, "text").unwrap(), "spouse");
        assert!(required_str(&input, "missing").is_err());
        assert_eq!(optional_u64(&input, "k").unwrap(), Some(3));
        assert_eq!(optional_u64(&input, "absent").unwrap(), None);
        assert!(optional_u64(&input, "bad").is_err());
    }
}
