//! `normalize_error` and `debug_ping`: tools for diagnosing failures rather
//! than fetching facts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::facade::ToolFacade;
use crate::tool::{required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Classify a raw error string into the closed error taxonomy.
pub struct NormalizeErrorTool {
    facade: Arc<ToolFacade>,
}

impl NormalizeErrorTool {
    pub fn new(facade: Arc<ToolFacade>) -> Self {
        Self { facade }
    }
}

#[async_trait]
impl Tool for NormalizeErrorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "normalize_error".to_string(),
            description: "Classify a raw SPARQL or endpoint error message into a stable error code \
                (SYNTAX, TIMEOUT, RATE_LIMIT, ENDPOINT_ERROR, UNKNOWN) with a repair hint."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "error_message": {
                        "type": "string",
                        "description": "The raw error string from a failed execution"
                    }
                },
                "required": ["error_message"]
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let message = required_str(&input, "error_message")?;
        let classified = self.facade.normalize_error(message);
        ToolResult::json(
            &serde_json::json!({ "code": classified.code, "hint": classified.hint }),
            false,
        )
    }
}

/// Check connectivity to the configured SPARQL endpoint.
pub struct DebugPingTool {
    facade: Arc<ToolFacade>,
}

impl DebugPingTool {
    pub fn new(facade: Arc<ToolFacade>) -> Self {
        Self { facade }
    }
}

#[async_trait]
impl Tool for DebugPingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "debug_ping".to_string(),
            description: "Test connectivity to the SPARQL endpoint. Reports reachability, latency and \
                whether HTTP/2 was negotiated."
                .to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, _input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let report = self.facade.debug_ping().await;
        ToolResult::json(&report, !report.reachable)
    }
}
