//! `run_query`: the full safety pipeline (lint, cache, dry run, real run,
//! bounded repair) behind one tool call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::facade::ToolFacade;
use crate::tool::{optional_u64, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

pub struct RunQueryTool {
    facade: Arc<ToolFacade>,
}

impl RunQueryTool {
    pub fn new(facade: Arc<ToolFacade>) -> Self {
        Self { facade }
    }
}

const DESCRIPTION: &str = "Execute a SPARQL SELECT or ASK query against the knowledge graph.\n\n\
Safety pipeline (runs automatically):\n\
  1. Lint: LIMIT bounds, blocked constructs, grounded identifiers\n\
  2. Dry run at LIMIT 1 to catch syntax errors cheaply\n\
  3. Full run with bounded auto-repair (TIMEOUT strips the label service or halves LIMIT; \
RATE_LIMIT waits and retries; anything else is returned immediately)\n\n\
Every wd:Q… / wdt:P… identifier must come from search_entity or search_property \
in this session, otherwise the query is rejected with UNGROUNDED_ID.\n\n\
Failures return error_code (SYNTAX, TIMEOUT, RATE_LIMIT, ENDPOINT_ERROR, BLOCKED_CONSTRUCT, \
UNGROUNDED_ID, MISSING_LIMIT, UNKNOWN) with a repair hint.";

#[async_trait]
impl Tool for RunQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_query".to_string(),
            description: DESCRIPTION.to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "SPARQL SELECT or ASK query"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum LIMIT to allow (default 200, hard maximum 500)"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let query = input
            .get("query")
            .or_else(|| input.get("sparql"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'query' field".to_string()))?;
        let limit = optional_u64(&input, "limit")?.map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        debug!(request_id = %context.request_id, limit, "run_query tool");

        match self.facade.run_query(query, limit).await {
            Ok(output) => ToolResult::json(&output, false),
            Err(failure) => ToolResult::json(&failure, true),
        }
    }
}
