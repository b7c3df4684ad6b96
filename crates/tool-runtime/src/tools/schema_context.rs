//! `get_schema_context`: labels, descriptions, datatypes and `instance of`
//! targets for a set of identifiers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::facade::ToolFacade;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

pub struct SchemaContextTool {
    facade: Arc<ToolFacade>,
}

impl SchemaContextTool {
    pub fn new(facade: Arc<ToolFacade>) -> Self {
        Self { facade }
    }
}

/// Collect string ids from `ids`, `entity_ids` and `property_ids`.
fn collect_ids(input: &Value) -> Result<Vec<String>, ToolError> {
    let mut ids = Vec::new();
    for field in ["ids", "entity_ids", "property_ids"] {
        match input.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let id = item
                        .as_str()
                        .ok_or_else(|| ToolError::InvalidInput(format!("'{field}' must contain strings")))?;
                    ids.push(id.to_string());
                }
            }
            Some(_) => return Err(ToolError::InvalidInput(format!("'{field}' must be an array"))),
        }
    }
    if ids.is_empty() {
        return Err(ToolError::InvalidInput("provide at least one identifier in 'ids'".to_string()));
    }
    Ok(ids)
}

#[async_trait]
impl Tool for SchemaContextTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_schema_context".to_string(),
            description: "Fetch schema information for entities and properties: labels, descriptions, \
                datatypes (properties) and instance-of types (entities). Use it to understand what a \
                property means before writing SPARQL."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Identifiers, e.g. ['Q42', 'P31']"
                    },
                    "entity_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Entity identifiers, merged into 'ids'"
                    },
                    "property_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Property identifiers, merged into 'ids'"
                    }
                }
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let ids = collect_ids(&input)?;
        debug!(request_id = %context.request_id, count = ids.len(), "schema context tool");

        match self.facade.get_schema_context(&ids).await {
            Ok(schema) => ToolResult::json(&schema, false),
            Err(classified) => Ok(ToolResult::failure(&classified)),
        }
    }
}
