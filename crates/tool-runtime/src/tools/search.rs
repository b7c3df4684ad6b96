//! `search_entity` / `search_property`: ground a text mention to identifiers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use kg_core::IdKind;

use crate::facade::ToolFacade;
use crate::tool::{optional_u64, required_str, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

fn search_schema(example: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "text": {
                "type": "string",
                "description": format!("Search string, e.g. '{example}'")
            },
            "k": {
                "type": "integer",
                "minimum": 1,
                "maximum": 20,
                "description": "Maximum candidates to return (default 5)"
            }
        },
        "required": ["text"]
    })
}

async fn run_search(
    facade: &ToolFacade,
    kind: IdKind,
    input: &Value,
    context: &ToolContext,
) -> Result<ToolResult, ToolError> {
    let text = required_str(input, "text")?;
    let k = optional_u64(input, "k")?.map(|k| usize::try_from(k).unwrap_or(usize::MAX));
    debug!(request_id = %context.request_id, kind = kind.as_str(), text, "search tool");

    let outcome = match kind {
        IdKind::Entity => facade.search_entity(text, k).await,
        IdKind::Property => facade.search_property(text, k).await,
    };
    match outcome {
        Ok(response) => ToolResult::json(&response, false),
        Err(classified) => Ok(ToolResult::failure(&classified)),
    }
}

/// Resolve a mention to entity identifiers (`Q…`).
pub struct SearchEntityTool {
    facade: Arc<ToolFacade>,
}

impl SearchEntityTool {
    pub fn new(facade: Arc<ToolFacade>) -> Self {
        Self { facade }
    }
}

#[async_trait]
impl Tool for SearchEntityTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_entity".to_string(),
            description: "Search the knowledge graph for entities matching a text string. \
                Must be called before writing any SPARQL that uses wd:Q… identifiers; \
                returns ranked candidates with id, label, description and concept_uri."
                .to_string(),
            input_schema: search_schema("Albert Einstein"),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        run_search(&self.facade, IdKind::Entity, &input, context).await
    }
}

/// Resolve a mention to property identifiers (`P…`).
pub struct SearchPropertyTool {
    facade: Arc<ToolFacade>,
}

impl SearchPropertyTool {
    pub fn new(facade: Arc<ToolFacade>) -> Self {
        Self { facade }
    }
}

#[async_trait]
impl Tool for SearchPropertyTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_property".to_string(),
            description: "Search the knowledge graph for properties matching a text string. \
                Must be called before writing SPARQL that uses wdt:P… / p:P… identifiers."
                .to_string(),
            input_schema: search_schema("date of birth"),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        run_search(&self.facade, IdKind::Property, &input, context).await
    }
}
