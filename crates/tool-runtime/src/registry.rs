use std::collections::BTreeMap;
use std::sync::Arc;

use crate::tool::{Tool, ToolDefinition};

/// Longest tool name MCP clients reliably accept.
pub const MAX_TOOL_NAME: usize = 64;

struct Entry {
    definition: ToolDefinition,
    tool: Arc<dyn Tool>,
}

/// Name-keyed tool table. Definitions are captured once at registration and
/// listed in name order, so `tools/list` is stable across calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let definition = tool.definition();
        validate_name(&definition.name)?;
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }
        self.tools.insert(
            definition.name.clone(),
            Entry {
                definition,
                tool: Arc::new(tool),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| e.tool.clone())
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|e| e.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let well_formed = !name.is_empty()
        && name.len() <= MAX_TOOL_NAME
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),

    #[error("Tool name '{0}' must be 1-64 characters of [A-Za-z0-9_-]")]
    InvalidName(String),
}
