//! Agent-facing tools, one per Tool Facade operation.
//!
//! Every tool answers with JSON text. Classified failures come back as
//! `is_error` results carrying `{ok: false, error_code, hint}`.

pub mod diagnostics;
pub mod run_query;
pub mod schema_context;
pub mod search;

use std::sync::Arc;

use crate::facade::ToolFacade;
use crate::registry::{RegistryError, ToolRegistry};

pub use diagnostics::{DebugPingTool, NormalizeErrorTool};
pub use run_query::RunQueryTool;
pub use schema_context::SchemaContextTool;
pub use search::{SearchEntityTool, SearchPropertyTool};

/// Register every facade operation on `registry`.
pub fn register_all(registry: &mut ToolRegistry, facade: Arc<ToolFacade>) -> Result<(), RegistryError> {
    registry.register(SearchEntityTool::new(facade.clone()))?;
    registry.register(SearchPropertyTool::new(facade.clone()))?;
    registry.register(SchemaContextTool::new(facade.clone()))?;
    registry.register(RunQueryTool::new(facade.clone()))?;
    registry.register(NormalizeErrorTool::new(facade.clone()))?;
    registry.register(DebugPingTool::new(facade))?;
    Ok(())
}
