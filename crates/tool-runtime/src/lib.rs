pub mod facade;
pub mod registry;
pub mod testing;
pub mod tool;
pub mod tools;

pub use facade::{QueryFailure, QueryOutput, SchemaContext, SearchResponse, ToolFacade, MAX_REPAIRS};
pub use registry::{RegistryError, ToolRegistry};
pub use tool::{failure_payload, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
pub use tools::register_all;
