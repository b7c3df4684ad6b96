//! Wiring: one transport, one facade, one registry, one MCP server.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use kg_core::Config;
use kg_mcp::McpServer;
use kg_sparql::HttpTransport;
use kg_tool_runtime::{register_all, ToolFacade, ToolRegistry};

/// Build the facade over a real HTTP transport.
pub fn build_facade(config: &Config) -> anyhow::Result<Arc<ToolFacade>> {
    let transport = HttpTransport::new(&config.endpoint).context("failed to build HTTP client")?;
    let facade = ToolFacade::from_config(config, Arc::new(transport)).context("failed to build query linter")?;
    Ok(Arc::new(facade))
}

/// Register every tool and wrap the registry in an MCP server.
pub fn build_server(config: &Config, facade: Arc<ToolFacade>) -> anyhow::Result<McpServer> {
    let mut registry = ToolRegistry::new();
    register_all(&mut registry, facade).context("failed to register tools")?;
    let server = McpServer::new(registry).with_tool_timeout(config.server.tool_timeout());
    info!(
        tools = ?server.tool_names(),
        tool_timeout_secs = config.server.tool_timeout_secs,
        "Tool registry ready"
    );
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_server_registers_every_tool() {
        let config = Config::default();
        let facade = build_facade(&config).unwrap();
        let server = build_server(&config, facade).unwrap();
        assert_eq!(server.tool_names().len(), 6);
        assert!(server.tool_names().contains(&"run_query".to_string()));
    }
}
