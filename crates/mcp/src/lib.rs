//! MCP (Model Context Protocol) front end for the knowledge-graph tools.
//!
//! JSON-RPC 2.0 over two transports:
//!
//! - **stdio**: newline-delimited messages, driven by [`McpServer::run`]
//! - **http**: one message per `POST /mcp`, see [`http::serve`]
//!
//! # Usage
//!
//! ```no_run
//! use kg_mcp::{McpServer, StdioTransport};
//! use kg_tool_runtime::ToolRegistry;
//!
//! # async fn example() {
//! let server = McpServer::new(ToolRegistry::new());
//! let mut transport = StdioTransport::stdio();
//! server.run(&mut transport).await.unwrap();
//! # }
//! ```

pub mod error;
pub mod http;
pub mod server;
pub mod transport;
pub mod types;

pub use error::McpError;
pub use server::{parse_message, Incoming, McpServer};
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use types::*;
