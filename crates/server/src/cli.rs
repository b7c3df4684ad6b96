//! CLI argument parsing.

use clap::{Parser, Subcommand, ValueEnum};

/// SPARQL knowledge-graph tool gateway for LLM agents.
#[derive(Parser, Debug)]
#[command(name = "kg-server", version, about = "SPARQL knowledge-graph tool gateway (MCP)")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the tools over MCP
    Serve {
        /// stdio for a spawned subprocess, http for a long-running service
        #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
        transport: TransportKind,

        /// Listen address for the http transport (default: HOST:PORT)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Lint a query without sending it anywhere ("-" reads stdin)
    Lint {
        query: String,

        /// Identifiers to treat as grounded, comma separated
        #[arg(long, value_delimiter = ',')]
        grounded: Vec<String>,

        /// Requested LIMIT, clamped to the configured maximum
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Check that the configured SPARQL endpoint answers
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Stdio,
    Http,
}
