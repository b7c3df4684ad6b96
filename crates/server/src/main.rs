mod cli;
mod startup;

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::info;

use kg_core::Config;
use kg_mcp::StdioTransport;

use crate::cli::{CliArgs, Command, TransportKind};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries MCP frames in stdio mode, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    kg_core::config::load_dotenv();
    let config = Config::from_env().context("invalid configuration")?;

    match args.command {
        Command::Serve { transport, addr } => serve(&config, transport, addr).await,
        Command::Lint { query, grounded, limit } => lint(&config, &query, grounded, limit).await,
        Command::Ping => ping(&config).await,
    }
}

async fn serve(config: &Config, transport: TransportKind, addr: Option<String>) -> Result<()> {
    config.log_summary();
    let facade = startup::build_facade(config)?;
    let server = startup::build_server(config, facade)?;

    match transport {
        TransportKind::Stdio => {
            info!("Serving MCP over stdio");
            let mut stdio = StdioTransport::stdio();
            server.run(&mut stdio).await.context("stdio transport failed")?;
        }
        TransportKind::Http => {
            let addr = addr.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));
            kg_mcp::http::serve(server, &addr, &config.server.cors_origin)
                .await
                .with_context(|| format!("HTTP transport on {addr} failed"))?;
        }
    }
    Ok(())
}

async fn lint(config: &Config, query: &str, grounded: Vec<String>, limit: Option<u32>) -> Result<()> {
    let text = if query == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read query from stdin")?;
        buf
    } else {
        query.to_string()
    };

    let facade = startup::build_facade(config)?;
    let grounded: HashSet<String> = grounded.iter().map(|id| id.trim().to_uppercase()).collect();
    let verdict = facade
        .linter()
        .lint_with_cap(&text, &grounded, config.query.effective_cap(limit));

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if !verdict.passed {
        bail!("query rejected with {} violation(s)", verdict.violations.len());
    }
    Ok(())
}

async fn ping(config: &Config) -> Result<()> {
    let facade = startup::build_facade(config)?;
    let report = facade.debug_ping().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.reachable {
        bail!("{} is not reachable", report.endpoint);
    }
    Ok(())
}
