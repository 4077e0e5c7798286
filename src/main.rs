//! # Timesketch MCP server (`timesketch-mcp`)
//!
//! ## Usage
//!
//! ```bash
//! timesketch-mcp [--config ./timesketch-mcp.toml] [--mcp-host 0.0.0.0] [--mcp-port 8081] [serve|tools]
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `serve` (default) | Start the MCP / HTTP server |
//! | `tools` | Print the available tools and exit |
//!
//! Timesketch credentials come from `TIMESKETCH_HOST`, `TIMESKETCH_PORT`,
//! `TIMESKETCH_USER`, and `TIMESKETCH_PASSWORD`. They are read when the first
//! tool call needs the remote client, not at startup.
//!
//! Logs go to stderr; set `RUST_LOG` (e.g. `RUST_LOG=timesketch_mcp=debug`)
//! to change verbosity.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use timesketch_mcp::config;
use timesketch_mcp::server;
use timesketch_mcp::tools::ToolRegistry;

/// MCP tool server for Timesketch forensic timelines.
#[derive(Parser)]
#[command(
    name = "timesketch-mcp",
    about = "MCP tool server for investigating Timesketch forensic timelines",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides `[server].host`.
    #[arg(long, global = true)]
    mcp_host: Option<String>,

    /// Port to listen on. Overrides `[server].port`.
    #[arg(long, global = true)]
    mcp_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server (Streamable HTTP at `/mcp`; no legacy `/sse` endpoint).
    Serve,

    /// List the tools this server exposes.
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = config::load_or_default(cli.config.as_deref())?;
    if let Some(host) = cli.mcp_host {
        cfg.server.host = host;
    }
    if let Some(port) = cli.mcp_port {
        cfg.server.port = port;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Tools => {
            let registry = ToolRegistry::with_builtins();
            if registry.is_empty() {
                println!("No tools registered.");
                return Ok(());
            }
            println!("{:<38} DESCRIPTION", "TOOL");
            for t in registry.tools() {
                println!("{:<38} {}", t.name(), t.description());
            }
        }
    }

    Ok(())
}
