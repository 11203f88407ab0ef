//! Uniquity MCP Server
//!
//! Wraps the `uniquity-reporter` CLI as an MCP tool.
//!
//! Usage:
//!   uniquity-mcp [--config PATH] [--reporter NAME] [--install-root DIR]
//!
//! The server communicates over stdio using JSON-RPC 2.0.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use uniquity_mcp::advisory::TracingAdvisories;
use uniquity_mcp::config::{parse_filter, ExecutableResolution};
use uniquity_mcp::protocol::ListToolsResult;
use uniquity_mcp::{Config, Dispatcher, McpServer, ProcessRunner};

#[derive(Parser)]
#[command(name = "uniquity-mcp")]
#[command(about = "MCP server exposing the Uniquity reporter as an analyze_repository tool")]
#[command(version)]
#[command(after_help = "\
Reads JSON-RPC 2.0 messages from stdin, one per line, and writes responses to
stdout. Logs go to stderr.

EXAMPLES:
    uniquity-mcp                                  # reporter from PATH
    uniquity-mcp --install-root /opt/uniquity     # /opt/uniquity/bin/uniquity-reporter
    uniquity-mcp --timeout 600 --log-filter debug
    uniquity-mcp --print-schema")]
struct Cli {
    /// Config file (JSON)
    #[arg(long, env = "UNIQUITY_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Reporter executable name
    #[arg(long)]
    reporter: Option<String>,

    /// Installation root; the reporter is run from <DIR>/bin
    #[arg(long, value_name = "DIR")]
    install_root: Option<PathBuf>,

    /// Kill the reporter after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log filter for this server, e.g. "info" or "uniquity_mcp=debug"
    #[arg(long)]
    log_filter: Option<String>,

    /// Print the tool discovery document and exit
    #[arg(long)]
    print_schema: bool,
}

impl Cli {
    /// Fold CLI overrides into the loaded config
    fn apply(&self, config: &mut Config) {
        let name = self
            .reporter
            .clone()
            .unwrap_or_else(|| config.executable.name().to_string());

        config.executable = match (&self.install_root, &config.executable) {
            (Some(root), _) => ExecutableResolution::InstallRoot {
                root: root.clone(),
                name,
            },
            (None, ExecutableResolution::InstallRoot { root, .. }) => {
                ExecutableResolution::InstallRoot {
                    root: root.clone(),
                    name,
                }
            }
            (None, ExecutableResolution::SearchPath { .. }) => {
                ExecutableResolution::SearchPath { name }
            }
        };

        if let Some(secs) = self.timeout {
            config.timeout_secs = Some(secs);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    // Initialize logging to stderr (stdout is for MCP protocol)
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = config
        .logging
        .resolve_filter(cli.log_filter.as_deref(), rust_log.as_deref());
    let (env_filter, rejected) = parse_filter(&filter);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    if let Some(e) = rejected {
        tracing::warn!("Ignoring log filter '{}' ({}), using 'info'", filter, e);
    }

    let dispatcher = Dispatcher::from_config(
        &config,
        ProcessRunner::inherit(config.timeout()),
        Arc::new(TracingAdvisories),
    );

    if cli.print_schema {
        let tools = ListToolsResult {
            tools: dispatcher.list_tools(),
        };
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    tracing::info!(
        "Starting Uniquity MCP server (reporter: {}, convention: {:?})",
        config.executable.program().display(),
        config.convention
    );
    config.executable.check_installed();

    let mut server = McpServer::new(dispatcher, config.shutdown_grace());
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
