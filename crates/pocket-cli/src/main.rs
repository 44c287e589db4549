//! `pocket` - talk to the wallet agent from a terminal
//!
//! ```text
//! pocket wallet-server.js dex-server.py
//! ```
//!
//! Each script is spawned as an MCP tool server; their tools are merged
//! into one catalog for the model.

mod command;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use crossterm::style::Stylize;
use pocket_core::config::Settings;
use pocket_core::{Orchestrator, ProviderEndpoint, ProviderRegistry};
use pocket_runtime::{AnthropicProvider, McpConnector};
use pocket_wallet::{wallet_profile, BASE_PROMPT};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pocket", about = "Send Pocket - Solana wallet agent over MCP tool servers", version)]
struct Cli {
    /// MCP server scripts (.js or .py)
    scripts: Vec<PathBuf>,

    /// Settings file (TOML)
    #[arg(short, long, env = "POCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Stream answers as they are generated
    #[arg(long)]
    stream: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if cli.stream {
        settings.streaming = true;
    }

    let llm = AnthropicProvider::from_env()?;

    let mut endpoints = settings.providers.clone();
    for script in &cli.scripts {
        match ProviderEndpoint::from_script(script) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => eprintln!("{} {}", "Skipping:".yellow(), e),
        }
    }
    if endpoints.is_empty() {
        anyhow::bail!("no tool servers given. Usage: pocket <server-script.js|.py>...");
    }

    let mut registry = ProviderRegistry::new();
    let connector = McpConnector::new().with_call_timeout(settings.tool_timeout());
    let report = registry.register_all(&connector, &endpoints).await;

    for name in &report.connected {
        println!("{} {}", "Connected:".green(), name);
    }
    for (name, reason) in &report.failed {
        eprintln!("{} {} ({})", "Failed to connect:".red(), name, reason);
    }
    if registry.is_empty() {
        anyhow::bail!("none of the {} tool servers could be connected", endpoints.len());
    }

    let profile = wallet_profile()?.with_enrichment(settings.enrichment.iter().cloned());
    let orch = Orchestrator::new(Arc::new(llm), Arc::new(registry), Arc::new(profile), &settings, BASE_PROMPT);

    let result = repl::run(&orch).await;
    orch.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scripts_and_flags() {
        let cli = Cli::try_parse_from(["pocket", "wallet.js", "dex.py", "--stream", "-v"]).unwrap();
        assert_eq!(cli.scripts, vec![PathBuf::from("wallet.js"), PathBuf::from("dex.py")]);
        assert!(cli.stream);
        assert!(cli.verbose);
    }

    #[test]
    fn test_config_flag() {
        let cli = Cli::try_parse_from(["pocket", "--config", "pocket.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("pocket.toml")));
        assert!(cli.scripts.is_empty());
    }
}
