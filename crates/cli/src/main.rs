//! Relay CLI
//!
//! Main entry point for the relay command-line tool.
//! Classifies, routes and retrieves knowledge for chatbots described in a
//! workspace catalog, and assembles conversation prompts.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{ChatCommand, ClassifyCommand, IndexCommand, RetrieveCommand, RouteCommand};
use relay_core::{config::AppConfig, logging};
use std::path::PathBuf;

/// Relay CLI - knowledge routing and retrieval for chatbots
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Knowledge routing and retrieval for chatbots", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "RELAY_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Catalog file describing chatbots and collections
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify a query as structured, semantic, hybrid or unknown
    Classify(ClassifyCommand),

    /// Show which collections a chatbot would search for a query
    Route(RouteCommand),

    /// Retrieve formatted knowledge context for a query
    Retrieve(RetrieveCommand),

    /// Run one conversation turn and print the assembled prompt
    Chat(ChatCommand),

    /// Embed the catalog into the workspace's persistent index
    Index(IndexCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Classify(_) => "classify",
            Commands::Route(_) => "route",
            Commands::Retrieve(_) => "retrieve",
            Commands::Chat(_) => "chat",
            Commands::Index(_) => "index",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The --config file replaces the YAML layer; environment variables still
    // apply on top of it
    let config = AppConfig::load_from(cli.config.clone())
        .context("Failed to load configuration")?;

    let config = config.with_overrides(
        cli.workspace,
        cli.catalog,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );
    config.validate()?;

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_json)?;

    tracing::info!("Relay CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!(
        "Embedding: {} ({})",
        config.embedding.provider,
        config.embedding.model
    );

    let command_name = cli.command.name();
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Classify(cmd) => cmd.execute(),
        Commands::Route(cmd) => cmd.execute(&config).await,
        Commands::Retrieve(cmd) => cmd.execute(&config).await,
        Commands::Chat(cmd) => cmd.execute(&config).await,
        Commands::Index(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(()) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!(category = ?e.category(), "Command failed: {}", e),
    }

    result.with_context(|| format!("relay {} failed", command_name))
}
