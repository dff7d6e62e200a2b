//! Compass CLI
//!
//! Main entry point for the `compass` command-line tool.
//! Answers questions across structured tables, documents and the
//! relationship graph, with citations back to each source.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{AskCommand, FeedbackCommand, PlanCommand, ToolsCommand};
use compass_core::{config::AppConfig, logging};
use std::path::PathBuf;

/// Compass - cited answers over enterprise knowledge sources
#[derive(Parser, Debug)]
#[command(name = "compass")]
#[command(about = "Cited answers over enterprise tables, documents and graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "COMPASS_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "COMPASS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Generative backend provider (extractive, ollama)
    #[arg(short, long, global = true, env = "COMPASS_PROVIDER")]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long, global = true, env = "COMPASS_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a question and get a cited answer
    Ask(AskCommand),

    /// Show the retrieval plan for a question
    Plan(PlanCommand),

    /// List the registered retrieval tools
    Tools(ToolsCommand),

    /// Rate a saved answer
    Feedback(FeedbackCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // The workspace decides where the config file lives, so it goes in before loading
    let config = AppConfig::load_from(cli.workspace.clone(), cli.config.clone())
        .context("Failed to load configuration")?;

    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.log_json,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_json)?;

    tracing::info!("Compass CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {}", config.provider);
    tracing::debug!("Model: {}", config.model);

    config.ensure_compass_dir()?;

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Plan(_) => "plan",
        Commands::Tools(_) => "tools",
        Commands::Feedback(_) => "feedback",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Plan(cmd) => cmd.execute(&config).await,
        Commands::Tools(cmd) => cmd.execute(&config).await,
        Commands::Feedback(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result.with_context(|| format!("compass {} failed", command_name))
}
