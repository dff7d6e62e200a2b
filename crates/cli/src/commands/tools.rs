//! Tools command handler.

use clap::Args;
use compass_core::{config::AppConfig, AppResult};
use compass_orchestrator::build_orchestrator;

/// List the registered retrieval tools
#[derive(Args, Debug)]
pub struct ToolsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ToolsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing tools command");

        let orchestrator = build_orchestrator(config).await?;
        let tools = orchestrator.registry().list_all();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&tools)?);
            return Ok(());
        }

        if tools.is_empty() {
            println!(
                "No tools registered. Publish snapshots under {:?}.",
                config.compass_dir().join("data")
            );
            return Ok(());
        }

        for tool in tools {
            println!("{} ({}, cost {})", tool.name, tool.capability, tool.cost_hint);
            if !tool.description.is_empty() {
                println!("  {}", tool.description);
            }
            if !tool.keywords.is_empty() {
                println!("  keywords: {}", tool.keywords.join(", "));
            }
        }

        Ok(())
    }
}
