//! Plan command handler.

use super::build_query;
use clap::Args;
use compass_core::{config::AppConfig, AppResult};
use compass_orchestrator::{build_orchestrator, OrchestrationError};

/// Show how a question would be routed, without running it
#[derive(Args, Debug)]
pub struct PlanCommand {
    /// The question to plan
    #[arg(required = true, num_args = 1..)]
    pub question: Vec<String>,

    /// Output the plan as JSON
    #[arg(long)]
    pub json: bool,
}

impl PlanCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing plan command");

        let query = build_query(&self.question, &[])?;
        let orchestrator = build_orchestrator(config).await?;
        let plan = orchestrator.plan(&query).map_err(OrchestrationError::from)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            println!("{}", plan);
            println!("\n{} step(s), chain depth {}", plan.len(), plan.depth());
        }

        Ok(())
    }
}
