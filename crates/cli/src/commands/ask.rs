//! Ask command handler.
//!
//! Routes the question across the registered tools and prints the cited answer.

use super::{build_query, cancel_on_interrupt};
use clap::Args;
use compass_core::{config::AppConfig, AppResult};
use compass_orchestrator::{build_orchestrator, Answer, Rating, SkipReason, StepStatus};
use tokio_util::sync::CancellationToken;

/// Ask a question over the enterprise knowledge sources
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    #[arg(required = true, num_args = 1..)]
    pub question: Vec<String>,

    /// Retrieval filter as facet=value (domain, from, to, min_confidence); repeatable
    #[arg(short, long = "filter", value_name = "FACET=VALUE")]
    pub filters: Vec<String>,

    /// Output the full answer as JSON
    #[arg(long)]
    pub json: bool,

    /// Rate the answer right away (helpful, not-helpful)
    #[arg(long, value_name = "RATING")]
    pub rate: Option<Rating>,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        tracing::debug!("Ask command options: {:?}", self);

        let query = build_query(&self.question, &self.filters)?;
        let orchestrator = build_orchestrator(config).await?;

        let cancel = CancellationToken::new();
        let interrupt = cancel_on_interrupt(cancel.clone());
        let result = orchestrator.ask(&query, &cancel).await;
        interrupt.abort();
        let answer = result?;

        if let Some(rating) = self.rate {
            if orchestrator.rate(&answer.request_id, rating) {
                tracing::info!(request_id = %answer.request_id, %rating, "Rated answer");
            }
            orchestrator.feedback().flush().await;
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&answer)?);
        } else {
            print_answer(&answer);
        }

        Ok(())
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);

    if !answer.citations.is_empty() {
        println!("\nSources:");
        for citation in &answer.citations {
            let via = if citation.origins.len() > 1 {
                citation.origins.join(" + ")
            } else {
                citation.tool.clone()
            };
            println!(
                "  [{}] {} via {} (score {:.2})",
                citation.marker, citation.provenance, via, citation.score
            );
        }
    }

    println!("\nConfidence: {:.2}", answer.confidence);

    if answer.degraded {
        println!("\nSome steps did not complete; the answer may be incomplete:");
        for step in &answer.steps {
            match &step.status {
                StepStatus::Failed { reason, message } => {
                    println!("  {} failed ({}): {}", step.tool, reason, message)
                }
                StepStatus::Skipped { reason } => {
                    let upstream = match reason {
                        SkipReason::DependencyFailed { step } => format!("step {} failed", step + 1),
                        SkipReason::NoUpstreamValues { step } => {
                            format!("step {} returned nothing to bind", step + 1)
                        }
                    };
                    println!("  {} skipped: {}", step.tool, upstream)
                }
                _ => {}
            }
        }
    }

    if !answer.flags.is_empty() {
        println!("\nScreening flags:");
        for flag in &answer.flags {
            println!("  {:?}: {} ({})", flag.kind, flag.term, flag.source);
        }
    }

    println!("\nRequest: {}", answer.request_id);
}
