//! Feedback command handler.
//!
//! Appends a rating for an answer saved earlier with `compass ask --json`.

use clap::Args;
use compass_core::{config::AppConfig, AppError, AppResult};
use compass_orchestrator::{Answer, FeedbackEntry, FeedbackSink, JsonlFeedbackSink, Rating};
use std::path::PathBuf;

/// Rate a saved answer
#[derive(Args, Debug)]
pub struct FeedbackCommand {
    /// Answer JSON written by `compass ask --json`
    #[arg(long, value_name = "FILE")]
    pub answer_file: PathBuf,

    /// helpful or not-helpful
    #[arg(long)]
    pub rating: Rating,
}

impl FeedbackCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing feedback command");

        let contents = std::fs::read_to_string(&self.answer_file).map_err(|e| {
            AppError::Feedback(format!("Failed to read {:?}: {}", self.answer_file, e))
        })?;
        let answer: Answer = serde_json::from_str(&contents)?;

        let sink = JsonlFeedbackSink::spawn(config.feedback_path());
        sink.submit(FeedbackEntry::from_answer(&answer, self.rating));
        sink.flush().await;

        println!(
            "Recorded '{}' for request {} in {}",
            self.rating,
            answer.request_id,
            sink.path().display()
        );
        Ok(())
    }
}
