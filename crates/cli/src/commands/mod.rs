//! Command handlers for the Compass CLI.

pub mod ask;
pub mod feedback;
pub mod plan;
pub mod tools;

pub use ask::AskCommand;
pub use feedback::FeedbackCommand;
pub use plan::PlanCommand;
pub use tools::ToolsCommand;

use compass_core::AppResult;
use compass_orchestrator::{OrchestrationError, Query, QueryFilters};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Build a query from the words of the question and `facet=value` filters.
pub(crate) fn build_query(words: &[String], filters: &[String]) -> AppResult<Query> {
    let filters = QueryFilters::parse_pairs(filters).map_err(OrchestrationError::from)?;
    let query = Query::with_filters(&words.join(" "), filters).map_err(OrchestrationError::from)?;
    Ok(query)
}

/// Cancel `token` when the user presses Ctrl-C.
pub(crate) fn cancel_on_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling the request");
            token.cancel();
        }
    })
}
