//! Error taxonomy of the orchestration core.
//!
//! Retrieval errors are contained at the step that raised them. Only
//! [`ValidationError`] and [`OrchestrationError::PlanExecutionFailed`] reach
//! the top of a request, and the orchestrator turns the latter into an
//! "insufficient evidence" answer.

use crate::executor::StepOutcome;
use compass_core::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure of one adapter call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    /// The question could not be mapped onto the backend's query language.
    #[error("{tool}: cannot translate query: {message}")]
    Translation { tool: String, message: String },

    /// Execution or connectivity failure in the backend.
    #[error("{tool}: backend error: {message}")]
    Backend { tool: String, message: String },

    #[error("{tool}: timed out after {after_ms} ms")]
    Timeout { tool: String, after_ms: u64 },
}

impl RetrievalError {
    /// Backend errors and timeouts get one retry; translation errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::Timeout { .. })
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Translation { .. } => FailureReason::Translation,
            Self::Backend { .. } => FailureReason::Backend,
            Self::Timeout { .. } => FailureReason::Timeout,
        }
    }
}

/// Rejected input or plan. Fatal for the request, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("query is {len} bytes, the limit is {max}")]
    QueryTooLong { len: usize, max: usize },

    #[error("invalid filter '{facet}': {message}")]
    InvalidFilter { facet: String, message: String },

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("step {step} references unregistered tool '{tool}'")]
    UnknownTool { step: usize, tool: String },

    #[error("step {step} is bound to step {target}, which does not run before it")]
    ForwardReference { step: usize, target: usize },

    #[error("plan chain depth {depth} exceeds the maximum of {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("plan has {steps} steps, the maximum is {max}")]
    TooManySteps { steps: usize, max: usize },

    #[error("no retrieval tools are registered")]
    NoTools,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool registered twice: {0}")]
    Duplicate(String),

    #[error("descriptor for '{name}' does not match its adapter")]
    AdapterMismatch { name: String },
}

/// Why a step produced no usable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Timeout,
    Backend,
    Translation,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Backend => "backend",
            FailureReason::Translation => "translation",
            FailureReason::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A failed step, as reported in [`OrchestrationError::PlanExecutionFailed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: usize,
    pub tool: String,
    pub reason: FailureReason,
    pub message: String,
    #[serde(default)]
    pub attempts: u32,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({}): {}: {}", self.step, self.tool, self.reason, self.message)
    }
}

fn join_failures(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// `steps` holds every outcome, skipped steps included.
    #[error("every step of the plan failed: {}", join_failures(.failures))]
    PlanExecutionFailed {
        failures: Vec<StepFailure>,
        steps: Vec<StepOutcome>,
    },

    #[error("request was cancelled")]
    Cancelled,

    #[error("answer synthesis failed: {0}")]
    Synthesis(#[source] AppError),
}

impl From<OrchestrationError> for AppError {
    fn from(err: OrchestrationError) -> Self {
        AppError::Orchestration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        let backend = RetrievalError::Backend {
            tool: "sql_query".to_string(),
            message: "connection reset".to_string(),
        };
        let timeout = RetrievalError::Timeout {
            tool: "vector_search".to_string(),
            after_ms: 5000,
        };
        let translation = RetrievalError::Translation {
            tool: "sql_query".to_string(),
            message: "unknown column profit".to_string(),
        };

        assert!(backend.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!translation.is_retryable());
        assert_eq!(timeout.reason(), FailureReason::Timeout);
        assert_eq!(timeout.to_string(), "vector_search: timed out after 5000 ms");
    }

    #[test]
    fn test_plan_execution_failed_lists_steps() {
        let err = OrchestrationError::PlanExecutionFailed {
            failures: vec![
                StepFailure {
                    step: 0,
                    tool: "sql_query".to_string(),
                    reason: FailureReason::Translation,
                    message: "no table".to_string(),
                    attempts: 1,
                },
                StepFailure {
                    step: 1,
                    tool: "vector_search".to_string(),
                    reason: FailureReason::Timeout,
                    message: "5000 ms".to_string(),
                    attempts: 2,
                },
            ],
            steps: Vec::new(),
        };

        let text = err.to_string();
        assert!(text.contains("step 0 (sql_query): translation: no table"));
        assert!(text.contains("step 1 (vector_search): timeout"));
    }

    #[test]
    fn test_into_app_error() {
        let err: AppError = OrchestrationError::Validation(ValidationError::EmptyPlan).into();
        assert!(matches!(err, AppError::Orchestration(_)));
    }
}
