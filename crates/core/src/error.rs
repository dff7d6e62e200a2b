//! Error types shared across the Compass workspace.
//!
//! This module defines a unified error enum for infrastructure concerns:
//! configuration, I/O, the generative backend, the knowledge stores,
//! prompts, orchestration plumbing and the feedback log.

use thiserror::Error;

/// Unified error type for Compass infrastructure.
///
/// Domain failures of the orchestration core (validation, retrieval,
/// plan execution) have their own typed enums in `compass-orchestrator`;
/// they wrap this type where an infrastructure failure is the cause.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generative backend errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Knowledge store errors (tables, vector index, graph)
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Orchestration wiring errors
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    /// Feedback log errors
    #[error("Feedback error: {0}")]
    Feedback(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_maps_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Serialization(_)));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::Knowledge("index unavailable".to_string());
        assert_eq!(err.to_string(), "Knowledge error: index unavailable");
    }
}
