//! Compass Core Library
//!
//! This crate provides the foundational utilities shared by every Compass crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management (including the orchestration settings)

pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::{AppConfig, OrchestrationConfig, ToolConfig};
pub use error::{AppError, AppResult};
