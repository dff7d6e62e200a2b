//! Prompt system for Compass.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt definitions, overridable per workspace
//! - Built-in defaults for the prompts the orchestrator needs
//! - Handlebars template rendering over JSON variables

pub mod builder;
pub mod builtin;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_prompt;
pub use builtin::{builtin_prompt, GROUNDED_ANSWER_PROMPT_ID};
pub use loader::{load_prompt, resolve_prompt};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptBehavior, PromptDefinition, PromptOutputSpec};
