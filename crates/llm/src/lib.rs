//! Generative backend integration for Compass.
//!
//! This crate provides a provider-agnostic abstraction for the model that
//! turns fused evidence into answer text. Providers implement the
//! [`LlmClient`] trait and are created through [`create_client`].
//!
//! # Providers
//! - **Ollama**: Local LLM runtime over HTTP
//! - **Extractive**: Deterministic offline generator that quotes the
//!   evidence it is given (default; used by tests and air-gapped installs)
//!
//! # Example
//! ```no_run
//! use compass_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod types;

// Re-export main types
pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::create_client;
pub use providers::{ExtractiveClient, OllamaClient};
pub use types::ProviderType;
