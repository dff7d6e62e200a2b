//! Generative backend factory.
//!
//! Creates an [`LlmClient`] from the configured provider name.

use crate::client::LlmClient;
use crate::providers::{ExtractiveClient, OllamaClient};
use crate::types::ProviderType;
use compass_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Create an LLM client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("ollama", "extractive")
/// * `endpoint` - Optional custom endpoint URL (Ollama only)
/// * `timeout` - Optional request timeout (Ollama only)
///
/// # Errors
/// Returns `AppError::Config` if the provider is unknown or the HTTP client
/// cannot be built.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    timeout: Option<Duration>,
) -> AppResult<Arc<dyn LlmClient>> {
    match ProviderType::parse(provider) {
        Some(ProviderType::Ollama) => {
            let base_url = endpoint.unwrap_or("http://localhost:11434");
            let client = match timeout {
                Some(timeout) => OllamaClient::with_timeout(base_url, timeout)?,
                None => OllamaClient::with_base_url(base_url),
            };
            Ok(Arc::new(client))
        }
        Some(ProviderType::Extractive) => Ok(Arc::new(ExtractiveClient::new())),
        None => Err(AppError::Config(format!("Unknown provider: {}", provider))),
    }
}
