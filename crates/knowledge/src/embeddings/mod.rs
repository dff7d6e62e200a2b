//! Embedding generation for the semantic index.

pub mod provider;
pub mod trigram;

pub use provider::{create_provider, EmbeddingProvider};
pub use trigram::TrigramEmbedder;
