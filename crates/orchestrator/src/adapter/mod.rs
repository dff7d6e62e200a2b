//! Retriever adapters: one uniform contract over each backend.
//!
//! Adapters are read-only and idempotent. They never retry or time out on
//! their own; the executor owns both.

pub mod graph;
pub mod semantic;
pub mod structured;

pub use graph::{GraphAdapter, GraphTranslator};
pub use semantic::SemanticAdapter;
pub use structured::{StructuredAdapter, StructuredTranslator};

use crate::error::RetrievalError;
use crate::types::{Capability, RetrievalResult, SubQuery};
use async_trait::async_trait;
use std::time::Instant;

/// Uniform interface over one retrieval backend.
#[async_trait]
pub trait RetrieverAdapter: Send + Sync {
    /// Registered tool name.
    fn name(&self) -> &str;

    fn capability(&self) -> Capability;

    /// Run one sub-query against the backend.
    async fn retrieve(&self, sub_query: &SubQuery) -> Result<RetrievalResult, RetrievalError>;
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
