//! Read-only knowledge stores for Compass.
//!
//! Each store wraps one immutable snapshot published by the ingestion side:
//! - [`table::InMemoryTableStore`] answers structured queries over tables
//! - [`vector_index::InMemoryVectorIndex`] answers nearest-neighbour lookups over document chunks
//! - [`graph::InMemoryGraphStore`] answers path queries over the relationship graph
//!
//! Snapshots are loaded whole and parsed before they become visible, so a
//! store never observes a half-written generation.

pub mod document;
pub mod embeddings;
pub mod graph;
pub mod snapshot;
pub mod table;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use document::{Document, DocumentChunk, DocumentSnapshot};
pub use embeddings::{create_provider, EmbeddingProvider, TrigramEmbedder};
pub use graph::{
    GraphEdge, GraphNode, GraphPath, GraphPattern, GraphSchema, GraphSnapshot, GraphStore,
    InMemoryGraphStore, NodeSelector, PathSearch,
};
pub use snapshot::{load_snapshot, SnapshotSet};
pub use table::{
    ColumnKind, ColumnSchema, CompareOp, InMemoryTableStore, MatchedRow, OrderBy, Predicate,
    StructuredQuery, Table, TableQueryResult, TableSchema, TableSnapshot, TableStore,
};
pub use vector_index::{ChunkFilter, InMemoryVectorIndex, ScoredChunk, VectorIndex};
