//! Snapshot loading.
//!
//! Ingestion publishes each snapshot as a complete JSON file. A snapshot is
//! read into memory and parsed in full before any store is built from it.

use crate::document::DocumentSnapshot;
use crate::graph::GraphSnapshot;
use crate::table::TableSnapshot;
use compass_core::{AppError, AppResult};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load one snapshot file.
///
/// A missing file yields the empty snapshot and a warning; an unreadable or
/// malformed file is an error.
pub fn load_snapshot<T>(path: &Path) -> AppResult<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::warn!("Snapshot not found, using an empty store: {:?}", path);
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(path)?;
    let snapshot = serde_json::from_str(&contents).map_err(|e| {
        AppError::Knowledge(format!("Failed to parse snapshot {:?}: {}", path, e))
    })?;

    tracing::debug!("Loaded snapshot {:?} ({} bytes)", path, contents.len());
    Ok(snapshot)
}

/// The three snapshots one orchestrator runtime is built from.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    pub tables: TableSnapshot,
    pub documents: DocumentSnapshot,
    pub graph: GraphSnapshot,
}

impl SnapshotSet {
    /// Load all three snapshots.
    pub fn load(tables: &Path, documents: &Path, graph: &Path) -> AppResult<Self> {
        let set = Self {
            tables: load_snapshot(tables)?,
            documents: load_snapshot(documents)?,
            graph: load_snapshot(graph)?,
        };

        tracing::info!(
            tables = set.tables.tables.len(),
            documents = set.documents.documents.len(),
            nodes = set.graph.nodes.len(),
            edges = set.graph.edges.len(),
            "Loaded knowledge snapshots"
        );

        Ok(set)
    }
}
