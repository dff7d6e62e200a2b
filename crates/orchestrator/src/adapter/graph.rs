//! Graph adapter: question text → [`GraphPattern`] → paths.

use super::{elapsed_ms, RetrieverAdapter};
use crate::error::RetrievalError;
use crate::text::{contains_phrase, find_phrase};
use crate::types::{
    Capability, Provenance, Record, RecordContent, RetrievalResult, RetrievalStatus, SourceType,
    SubQuery,
};
use async_trait::async_trait;
use compass_knowledge::{GraphPath, GraphPattern, GraphSchema, GraphStore, NodeSelector};
use std::sync::Arc;
use std::time::Instant;

/// Keyword translator over the graph vocabulary.
#[derive(Debug, Clone)]
pub struct GraphTranslator {
    schema: GraphSchema,
    max_hops: usize,
    max_paths: usize,
}

impl GraphTranslator {
    pub fn new(schema: GraphSchema, max_hops: usize, max_paths: usize) -> Self {
        Self {
            schema,
            max_hops,
            max_paths,
        }
    }

    /// Build a path pattern from the labels, relations, properties and node
    /// names the question mentions.
    ///
    /// Named nodes (or bound values) become the start and mentioned labels the
    /// target. Without names, the first label mentioned starts the path and
    /// the remaining labels are the target.
    pub fn translate(&self, sub_query: &SubQuery) -> Result<GraphPattern, String> {
        let text = sub_query.text.as_str();

        let mut labels: Vec<(usize, String)> = self
            .schema
            .labels
            .iter()
            .filter_map(|label| find_phrase(text, label).map(|pos| (pos, label.clone())))
            .collect();
        labels.sort();

        let relations: Vec<String> = self
            .schema
            .relations
            .iter()
            .filter(|relation| {
                let spoken = relation.to_lowercase().replace('_', " ");
                contains_phrase(text, &spoken)
            })
            .cloned()
            .collect();

        // (position, key, value); an adjective qualifies the label that follows it.
        let mut properties: Vec<(usize, String, String)> = Vec::new();
        for (key, values) in &self.schema.properties {
            let is_flag = values.iter().all(|v| v == "true" || v == "false");
            if is_flag {
                if let Some(pos) = find_phrase(text, &key.replace('_', " ")) {
                    properties.push((pos, key.clone(), "true".to_string()));
                }
                continue;
            }
            for value in values.iter().filter(|v| v.chars().count() >= 3) {
                if let Some(pos) = find_phrase(text, &value.replace(['-', '_'], " ")) {
                    properties.push((pos, key.clone(), value.clone()));
                }
            }
        }
        properties.sort();

        let owner_of = |pos: usize| -> Option<usize> {
            labels
                .iter()
                .position(|(label_pos, _)| *label_pos > pos)
                .or_else(|| labels.len().checked_sub(1))
        };
        let properties_of = |label_indices: std::ops::Range<usize>| -> Vec<(String, String)> {
            properties
                .iter()
                .filter(|(pos, _, _)| owner_of(*pos).is_some_and(|i| label_indices.contains(&i)))
                .map(|(_, key, value)| (key.clone(), value.clone()))
                .collect()
        };

        let mut names: Vec<String> = self
            .schema
            .node_names
            .iter()
            .filter(|name| contains_phrase(text, name))
            .cloned()
            .collect();
        for value in &sub_query.bound_values {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(value)) {
                names.push(value.clone());
            }
        }

        let label_names: Vec<String> = labels.iter().map(|(_, label)| label.clone()).collect();

        let (start, target) = if !names.is_empty() {
            let target = (!label_names.is_empty()).then(|| NodeSelector {
                labels: label_names.clone(),
                properties: properties_of(0..label_names.len()),
                ..NodeSelector::default()
            });
            (
                NodeSelector {
                    names,
                    ..NodeSelector::default()
                },
                target,
            )
        } else if let Some((first, rest)) = label_names.split_first() {
            let target = (!rest.is_empty()).then(|| NodeSelector {
                labels: rest.to_vec(),
                properties: properties_of(1..label_names.len()),
                ..NodeSelector::default()
            });
            (
                NodeSelector {
                    labels: vec![first.clone()],
                    properties: properties_of(0..1),
                    ..NodeSelector::default()
                },
                target,
            )
        } else if !properties.is_empty() {
            (
                NodeSelector {
                    properties: properties
                        .iter()
                        .map(|(_, key, value)| (key.clone(), value.clone()))
                        .collect(),
                    ..NodeSelector::default()
                },
                None,
            )
        } else {
            return Err("no graph labels, properties or node names are mentioned".to_string());
        };

        Ok(GraphPattern {
            start,
            target,
            relations,
            max_hops: self.max_hops,
            max_paths: self.max_paths,
        })
    }
}

/// Citation locator of a path: alternating node and edge ids.
fn path_locator(path: &GraphPath) -> String {
    let mut parts = Vec::with_capacity(path.nodes.len() + path.edges.len());
    for (i, node) in path.nodes.iter().enumerate() {
        if let Some(edge) = i.checked_sub(1).and_then(|e| path.edges.get(e)) {
            parts.push(edge.id.clone());
        }
        parts.push(node.id.clone());
    }
    format!("path:{}", parts.join("/"))
}

/// Adapter over a [`GraphStore`].
pub struct GraphAdapter {
    name: String,
    store: Arc<dyn GraphStore>,
    translator: GraphTranslator,
}

impl GraphAdapter {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn GraphStore>,
        max_hops: usize,
        max_paths: usize,
    ) -> Self {
        let translator = GraphTranslator::new(store.schema(), max_hops, max_paths);
        Self {
            name: name.into(),
            store,
            translator,
        }
    }
}

#[async_trait]
impl RetrieverAdapter for GraphAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Graph
    }

    async fn retrieve(&self, sub_query: &SubQuery) -> Result<RetrievalResult, RetrievalError> {
        let start = Instant::now();

        let pattern = self
            .translator
            .translate(sub_query)
            .map_err(|message| RetrievalError::Translation {
                tool: self.name.clone(),
                message,
            })?;

        tracing::debug!(tool = %self.name, ?pattern, "Executing graph pattern");

        let search = self
            .store
            .find_paths(&pattern)
            .map_err(|e| RetrievalError::Backend {
                tool: self.name.clone(),
                message: e.to_string(),
            })?;

        let records = search
            .paths
            .into_iter()
            .filter_map(|path| {
                let first = path.nodes.first()?.id.clone();
                Some(Record {
                    provenance: Provenance::new(first, SourceType::Graph, path_locator(&path)),
                    native_score: path.hops() as f32,
                    content: RecordContent::GraphPath { path },
                })
            })
            .collect();

        Ok(RetrievalResult {
            tool: self.name.clone(),
            capability: Capability::Graph,
            records,
            latency_ms: elapsed_ms(start),
            status: if search.truncated {
                RetrievalStatus::Partial
            } else {
                RetrievalStatus::Ok
            },
        })
    }
}
