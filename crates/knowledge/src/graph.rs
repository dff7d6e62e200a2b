//! Relationship graph store.

use crate::table::value_text;
use compass_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub relation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// Vocabulary of the graph, used to translate questions into patterns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSchema {
    pub labels: Vec<String>,
    pub relations: Vec<String>,
    /// Property key → distinct values rendered as text
    pub properties: BTreeMap<String, Vec<String>>,
    pub node_names: Vec<String>,
}

/// Which nodes a pattern end may bind to. Empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSelector {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub properties: Vec<(String, String)>,
}

impl NodeSelector {
    pub fn is_unconstrained(&self) -> bool {
        self.labels.is_empty() && self.names.is_empty() && self.properties.is_empty()
    }

    pub fn matches(&self, node: &GraphNode) -> bool {
        let label_ok =
            self.labels.is_empty() || self.labels.iter().any(|l| l.eq_ignore_ascii_case(&node.label));
        let name_ok =
            self.names.is_empty() || self.names.iter().any(|n| n.eq_ignore_ascii_case(&node.name));
        let props_ok = self.properties.iter().all(|(key, wanted)| {
            node.properties
                .get(key)
                .is_some_and(|v| value_text(v).eq_ignore_ascii_case(wanted))
        });
        label_ok && name_ok && props_ok
    }
}

/// A path query: paths from any `start` node to any `target` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPattern {
    pub start: NodeSelector,
    /// `None` returns every node reachable within `max_hops`
    pub target: Option<NodeSelector>,
    /// Allowed relations; empty allows all
    #[serde(default)]
    pub relations: Vec<String>,
    pub max_hops: usize,
    pub max_paths: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphPath {
    pub fn hops(&self) -> usize {
        self.edges.len()
    }

    /// Human-readable rendering, e.g. `Vendor A -[SUPPLIES]- Contract B`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                if let Some(edge) = self.edges.get(i - 1) {
                    out.push_str(&format!(" -[{}]- ", edge.relation));
                }
            }
            out.push_str(&format!("{} ({})", node.name, node.label));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathSearch {
    pub paths: Vec<GraphPath>,
    /// Enumeration stopped at `max_paths`
    pub truncated: bool,
}

/// Read-only access to the relationship graph.
pub trait GraphStore: Send + Sync {
    fn schema(&self) -> GraphSchema;

    /// Find shortest paths matching `pattern`.
    ///
    /// Traversal is breadth-first and undirected. Results are ordered by
    /// start node id, hop count, then target node id.
    fn find_paths(&self, pattern: &GraphPattern) -> AppResult<PathSearch>;
}

/// Graph store over an in-memory snapshot.
#[derive(Debug, Clone)]
pub struct InMemoryGraphStore {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    /// node id → (edge index, neighbour id), sorted by edge id
    adjacency: HashMap<String, Vec<(usize, String)>>,
    schema: GraphSchema,
}

impl InMemoryGraphStore {
    pub fn new(snapshot: GraphSnapshot) -> Self {
        let nodes: BTreeMap<String, GraphNode> = snapshot
            .nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();

        let mut edges = snapshot.edges;
        edges.sort_by(|a, b| a.id.cmp(&b.id));

        let mut adjacency: HashMap<String, Vec<(usize, String)>> = HashMap::new();
        for (index, edge) in edges.iter().enumerate() {
            if !nodes.contains_key(&edge.from) || !nodes.contains_key(&edge.to) {
                tracing::warn!("Skipping edge {} with a dangling endpoint", edge.id);
                continue;
            }
            adjacency
                .entry(edge.from.clone())
                .or_default()
                .push((index, edge.to.clone()));
            adjacency
                .entry(edge.to.clone())
                .or_default()
                .push((index, edge.from.clone()));
        }

        let schema = build_schema(&nodes, &edges);

        Self {
            nodes,
            edges,
            adjacency,
            schema,
        }
    }

    fn relation_allowed(&self, pattern: &GraphPattern, edge: &GraphEdge) -> bool {
        pattern.relations.is_empty()
            || pattern
                .relations
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&edge.relation))
    }

    /// Shortest paths from one start node, in discovery order.
    fn paths_from(&self, start: &str, pattern: &GraphPattern) -> Vec<(usize, String, Vec<usize>)> {
        let mut found = Vec::new();
        let mut visited: HashSet<&str> = HashSet::from([start]);
        // (node, edge indices from start)
        let mut queue: VecDeque<(&str, Vec<usize>)> = VecDeque::from([(start, Vec::new())]);

        while let Some((node_id, trail)) = queue.pop_front() {
            if trail.len() >= pattern.max_hops {
                continue;
            }
            let Some(neighbours) = self.adjacency.get(node_id) else {
                continue;
            };

            for (edge_index, neighbour) in neighbours {
                if visited.contains(neighbour.as_str())
                    || !self.relation_allowed(pattern, &self.edges[*edge_index])
                {
                    continue;
                }
                visited.insert(neighbour.as_str());

                let mut next_trail = trail.clone();
                next_trail.push(*edge_index);

                let is_target = match (&pattern.target, self.nodes.get(neighbour)) {
                    (Some(selector), Some(node)) => selector.matches(node),
                    (None, Some(_)) => true,
                    _ => false,
                };
                if is_target {
                    found.push((next_trail.len(), neighbour.clone(), next_trail.clone()));
                }

                queue.push_back((neighbour.as_str(), next_trail));
            }
        }

        found
    }

    fn materialize(&self, start: &str, trail: &[usize]) -> Option<GraphPath> {
        let mut nodes = vec![self.nodes.get(start)?.clone()];
        let mut edges = Vec::with_capacity(trail.len());
        let mut current = start.to_string();

        for &edge_index in trail {
            let edge = self.edges.get(edge_index)?;
            let next = if edge.from == current {
                &edge.to
            } else {
                &edge.from
            };
            nodes.push(self.nodes.get(next)?.clone());
            edges.push(edge.clone());
            current = next.clone();
        }

        Some(GraphPath { nodes, edges })
    }
}

fn build_schema(nodes: &BTreeMap<String, GraphNode>, edges: &[GraphEdge]) -> GraphSchema {
    let labels: BTreeSet<String> = nodes.values().map(|n| n.label.clone()).collect();
    let relations: BTreeSet<String> = edges.iter().map(|e| e.relation.clone()).collect();
    let node_names: BTreeSet<String> = nodes.values().map(|n| n.name.clone()).collect();

    let mut properties: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for node in nodes.values() {
        for (key, value) in &node.properties {
            if value.is_string() || value.is_boolean() {
                properties
                    .entry(key.clone())
                    .or_default()
                    .insert(value_text(value));
            }
        }
    }

    GraphSchema {
        labels: labels.into_iter().collect(),
        relations: relations.into_iter().collect(),
        properties: properties
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect(),
        node_names: node_names.into_iter().collect(),
    }
}

impl GraphStore for InMemoryGraphStore {
    fn schema(&self) -> GraphSchema {
        self.schema.clone()
    }

    fn find_paths(&self, pattern: &GraphPattern) -> AppResult<PathSearch> {
        if pattern.max_hops == 0 {
            return Err(AppError::Knowledge(
                "Graph pattern max_hops must be at least 1".to_string(),
            ));
        }

        let mut candidates: Vec<(String, usize, String, Vec<usize>)> = Vec::new();
        for (start_id, node) in &self.nodes {
            if !pattern.start.matches(node) {
                continue;
            }
            for (hops, target, trail) in self.paths_from(start_id, pattern) {
                candidates.push((start_id.clone(), hops, target, trail));
            }
        }
        candidates.sort_by(|a, b| (&a.0, a.1, &a.2).cmp(&(&b.0, b.1, &b.2)));

        // The same undirected path can be reached from either end.
        let mut seen: HashSet<Vec<usize>> = HashSet::new();
        let mut paths = Vec::new();
        let mut truncated = false;

        for (start, _, _, trail) in candidates {
            let mut key = trail.clone();
            key.sort_unstable();
            if !seen.insert(key) {
                continue;
            }
            if paths.len() == pattern.max_paths {
                truncated = true;
                break;
            }
            if let Some(path) = self.materialize(&start, &trail) {
                paths.push(path);
            }
        }

        Ok(PathSearch { paths, truncated })
    }
}
