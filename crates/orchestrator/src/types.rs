//! Domain types shared across the orchestration pipeline.

use crate::error::ValidationError;
use crate::text::normalize_whitespace;
use chrono::NaiveDate;
use compass_knowledge::table::value_text;
use compass_knowledge::GraphPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Longest accepted question, in bytes.
pub const MAX_QUERY_BYTES: usize = 10_000;

/// Retrieval capability of a tool.
///
/// Declaration order is the tie-break priority: most constrained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Structured,
    Graph,
    Semantic,
}

impl Capability {
    /// All capabilities in priority order.
    pub const ALL: [Capability; 3] = [Capability::Structured, Capability::Graph, Capability::Semantic];

    pub fn priority(self) -> usize {
        match self {
            Capability::Structured => 0,
            Capability::Graph => 1,
            Capability::Semantic => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "structured" | "sql" => Some(Capability::Structured),
            "graph" => Some(Capability::Graph),
            "semantic" | "vector" => Some(Capability::Semantic),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Structured => "structured",
            Capability::Graph => "graph",
            Capability::Semantic => "semantic",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facets that narrow retrieval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    /// Evidence scoring below this is dropped after fusion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,
    /// Facets without built-in meaning, kept for the audit trail
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl QueryFilters {
    /// Parse `facet=value` pairs such as `domain=finance` or `from=2024-01-01`.
    pub fn parse_pairs<I, S>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filters = Self::default();

        for pair in pairs {
            let pair = pair.as_ref();
            let (facet, value) = pair.split_once('=').ok_or_else(|| ValidationError::InvalidFilter {
                facet: pair.to_string(),
                message: "expected facet=value".to_string(),
            })?;
            let facet = facet.trim();
            let value = value.trim();

            let invalid = |message: &str| ValidationError::InvalidFilter {
                facet: facet.to_string(),
                message: message.to_string(),
            };
            let parse_date = |v: &str| {
                NaiveDate::parse_from_str(v, "%Y-%m-%d")
                    .map_err(|_| invalid("expected a YYYY-MM-DD date"))
            };

            match facet.to_lowercase().replace('-', "_").as_str() {
                "domain" => filters.domain = Some(value.to_string()),
                "date_from" | "datefrom" | "from" => filters.date_from = Some(parse_date(value)?),
                "date_to" | "dateto" | "to" => filters.date_to = Some(parse_date(value)?),
                "min_confidence" | "minconfidence" | "confidence" => {
                    let threshold: f32 = value
                        .parse()
                        .map_err(|_| invalid("expected a number between 0 and 1"))?;
                    if !(0.0..=1.0).contains(&threshold) {
                        return Err(invalid("expected a number between 0 and 1"));
                    }
                    filters.min_confidence = Some(threshold);
                }
                _ => {
                    filters.extra.insert(facet.to_string(), value.to_string());
                }
            }
        }

        if let (Some(from), Some(to)) = (filters.date_from, filters.date_to) {
            if from > to {
                return Err(ValidationError::InvalidFilter {
                    facet: "date".to_string(),
                    message: format!("range starts after it ends ({} > {})", from, to),
                });
            }
        }

        Ok(filters)
    }
}

/// A question as issued by a caller. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    text: String,
    filters: QueryFilters,
    request_id: String,
}

impl Query {
    /// Normalize whitespace and assign a fresh request id.
    pub fn new(text: &str) -> Result<Self, ValidationError> {
        Self::with_request_id(text, QueryFilters::default(), uuid::Uuid::new_v4().to_string())
    }

    pub fn with_filters(text: &str, filters: QueryFilters) -> Result<Self, ValidationError> {
        Self::with_request_id(text, filters, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(
        text: &str,
        filters: QueryFilters,
        request_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let text = normalize_whitespace(text);
        if text.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        if text.len() > MAX_QUERY_BYTES {
            return Err(ValidationError::QueryTooLong {
                len: text.len(),
                max: MAX_QUERY_BYTES,
            });
        }

        Ok(Self {
            text,
            filters,
            request_id: request_id.into(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn filters(&self) -> &QueryFilters {
        &self.filters
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Table,
    Document,
    Graph,
}

/// Where a piece of evidence came from. `(source_id, locator)` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source_id: String,
    pub source_type: SourceType,
    pub locator: String,
}

impl Provenance {
    pub fn new(source_id: impl Into<String>, source_type: SourceType, locator: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_type,
            locator: locator.into(),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.source_id, &self.locator)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source_id, self.locator)
    }
}

/// Backend-specific payload of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecordContent {
    Row {
        table: String,
        key: String,
        values: BTreeMap<String, Value>,
    },
    Passage {
        title: String,
        text: String,
    },
    GraphPath {
        path: GraphPath,
    },
}

/// One retrieved item with its provenance and the backend's own score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub provenance: Provenance,
    pub content: RecordContent,
    /// Unnormalized score as reported by the backend
    pub native_score: f32,
}

impl Record {
    /// Values of `field`, used to bind a downstream step.
    ///
    /// Rows expose their columns. Passages expose `title` and `id`. Graph
    /// paths expose node `name`s and `id`s along the path.
    pub fn field_values(&self, field: &str) -> Vec<String> {
        match &self.content {
            RecordContent::Row { values, key, .. } => match values.get(field) {
                Some(value) => vec![value_text(value)],
                None if field == "key" => vec![key.clone()],
                None => Vec::new(),
            },
            RecordContent::Passage { title, .. } => match field {
                "title" | "name" => vec![title.clone()],
                "id" => vec![self.provenance.source_id.clone()],
                _ => Vec::new(),
            },
            RecordContent::GraphPath { path } => match field {
                "name" => path.nodes.iter().map(|n| n.name.clone()).collect(),
                "id" => path.nodes.iter().map(|n| n.id.clone()).collect(),
                _ => Vec::new(),
            },
        }
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect()
    }

    /// Single-line rendering used as grounding context.
    pub fn summary_text(&self) -> String {
        match &self.content {
            RecordContent::Row { values, .. } => values
                .iter()
                .map(|(column, value)| format!("{}: {}", column, value_text(value)))
                .collect::<Vec<_>>()
                .join("; "),
            RecordContent::Passage { text, .. } => normalize_whitespace(text),
            RecordContent::GraphPath { path } => path.describe(),
        }
    }

    /// Short label naming the record, e.g. `customers row:3`.
    pub fn label(&self) -> String {
        match &self.content {
            RecordContent::Passage { title, .. } if !title.is_empty() => {
                format!("{} ({}) {}", self.provenance.source_id, title, self.provenance.locator)
            }
            _ => self.provenance.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalStatus {
    Ok,
    /// Results were cut off by a configured cap
    Partial,
    Failed,
}

/// Output of one adapter call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub tool: String,
    pub capability: Capability,
    pub records: Vec<Record>,
    pub latency_ms: u64,
    pub status: RetrievalStatus,
}

impl RetrievalResult {
    pub fn failed(tool: impl Into<String>, capability: Capability, latency_ms: u64) -> Self {
        Self {
            tool: tool.into(),
            capability,
            records: Vec::new(),
            latency_ms,
            status: RetrievalStatus::Failed,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.status, RetrievalStatus::Ok | RetrievalStatus::Partial)
    }
}

/// Input handed to an adapter for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
    pub text: String,
    /// Values produced by an upstream step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bound_values: Vec<String>,
    #[serde(default)]
    pub filters: QueryFilters,
}

impl SubQuery {
    pub fn literal(text: impl Into<String>, filters: QueryFilters) -> Self {
        Self {
            text: text.into(),
            bound_values: Vec::new(),
            filters,
        }
    }
}
