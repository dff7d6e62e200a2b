//! Vector index abstraction for document chunks.
//!
//! Defines a trait for provider-agnostic nearest-neighbour retrieval and an
//! in-memory implementation built from a [`DocumentSnapshot`].

use crate::document::{Document, DocumentChunk, DocumentSnapshot};
use crate::embeddings::EmbeddingProvider;
use chrono::NaiveDate;
use compass_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Restrictions applied to chunks before ranking.
///
/// Domain and date checks only apply to documents that carry those attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    pub domain: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Keep only chunks whose document or text mentions one of these values
    pub mentions_any: Vec<String>,
}

impl ChunkFilter {
    pub fn accepts(&self, document: &Document, chunk_text: &str) -> bool {
        if let (Some(wanted), Some(domain)) = (&self.domain, &document.domain) {
            if !wanted.eq_ignore_ascii_case(domain) {
                return false;
            }
        }

        if let Some(date) = document.date {
            if self.date_from.is_some_and(|from| date < from)
                || self.date_to.is_some_and(|to| date > to)
            {
                return false;
            }
        }

        self.mentions_any.is_empty()
            || self
                .mentions_any
                .iter()
                .any(|value| document.mentions(chunk_text, value))
    }
}

/// A chunk returned by a search, with its cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub doc_id: String,
    pub title: String,
    pub offset: usize,
    pub text: String,
    pub score: f32,
}

/// Trait for vector index backends.
pub trait VectorIndex: Send + Sync {
    /// Search for the top-k chunks most similar to `query_embedding`.
    ///
    /// Returns chunks ordered by descending similarity, ties broken by
    /// document id then chunk offset.
    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> AppResult<Vec<ScoredChunk>>;

    /// Number of indexed chunks.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct IndexedChunk {
    document: Arc<Document>,
    offset: usize,
    text: String,
    embedding: Vec<f32>,
}

/// Brute-force cosine index held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    dimensions: usize,
    chunks: Vec<IndexedChunk>,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            chunks: Vec::new(),
        }
    }

    /// Embed every chunk of the snapshot and index it.
    ///
    /// The document title is embedded together with each chunk so that a
    /// chunk can be found by the name of the document it belongs to.
    pub async fn build(
        snapshot: &DocumentSnapshot,
        embedder: &dyn EmbeddingProvider,
    ) -> AppResult<Self> {
        let mut index = Self::new(embedder.dimensions());

        for document in &snapshot.documents {
            if document.chunks.is_empty() {
                continue;
            }

            let texts: Vec<String> = document
                .chunks
                .iter()
                .map(|chunk| format!("{}\n{}", document.title, chunk.text))
                .collect();
            let embeddings = embedder.embed_batch(&texts).await?;

            let shared = Arc::new(Document {
                chunks: Vec::new(),
                ..document.clone()
            });
            for (chunk, embedding) in document.chunks.iter().zip(embeddings) {
                index.push_shared(Arc::clone(&shared), chunk, embedding)?;
            }
        }

        tracing::debug!(
            "Built vector index: {} chunks from {} documents using {}",
            index.len(),
            snapshot.documents.len(),
            embedder.model_name()
        );

        Ok(index)
    }

    /// Add one chunk with a precomputed embedding.
    pub fn push(
        &mut self,
        document: &Document,
        chunk: &DocumentChunk,
        embedding: Vec<f32>,
    ) -> AppResult<()> {
        let shared = Arc::new(Document {
            chunks: Vec::new(),
            ..document.clone()
        });
        self.push_shared(shared, chunk, embedding)
    }

    fn push_shared(
        &mut self,
        document: Arc<Document>,
        chunk: &DocumentChunk,
        embedding: Vec<f32>,
    ) -> AppResult<()> {
        if embedding.len() != self.dimensions {
            return Err(AppError::Knowledge(format!(
                "Embedding for {} chunk {} has {} dimensions, index expects {}",
                document.id,
                chunk.offset,
                embedding.len(),
                self.dimensions
            )));
        }

        self.chunks.push(IndexedChunk {
            document,
            offset: chunk.offset,
            text: chunk.text.clone(),
            embedding,
        });
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex for InMemoryVectorIndex {
    fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> AppResult<Vec<ScoredChunk>> {
        if query_embedding.len() != self.dimensions {
            return Err(AppError::Knowledge(format!(
                "Query embedding has {} dimensions, index expects {}",
                query_embedding.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .filter(|chunk| filter.accepts(&chunk.document, &chunk.text))
            .map(|chunk| ScoredChunk {
                doc_id: chunk.document.id.clone(),
                title: chunk.document.title.clone(),
                offset: chunk.offset,
                text: chunk.text.clone(),
                score: cosine_similarity(query_embedding, &chunk.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
                .then_with(|| a.offset.cmp(&b.offset))
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: &str, domain: Option<&str>, date: Option<&str>) -> Document {
        Document {
            id: id.to_string(),
            title: id.to_string(),
            domain: domain.map(str::to_string),
            date: date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            entities: Vec::new(),
            chunks: Vec::new(),
        }
    }

    fn chunk(offset: usize, text: &str) -> DocumentChunk {
        DocumentChunk {
            offset,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_ties_break_on_doc_then_offset() {
        let mut index = InMemoryVectorIndex::new(2);
        index
            .push(&document("b", None, None), &chunk(0, "x"), vec![1.0, 0.0])
            .unwrap();
        index
            .push(&document("a", None, None), &chunk(40, "y"), vec![1.0, 0.0])
            .unwrap();
        index
            .push(&document("a", None, None), &chunk(0, "z"), vec![1.0, 0.0])
            .unwrap();

        let results = index
            .search(&[1.0, 0.0], 10, &ChunkFilter::default())
            .unwrap();
        let order: Vec<(&str, usize)> = results
            .iter()
            .map(|r| (r.doc_id.as_str(), r.offset))
            .collect();
        assert_eq!(order, vec![("a", 0), ("a", 40), ("b", 0)]);
    }

    #[test]
    fn test_filter_by_domain_and_date() {
        let mut index = InMemoryVectorIndex::new(2);
        index
            .push(
                &document("finance-memo", Some("finance"), Some("2024-03-01")),
                &chunk(0, "x"),
                vec![1.0, 0.0],
            )
            .unwrap();
        index
            .push(
                &document("legal-memo", Some("legal"), Some("2024-03-01")),
                &chunk(0, "x"),
                vec![1.0, 0.0],
            )
            .unwrap();
        index
            .push(
                &document("old-memo", Some("finance"), Some("2021-01-01")),
                &chunk(0, "x"),
                vec![1.0, 0.0],
            )
            .unwrap();

        let filter = ChunkFilter {
            domain: Some("Finance".to_string()),
            date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..ChunkFilter::default()
        };
        let results = index.search(&[1.0, 0.0], 10, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "finance-memo");
    }

    #[test]
    fn test_mentions_filter() {
        let mut index = InMemoryVectorIndex::new(2);
        index
            .push(
                &document("mail-1", None, None),
                &chunk(0, "BioMed asked about renewal"),
                vec![0.0, 1.0],
            )
            .unwrap();
        index
            .push(
                &document("mail-2", None, None),
                &chunk(0, "Acme asked about pricing"),
                vec![1.0, 0.0],
            )
            .unwrap();

        let filter = ChunkFilter {
            mentions_any: vec!["BioMed".to_string()],
            ..ChunkFilter::default()
        };
        let results = index.search(&[1.0, 0.0], 10, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "mail-1");
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = InMemoryVectorIndex::new(3);
        assert!(index
            .push(&document("a", None, None), &chunk(0, "x"), vec![1.0])
            .is_err());
        assert!(index
            .search(&[1.0], 1, &ChunkFilter::default())
            .is_err());
    }
}
