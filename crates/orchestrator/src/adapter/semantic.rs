//! Semantic adapter: embed the sub-query and look up nearest chunks.

use super::{elapsed_ms, RetrieverAdapter};
use crate::error::RetrievalError;
use crate::types::{
    Capability, Provenance, Record, RecordContent, RetrievalResult, RetrievalStatus, SourceType,
    SubQuery,
};
use async_trait::async_trait;
use compass_knowledge::{ChunkFilter, EmbeddingProvider, VectorIndex};
use std::sync::Arc;
use std::time::Instant;

pub struct SemanticAdapter {
    name: String,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
    similarity_floor: f32,
}

impl SemanticAdapter {
    pub fn new(
        name: impl Into<String>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        top_k: usize,
        similarity_floor: f32,
    ) -> Self {
        Self {
            name: name.into(),
            index,
            embedder,
            top_k,
            similarity_floor,
        }
    }

    fn backend_error(&self, message: impl Into<String>) -> RetrievalError {
        RetrievalError::Backend {
            tool: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl RetrieverAdapter for SemanticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Semantic
    }

    async fn retrieve(&self, sub_query: &SubQuery) -> Result<RetrievalResult, RetrievalError> {
        let start = Instant::now();

        // Bound values join the embedded text so passages about them rank higher.
        let text = if sub_query.bound_values.is_empty() {
            sub_query.text.clone()
        } else {
            format!("{} {}", sub_query.text, sub_query.bound_values.join(" "))
        };

        let embedding = self
            .embedder
            .embed(&text)
            .await
            .map_err(|e| self.backend_error(e.to_string()))?;

        let filter = ChunkFilter {
            domain: sub_query.filters.domain.clone(),
            date_from: sub_query.filters.date_from,
            date_to: sub_query.filters.date_to,
            mentions_any: sub_query.bound_values.clone(),
        };

        let hits = self
            .index
            .search(&embedding, self.top_k, &filter)
            .map_err(|e| self.backend_error(e.to_string()))?;

        let records: Vec<Record> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.similarity_floor)
            .map(|hit| Record {
                provenance: Provenance::new(
                    hit.doc_id,
                    SourceType::Document,
                    format!("chunk:{}", hit.offset),
                ),
                content: RecordContent::Passage {
                    title: hit.title,
                    text: hit.text,
                },
                native_score: hit.score,
            })
            .collect();

        if records.is_empty() {
            tracing::debug!(
                tool = %self.name,
                floor = self.similarity_floor,
                "No passages above the similarity floor"
            );
        }

        Ok(RetrievalResult {
            tool: self.name.clone(),
            capability: Capability::Semantic,
            records,
            latency_ms: elapsed_ms(start),
            status: RetrievalStatus::Ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueryFilters;
    use compass_knowledge::{
        Document, DocumentChunk, DocumentSnapshot, InMemoryVectorIndex, TrigramEmbedder,
    };

    async fn adapter(floor: f32) -> SemanticAdapter {
        let snapshot = DocumentSnapshot {
            documents: vec![
                Document {
                    id: "q3-risk-assessment".to_string(),
                    title: "Q3 Risk Assessment".to_string(),
                    domain: Some("risk".to_string()),
                    date: None,
                    entities: vec!["BioMed Research".to_string()],
                    chunks: vec![DocumentChunk {
                        offset: 0,
                        text: "BioMed Research carries elevated counterparty risk this quarter."
                            .to_string(),
                    }],
                },
                Document {
                    id: "email-acme".to_string(),
                    title: "Renewal email".to_string(),
                    domain: Some("sales".to_string()),
                    date: None,
                    entities: vec!["Acme Corp".to_string()],
                    chunks: vec![DocumentChunk {
                        offset: 0,
                        text: "Acme Corp asked to renew their contract early.".to_string(),
                    }],
                },
            ],
        };
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TrigramEmbedder::new(256));
        let index = InMemoryVectorIndex::build(&snapshot, embedder.as_ref())
            .await
            .unwrap();
        SemanticAdapter::new("vector_search", Arc::new(index), embedder, 5, floor)
    }

    #[tokio::test]
    async fn test_passages_carry_chunk_provenance() {
        let adapter = adapter(0.1).await;
        let result = adapter
            .retrieve(&SubQuery::literal(
                "What did the Q3 risk assessment say about BioMed Research?",
                QueryFilters::default(),
            ))
            .await
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::Ok);
        let top = &result.records[0];
        assert_eq!(top.provenance.source_id, "q3-risk-assessment");
        assert_eq!(top.provenance.locator, "chunk:0");
        assert_eq!(top.provenance.source_type, SourceType::Document);
    }

    #[tokio::test]
    async fn test_nothing_above_floor_is_empty_ok() {
        let adapter = adapter(0.99).await;
        let result = adapter
            .retrieve(&SubQuery::literal("quarterly cafeteria menu", QueryFilters::default()))
            .await
            .unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.status, RetrievalStatus::Ok);
    }

    #[tokio::test]
    async fn test_bound_values_restrict_passages() {
        let adapter = adapter(0.0).await;
        let sub_query = SubQuery {
            text: "summarize their related emails".to_string(),
            bound_values: vec!["Acme Corp".to_string()],
            filters: QueryFilters::default(),
        };
        let result = adapter.retrieve(&sub_query).await.unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].provenance.source_id, "email-acme");
    }

    #[tokio::test]
    async fn test_domain_filter() {
        let adapter = adapter(0.0).await;
        let filters = QueryFilters {
            domain: Some("sales".to_string()),
            ..QueryFilters::default()
        };
        let result = adapter
            .retrieve(&SubQuery::literal("risk assessment", filters))
            .await
            .unwrap();
        assert!(result
            .records
            .iter()
            .all(|r| r.provenance.source_id == "email-acme"));
    }
}
