//! Ranking behaviour of the in-memory vector index.

use crate::document::{Document, DocumentChunk, DocumentSnapshot};
use crate::embeddings::{EmbeddingProvider, TrigramEmbedder};
use crate::vector_index::{ChunkFilter, InMemoryVectorIndex, VectorIndex};

/// Helper to create a normalized embedding.
fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn document(id: &str, title: &str, chunks: &[&str]) -> Document {
    Document {
        id: id.to_string(),
        title: title.to_string(),
        domain: None,
        date: None,
        entities: Vec::new(),
        chunks: chunks
            .iter()
            .enumerate()
            .map(|(i, text)| DocumentChunk {
                offset: i * 500,
                text: text.to_string(),
            })
            .collect(),
    }
}

#[test]
fn test_scores_are_ordered_descending() {
    let mut index = InMemoryVectorIndex::new(3);
    let doc = document("source1", "Source", &[]);
    let vectors = [
        [1.0, 0.0, 0.0],
        [0.7, 0.7, 0.0],
        [0.0, 1.0, 0.0],
        [-1.0, 0.0, 0.0],
    ];
    for (i, v) in vectors.iter().enumerate() {
        let chunk = DocumentChunk {
            offset: i,
            text: format!("Text {}", i),
        };
        index.push(&doc, &chunk, normalize(v)).unwrap();
    }

    let results = index
        .search(&normalize(&[1.0, 0.0, 0.0]), 10, &ChunkFilter::default())
        .unwrap();

    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(
            pair[0].score >= pair[1].score,
            "Scores should be ordered: {} >= {}",
            pair[0].score,
            pair[1].score
        );
    }
    assert_eq!(results[0].offset, 0);
    assert!(results[0].score > 0.99, "Perfect match should score near 1.0");
    assert!(results[3].score < 0.0, "Opposite chunk should score negative");
}

#[test]
fn test_top_k_limits_results() {
    let mut index = InMemoryVectorIndex::new(2);
    let doc = document("source1", "Source", &[]);
    for offset in 0..5 {
        let chunk = DocumentChunk {
            offset,
            text: "x".to_string(),
        };
        index.push(&doc, &chunk, vec![1.0, 0.0]).unwrap();
    }

    let results = index
        .search(&[1.0, 0.0], 2, &ChunkFilter::default())
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(index.len(), 5);
}

#[tokio::test]
async fn test_trigram_index_ranks_relevant_document_first() {
    let snapshot = DocumentSnapshot {
        documents: vec![
            document(
                "q3-risk-assessment",
                "Q3 Risk Assessment",
                &["BioMed Research shows elevated counterparty risk after a late filing."],
            ),
            document(
                "cafeteria-notice",
                "Cafeteria Notice",
                &["The cafeteria will serve vegetarian lunch on Fridays."],
            ),
        ],
    };

    let embedder = TrigramEmbedder::new(384);
    let index = InMemoryVectorIndex::build(&snapshot, &embedder).await.unwrap();
    let query = embedder
        .embed("What did the Q3 risk assessment say about BioMed Research?")
        .await
        .unwrap();

    let results = index.search(&query, 5, &ChunkFilter::default()).unwrap();
    assert_eq!(results[0].doc_id, "q3-risk-assessment");
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn test_build_skips_documents_without_chunks() {
    let snapshot = DocumentSnapshot {
        documents: vec![document("empty", "Empty", &[])],
    };
    let embedder = TrigramEmbedder::new(16);
    let index = InMemoryVectorIndex::build(&snapshot, &embedder).await.unwrap();
    assert!(index.is_empty());
}
