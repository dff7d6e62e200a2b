//! Evidence fusion: calibrated, deduplicated, deterministically ordered.

use crate::types::{Capability, Record, RecordContent, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Maps a backend's native scores onto [0, 1].
pub trait ScoreCalibration: Send + Sync {
    /// One calibrated score per record of `result`, in record order.
    fn calibrate(&self, result: &RetrievalResult) -> Vec<f32>;
}

/// Min-max over the batch for similarity scores, 1.0 for exact structured
/// matches, `1 / hops` for graph paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCalibration;

impl ScoreCalibration for DefaultCalibration {
    fn calibrate(&self, result: &RetrievalResult) -> Vec<f32> {
        match result.capability {
            Capability::Structured => vec![1.0; result.records.len()],
            Capability::Graph => result
                .records
                .iter()
                .map(|record| {
                    let hops = match &record.content {
                        RecordContent::GraphPath { path } => path.hops() as f32,
                        _ => record.native_score,
                    };
                    if hops <= 1.0 {
                        1.0
                    } else {
                        1.0 / hops
                    }
                })
                .collect(),
            Capability::Semantic => {
                let scores: Vec<f32> = result.records.iter().map(|r| r.native_score).collect();
                let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
                let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let spread = max - min;
                scores
                    .iter()
                    .map(|s| {
                        if spread <= f32::EPSILON {
                            1.0
                        } else {
                            ((s - min) / spread).clamp(0.0, 1.0)
                        }
                    })
                    .collect()
            }
        }
    }
}

/// One fused piece of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub record: Record,
    /// Tool whose copy of the record won deduplication
    pub tool: String,
    pub capability: Capability,
    /// Calibrated relevance in [0, 1]
    pub score: f32,
    /// Every tool that surfaced this record, sorted
    pub origins: Vec<String>,
    pub multi_sourced: bool,
}

/// Ranked, deduplicated evidence for one answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSet {
    pub items: Vec<Evidence>,
}

impl EvidenceSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Evidence> {
        self.items.iter()
    }

    pub fn top(&self, n: usize) -> &[Evidence] {
        &self.items[..n.min(self.items.len())]
    }

    pub fn top_score(&self) -> f32 {
        self.items.first().map(|e| e.score).unwrap_or(0.0)
    }
}

pub struct EvidenceFuser {
    calibration: Box<dyn ScoreCalibration>,
}

impl Default for EvidenceFuser {
    fn default() -> Self {
        Self::new(Box::new(DefaultCalibration))
    }
}

impl EvidenceFuser {
    pub fn new(calibration: Box<dyn ScoreCalibration>) -> Self {
        Self { calibration }
    }

    /// Merge usable results into one evidence set.
    ///
    /// Failed results are ignored. Records sharing a `(source_id, locator)`
    /// collapse into the highest-scoring copy, which keeps every origin.
    pub fn fuse(&self, results: &[&RetrievalResult], min_confidence: Option<f32>) -> EvidenceSet {
        let mut merged: BTreeMap<(String, String), Evidence> = BTreeMap::new();

        for result in results.iter().filter(|r| r.is_usable()) {
            let scores = self.calibration.calibrate(result);
            for (record, score) in result.records.iter().zip(scores) {
                let key = (
                    record.provenance.source_id.clone(),
                    record.provenance.locator.clone(),
                );
                let candidate = Evidence {
                    record: record.clone(),
                    tool: result.tool.clone(),
                    capability: result.capability,
                    score,
                    origins: vec![result.tool.clone()],
                    multi_sourced: false,
                };

                match merged.remove(&key) {
                    None => {
                        merged.insert(key, candidate);
                    }
                    Some(existing) => {
                        merged.insert(key, absorb(existing, candidate));
                    }
                }
            }
        }

        let mut items: Vec<Evidence> = merged
            .into_values()
            .filter(|e| min_confidence.map_or(true, |min| e.score >= min))
            .collect();
        items.sort_by(rank);

        tracing::debug!(
            evidence = items.len(),
            multi_sourced = items.iter().filter(|e| e.multi_sourced).count(),
            "Fused evidence"
        );
        EvidenceSet { items }
    }
}

/// Keep the better copy of a duplicate and union the origins.
fn absorb(existing: Evidence, candidate: Evidence) -> Evidence {
    let mut origins = existing.origins.clone();
    origins.extend(candidate.origins.iter().cloned());
    origins.sort();
    origins.dedup();

    let mut winner = if rank(&candidate, &existing) == Ordering::Less {
        candidate
    } else {
        existing
    };
    winner.multi_sourced = origins.len() > 1;
    winner.origins = origins;
    winner
}

/// Score descending, then capability priority, then provenance, then tool.
fn rank(a: &Evidence, b: &Evidence) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.capability.cmp(&b.capability))
        .then_with(|| a.record.provenance.key().cmp(&b.record.provenance.key()))
        .then_with(|| a.tool.cmp(&b.tool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{graph_path, passage, row};
    use crate::types::RetrievalStatus;

    fn result(tool: &str, capability: Capability, records: Vec<Record>) -> RetrievalResult {
        RetrievalResult {
            tool: tool.to_string(),
            capability,
            records,
            latency_ms: 3,
            status: RetrievalStatus::Ok,
        }
    }

    #[test]
    fn test_semantic_min_max() {
        let result = result(
            "vector_search",
            Capability::Semantic,
            vec![
                passage("a", 0, "A", "x", 0.9),
                passage("b", 0, "B", "y", 0.5),
                passage("c", 0, "C", "z", 0.7),
            ],
        );
        let scores = DefaultCalibration.calibrate(&result);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert!(scores[1].abs() < 1e-6);
        assert!((scores[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_passage_calibrates_to_one() {
        let result = result("vector_search", Capability::Semantic, vec![passage("a", 0, "A", "x", 0.3)]);
        assert_eq!(DefaultCalibration.calibrate(&result), vec![1.0]);
    }

    #[test]
    fn test_graph_calibration_by_hops() {
        let result = result(
            "graph_search",
            Capability::Graph,
            vec![
                graph_path(&[("v1", "Vendor", "NextGen"), ("k1", "Contract", "K-100")]),
                graph_path(&[
                    ("v1", "Vendor", "NextGen"),
                    ("k1", "Contract", "K-100"),
                    ("c1", "Customer", "BioMed Research"),
                ]),
            ],
        );
        assert_eq!(DefaultCalibration.calibrate(&result), vec![1.0, 0.5]);
    }

    #[test]
    fn test_ordering_score_then_priority_then_provenance() {
        let rows = result(
            "sql_query",
            Capability::Structured,
            vec![row("customers", "c2", &[]), row("customers", "c1", &[])],
        );
        let passages = result(
            "vector_search",
            Capability::Semantic,
            vec![passage("doc-b", 0, "B", "x", 0.4), passage("doc-a", 0, "A", "y", 0.4)],
        );

        let set = EvidenceFuser::default().fuse(&[&passages, &rows], None);
        let order: Vec<String> = set.iter().map(|e| e.record.provenance.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "customers row:c1",
                "customers row:c2",
                "doc-a chunk:0",
                "doc-b chunk:0"
            ]
        );
    }

    #[test]
    fn test_duplicates_merge_and_keep_origins() {
        let from_table = result(
            "sql_query",
            Capability::Structured,
            vec![passage_as_row("email-101")],
        );
        let from_index = result(
            "vector_search",
            Capability::Semantic,
            vec![
                passage("email-101", 0, "Re: BioMed", "Renewal delayed.", 0.6),
                passage("memo-7", 0, "Office", "Moving.", 0.2),
            ],
        );

        let set = EvidenceFuser::default().fuse(&[&from_index, &from_table], None);
        assert_eq!(set.len(), 2);

        let merged = &set.items[0];
        assert_eq!(merged.record.provenance.source_id, "email-101");
        assert!(merged.multi_sourced);
        assert_eq!(merged.origins, vec!["sql_query", "vector_search"]);
        assert_eq!(merged.tool, "sql_query");
        assert!(!set.items[1].multi_sourced);
    }

    fn passage_as_row(doc_id: &str) -> Record {
        let mut record = row("email_index", "m1", &[("subject", "Re: BioMed")]);
        record.provenance.source_id = doc_id.to_string();
        record.provenance.locator = "chunk:0".to_string();
        record
    }

    #[test]
    fn test_failed_results_are_ignored() {
        let failed = RetrievalResult::failed("vector_search", Capability::Semantic, 5000);
        let rows = result("sql_query", Capability::Structured, vec![row("customers", "c1", &[])]);
        let set = EvidenceFuser::default().fuse(&[&failed, &rows], None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_min_confidence_filter() {
        let passages = result(
            "vector_search",
            Capability::Semantic,
            vec![passage("a", 0, "A", "x", 0.9), passage("b", 0, "B", "y", 0.1)],
        );
        let set = EvidenceFuser::default().fuse(&[&passages], Some(0.5));
        assert_eq!(set.len(), 1);
        assert_eq!(set.top_score(), 1.0);
    }

    #[test]
    fn test_fusion_is_order_independent() {
        let rows = result("sql_query", Capability::Structured, vec![row("customers", "c1", &[])]);
        let passages = result(
            "vector_search",
            Capability::Semantic,
            vec![passage("a", 0, "A", "x", 0.9), passage("b", 3, "B", "y", 0.2)],
        );
        let fuser = EvidenceFuser::default();
        assert_eq!(fuser.fuse(&[&rows, &passages], None), fuser.fuse(&[&passages, &rows], None));
    }
}
