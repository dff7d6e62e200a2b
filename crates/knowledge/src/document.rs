//! Pre-chunked document snapshot.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A chunk of document text at a character offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub offset: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub date: Option<NaiveDate>,

    /// Entity names tagged on the document (customers, vendors, ...)
    #[serde(default)]
    pub entities: Vec<String>,

    #[serde(default)]
    pub chunks: Vec<DocumentChunk>,
}

impl Document {
    /// Whether the title, entity tags or `chunk_text` mention `needle`, ignoring case.
    pub fn mentions(&self, chunk_text: &str, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        if needle.is_empty() {
            return false;
        }
        chunk_text.to_lowercase().contains(&needle)
            || self.title.to_lowercase().contains(&needle)
            || self.entities.iter().any(|e| e.to_lowercase() == needle)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    #[serde(default)]
    pub documents: Vec<Document>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_checks_text_title_and_entities() {
        let doc = Document {
            id: "memo".to_string(),
            title: "Q3 Risk Assessment".to_string(),
            domain: None,
            date: None,
            entities: vec!["BioMed Research".to_string()],
            chunks: Vec::new(),
        };

        assert!(doc.mentions("nothing here", "risk assessment"));
        assert!(doc.mentions("nothing here", "biomed research"));
        assert!(doc.mentions("Acme renewed early", "acme"));
        assert!(!doc.mentions("Acme renewed early", "globex"));
        assert!(!doc.mentions("anything", ""));
    }

    #[test]
    fn test_deserialize_with_date() {
        let doc: Document = serde_json::from_str(
            r#"{"id": "d1", "date": "2024-09-30", "chunks": [{"offset": 0, "text": "hi"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.date, NaiveDate::from_ymd_opt(2024, 9, 30));
        assert_eq!(doc.chunks.len(), 1);
    }
}
