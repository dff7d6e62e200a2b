//! Structured adapter: question text → [`StructuredQuery`] → rows.

use super::{elapsed_ms, RetrieverAdapter};
use crate::error::RetrievalError;
use crate::text::{find_phrase, singular, words};
use crate::types::{
    Capability, Provenance, Record, RecordContent, RetrievalResult, RetrievalStatus, SourceType,
    SubQuery,
};
use async_trait::async_trait;
use compass_knowledge::{
    ColumnKind, CompareOp, OrderBy, Predicate, StructuredQuery, TableSchema, TableStore,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

/// Rows returned for "highest"/"lowest" questions.
const SUPERLATIVE_LIMIT: usize = 5;

/// `above $40M`, `at least 1,500`, `under 2.5k`
static COMPARISON: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?P<op>above|over|greater than|more than|exceeding|at least|below|under|less than|fewer than|at most)\s+\$?(?P<num>\d[\d,]*(?:\.\d+)?)\s*(?P<suffix>k|m|b|thousand|million|billion)?\b",
    )
    .ok()
});

static SUPERLATIVE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?P<dir>highest|largest|biggest|top|most|lowest|smallest|least|bottom)\b").ok()
});

/// Words that sit between a column name and a comparison without naming a column.
const CONNECTORS: &[&str] = &[
    "with", "having", "has", "have", "is", "are", "was", "were", "of", "that", "where", "whose",
    "and", "or", "s",
];

/// Numeric comparison found in question text, with its byte span.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Comparison {
    pub op: CompareOp,
    pub value: f64,
    pub start: usize,
}

/// All numeric comparisons in `text`.
pub(crate) fn find_comparisons(text: &str) -> Vec<Comparison> {
    let Some(re) = COMPARISON.as_ref() else {
        return Vec::new();
    };

    re.captures_iter(text)
        .filter_map(|caps| {
            let op = match caps["op"].to_lowercase().as_str() {
                "above" | "over" | "greater than" | "more than" | "exceeding" => CompareOp::Gt,
                "at least" => CompareOp::Ge,
                "below" | "under" | "less than" | "fewer than" => CompareOp::Lt,
                "at most" => CompareOp::Le,
                _ => return None,
            };
            let number: f64 = caps["num"].replace(',', "").parse().ok()?;
            let multiplier = match caps.name("suffix").map(|m| m.as_str().to_lowercase()) {
                Some(s) if s == "k" || s == "thousand" => 1e3,
                Some(s) if s == "m" || s == "million" => 1e6,
                Some(s) if s == "b" || s == "billion" => 1e9,
                _ => 1.0,
            };
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            Some(Comparison {
                op,
                value: number * multiplier,
                start,
            })
        })
        .collect()
}

pub(crate) fn has_superlative(text: &str) -> bool {
    SUPERLATIVE.as_ref().is_some_and(|re| re.is_match(text))
}

/// Deterministic keyword translator over the table schemas.
#[derive(Debug, Clone)]
pub struct StructuredTranslator {
    schemas: Vec<TableSchema>,
}

impl StructuredTranslator {
    pub fn new(schemas: Vec<TableSchema>) -> Self {
        Self { schemas }
    }

    /// Translate question text into a query, or explain why it cannot be.
    pub fn translate(&self, sub_query: &SubQuery) -> Result<StructuredQuery, String> {
        let text = sub_query.text.as_str();
        let schema = self
            .pick_table(text)
            .ok_or_else(|| "no known table is mentioned".to_string())?;

        let mut query = StructuredQuery::new(schema.name.clone());
        let mut consumed = text.to_lowercase().replace('-', " ");

        for comparison in find_comparisons(text) {
            let column = self.comparison_column(schema, &text[..comparison.start])?;
            query.predicates.push(Predicate::Compare {
                column,
                op: comparison.op,
                value: comparison.value,
            });
        }

        query
            .predicates
            .extend(categorical_predicates(schema, &mut consumed));

        if let Some(caps) = SUPERLATIVE.as_ref().and_then(|re| re.captures(text)) {
            if let Some(column) = mentioned_numeric_column(schema, text) {
                let descending = !matches!(
                    caps["dir"].to_lowercase().as_str(),
                    "lowest" | "smallest" | "least" | "bottom"
                );
                query.order_by = Some(OrderBy { column, descending });
                query.limit = Some(SUPERLATIVE_LIMIT);
            }
        }

        if !sub_query.bound_values.is_empty() {
            query.predicates.push(Predicate::MentionsAny {
                values: sub_query.bound_values.clone(),
            });
        }

        let filters = &sub_query.filters;
        if let Some(column) = &schema.date_column {
            if filters.date_from.is_some() || filters.date_to.is_some() {
                query.predicates.push(Predicate::DateRange {
                    column: column.clone(),
                    from: filters.date_from,
                    to: filters.date_to,
                });
            }
        }

        Ok(query)
    }

    /// The table whose name is mentioned earliest; otherwise the one whose
    /// columns and categories the question touches most.
    fn pick_table(&self, text: &str) -> Option<&TableSchema> {
        let named = self
            .schemas
            .iter()
            .filter_map(|schema| {
                let spoken = schema.name.replace('_', " ");
                find_phrase(text, &spoken).map(|pos| (pos, schema))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, schema)| schema);
        if named.is_some() {
            return named;
        }

        let lowered = text.to_lowercase().replace('-', " ");
        let mut best: Option<(usize, &TableSchema)> = None;
        for schema in &self.schemas {
            let hits = schema
                .columns
                .iter()
                .filter(|c| c.name != schema.key_column)
                .map(|column| {
                    let name_hit = usize::from(find_phrase(text, &column.name.replace('_', " ")).is_some());
                    let category_hits = column
                        .categories
                        .iter()
                        .filter(|v| v.len() >= 3 && find_phrase(&lowered, v).is_some())
                        .count();
                    name_hit + category_hits
                })
                .sum::<usize>();
            if hits > 0 && best.map_or(true, |(top, _)| hits > top) {
                best = Some((hits, schema));
            }
        }
        best.map(|(_, schema)| schema)
    }

    /// Resolve the column a comparison applies to from the words before it.
    fn comparison_column(&self, schema: &TableSchema, before: &str) -> Result<String, String> {
        let preceding: Vec<String> = words(before)
            .into_iter()
            .rev()
            .skip_while(|w| CONNECTORS.contains(&w.as_str()))
            .take(2)
            .collect();

        let numeric: Vec<&str> = schema
            .numeric_columns()
            .filter(|c| c.name != schema.key_column)
            .map(|c| c.name.as_str())
            .collect();

        let Some(last) = preceding.first() else {
            return single_numeric(&numeric, &schema.name);
        };

        // Two-word names first (`annual revenue` → annual_revenue), then one word.
        let mut candidates = Vec::new();
        if let Some(previous) = preceding.get(1) {
            candidates.push(format!("{}_{}", previous, last));
        }
        candidates.push(last.clone());

        for candidate in &candidates {
            let wanted = singular(candidate);
            if let Some(column) = numeric.iter().find(|name| {
                let name = name.to_lowercase();
                singular(&name) == wanted || name.rsplit('_').next() == Some(wanted.as_str())
            }) {
                return Ok(column.to_string());
            }
        }

        // The word before the comparison is the table name itself (`customers above 40M`).
        if singular(last) == singular(&schema.name.to_lowercase()) {
            return single_numeric(&numeric, &schema.name);
        }

        if schema.column(last).is_some_and(|c| c.kind != ColumnKind::Numeric) {
            return Err(format!("column '{}' in {} is not numeric", last, schema.name));
        }
        Err(format!("unknown column '{}' in {}", last, schema.name))
    }
}

fn single_numeric(numeric: &[&str], table: &str) -> Result<String, String> {
    match numeric {
        [only] => Ok(only.to_string()),
        [] => Err(format!("{} has no numeric columns", table)),
        _ => Err(format!("comparison does not name a column of {}", table)),
    }
}

fn mentioned_numeric_column(schema: &TableSchema, text: &str) -> Option<String> {
    let numeric: Vec<&str> = schema
        .numeric_columns()
        .filter(|c| c.name != schema.key_column)
        .map(|c| c.name.as_str())
        .collect();

    numeric
        .iter()
        .filter_map(|name| {
            let spoken = name.replace('_', " ");
            let last_word = spoken.rsplit(' ').next().unwrap_or(&spoken).to_string();
            find_phrase(text, &spoken)
                .or_else(|| find_phrase(text, &last_word))
                .map(|pos| (pos, name))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, name)| name.to_string())
        .or_else(|| match numeric.as_slice() {
            [only] => Some(only.to_string()),
            _ => None,
        })
}

/// Equality predicates for categorical values and boolean column names.
///
/// Longer values are matched first and blanked out of `consumed` so that
/// `non compliant` is not also read as `compliant`.
fn categorical_predicates(schema: &TableSchema, consumed: &mut String) -> Vec<Predicate> {
    let mut candidates: Vec<(&str, &str)> = schema
        .columns
        .iter()
        .flat_map(|column| {
            column
                .categories
                .iter()
                .filter(|v| v.chars().count() >= 3)
                .map(move |value| (column.name.as_str(), value.as_str()))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.cmp(b)));

    let mut matched: Vec<(String, Vec<String>)> = Vec::new();
    for (column, value) in candidates {
        let spoken = value.to_lowercase().replace(['-', '_'], " ");
        if let Some(span) = whole_word_span(consumed, &spoken) {
            consumed.replace_range(span, &" ".repeat(spoken.len()));
            match matched.iter_mut().find(|(c, _)| c == column) {
                Some((_, values)) => values.push(value.to_string()),
                None => matched.push((column.to_string(), vec![value.to_string()])),
            }
        }
    }

    let mut predicates: Vec<Predicate> = matched
        .into_iter()
        .map(|(column, values)| Predicate::Equals { column, values })
        .collect();

    for column in schema.columns.iter().filter(|c| c.kind == ColumnKind::Boolean) {
        let spoken = column.name.replace('_', " ");
        if find_phrase(consumed, &spoken).is_some() {
            predicates.push(Predicate::Equals {
                column: column.name.clone(),
                values: vec!["true".to_string()],
            });
        }
    }

    predicates
}

/// Byte span of `needle` in `haystack` bounded by non-alphanumeric characters.
fn whole_word_span(haystack: &str, needle: &str) -> Option<std::ops::Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(found) = haystack[from..].find(needle) {
        let start = from + found;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(start..end);
        }
        from = start + needle.len().max(1);
        if from >= haystack.len() {
            break;
        }
    }
    None
}

/// Adapter over a [`TableStore`].
pub struct StructuredAdapter {
    name: String,
    store: Arc<dyn TableStore>,
    translator: StructuredTranslator,
    max_rows: usize,
}

impl StructuredAdapter {
    pub fn new(name: impl Into<String>, store: Arc<dyn TableStore>, max_rows: usize) -> Self {
        let translator = StructuredTranslator::new(store.schema());
        Self {
            name: name.into(),
            store,
            translator,
            max_rows,
        }
    }
}

#[async_trait]
impl RetrieverAdapter for StructuredAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> Capability {
        Capability::Structured
    }

    async fn retrieve(&self, sub_query: &SubQuery) -> Result<RetrievalResult, RetrievalError> {
        let start = Instant::now();

        let query = self
            .translator
            .translate(sub_query)
            .map_err(|message| RetrievalError::Translation {
                tool: self.name.clone(),
                message,
            })?;

        let excluded_domain = self.store.schema().into_iter().any(|schema| {
            schema.name.eq_ignore_ascii_case(&query.table)
                && matches!(
                    (&schema.domain, &sub_query.filters.domain),
                    (Some(table_domain), Some(wanted)) if !table_domain.eq_ignore_ascii_case(wanted)
                )
        });
        if excluded_domain {
            tracing::debug!(tool = %self.name, table = %query.table, "Table outside requested domain");
            return Ok(RetrievalResult {
                tool: self.name.clone(),
                capability: Capability::Structured,
                records: Vec::new(),
                latency_ms: elapsed_ms(start),
                status: RetrievalStatus::Ok,
            });
        }

        tracing::debug!(tool = %self.name, query = %query, "Executing structured query");

        let result = self
            .store
            .execute(&query, self.max_rows)
            .map_err(|e| RetrievalError::Backend {
                tool: self.name.clone(),
                message: e.to_string(),
            })?;

        let records = result
            .rows
            .into_iter()
            .map(|row| Record {
                provenance: Provenance::new(row.source_id, SourceType::Table, row.locator),
                content: RecordContent::Row {
                    table: row.table,
                    key: row.key,
                    values: row.values,
                },
                native_score: 1.0,
            })
            .collect();

        Ok(RetrievalResult {
            tool: self.name.clone(),
            capability: Capability::Structured,
            records,
            latency_ms: elapsed_ms(start),
            status: if result.truncated {
                RetrievalStatus::Partial
            } else {
                RetrievalStatus::Ok
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueryFilters;
    use compass_knowledge::{InMemoryTableStore, TableSnapshot};
    use serde_json::json;

    fn store() -> Arc<dyn TableStore> {
        let snapshot: TableSnapshot = serde_json::from_value(json!({
            "tables": [{
                "name": "customers",
                "domain": "finance",
                "rows": [
                    {"id": 1, "name": "Acme Corp", "revenue": 12000000, "employees": 120, "risk_level": "LOW", "active": true},
                    {"id": 2, "name": "BioMed Research", "revenue": 45000000, "employees": 800, "risk_level": "HIGH", "active": true},
                    {"id": 3, "name": "NextGen Pharmaceuticals", "revenue": 52000000, "employees": 950, "risk_level": "HIGH", "active": false},
                    {"id": 4, "name": "Globex", "revenue": 8000000, "employees": 40, "risk_level": "MEDIUM", "active": true}
                ]
            }]
        }))
        .unwrap();
        Arc::new(InMemoryTableStore::new(snapshot))
    }

    fn translate(text: &str) -> Result<StructuredQuery, String> {
        StructuredTranslator::new(store().schema())
            .translate(&SubQuery::literal(text, QueryFilters::default()))
    }

    #[test]
    fn test_find_comparisons_with_suffixes() {
        let found = find_comparisons("revenue above $40M and headcount at least 1,500");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].op, CompareOp::Gt);
        assert_eq!(found[0].value, 40_000_000.0);
        assert_eq!(found[1].op, CompareOp::Ge);
        assert_eq!(found[1].value, 1_500.0);
        assert_eq!(find_comparisons("under 2.5k")[0].value, 2_500.0);
    }

    #[test]
    fn test_translate_numeric_comparison() {
        let query = translate("List customers with revenue above $40M").unwrap();
        assert_eq!(query.table, "customers");
        assert_eq!(
            query.predicates,
            vec![Predicate::Compare {
                column: "revenue".to_string(),
                op: CompareOp::Gt,
                value: 40_000_000.0,
            }]
        );
    }

    #[test]
    fn test_translate_categorical_value() {
        let query = translate("Find high-risk customers").unwrap();
        assert_eq!(
            query.predicates,
            vec![Predicate::Equals {
                column: "risk_level".to_string(),
                values: vec!["HIGH".to_string()],
            }]
        );
    }

    #[test]
    fn test_translate_boolean_column() {
        let query = translate("active customers").unwrap();
        assert!(query.predicates.contains(&Predicate::Equals {
            column: "active".to_string(),
            values: vec!["true".to_string()],
        }));
    }

    #[test]
    fn test_translate_superlative() {
        let query = translate("Which customers have the highest revenue?").unwrap();
        assert_eq!(
            query.order_by,
            Some(OrderBy {
                column: "revenue".to_string(),
                descending: true,
            })
        );
        assert_eq!(query.limit, Some(SUPERLATIVE_LIMIT));
    }

    #[test]
    fn test_unknown_column_is_translation_error() {
        let err = translate("customers with profit above 10M").unwrap_err();
        assert!(err.contains("profit"), "{}", err);
    }

    #[test]
    fn test_ambiguous_comparison_is_translation_error() {
        assert!(translate("customers above 10M").is_err());
    }

    #[test]
    fn test_no_table_is_translation_error() {
        assert!(translate("what is the weather like").is_err());
    }

    #[tokio::test]
    async fn test_retrieve_rows_with_provenance() {
        let adapter = StructuredAdapter::new("sql_query", store(), 50);
        let result = adapter
            .retrieve(&SubQuery::literal(
                "List customers with revenue above $40M",
                QueryFilters::default(),
            ))
            .await
            .unwrap();

        assert_eq!(result.status, RetrievalStatus::Ok);
        let locators: Vec<&str> = result
            .records
            .iter()
            .map(|r| r.provenance.locator.as_str())
            .collect();
        assert_eq!(locators, vec!["row:2", "row:3"]);
        assert!(result.records.iter().all(|r| r.provenance.source_id == "customers"));
    }

    #[tokio::test]
    async fn test_retrieve_bound_values_and_partial() {
        let adapter = StructuredAdapter::new("sql_query", store(), 1);
        let sub_query = SubQuery {
            text: "customers".to_string(),
            bound_values: vec!["BioMed Research".to_string(), "Globex".to_string()],
            filters: QueryFilters::default(),
        };
        let result = adapter.retrieve(&sub_query).await.unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.status, RetrievalStatus::Partial);
    }

    #[tokio::test]
    async fn test_retrieve_respects_domain_filter() {
        let adapter = StructuredAdapter::new("sql_query", store(), 50);
        let filters = QueryFilters {
            domain: Some("legal".to_string()),
            ..QueryFilters::default()
        };
        let result = adapter
            .retrieve(&SubQuery::literal("List customers", filters))
            .await
            .unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.status, RetrievalStatus::Ok);
    }

    #[tokio::test]
    async fn test_retrieve_translation_error() {
        let adapter = StructuredAdapter::new("sql_query", store(), 50);
        let err = adapter
            .retrieve(&SubQuery::literal("tell me a joke", QueryFilters::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Translation { .. }));
    }
}
