//! Structured table store.
//!
//! Tables are small, read-only snapshots of enterprise records. Queries are
//! expressed as a [`StructuredQuery`] (a restricted SQL-like form) rather than
//! free SQL text so the translator can only produce queries the store can run.

use chrono::NaiveDate;
use compass_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One table row: column name → JSON value.
pub type Row = BTreeMap<String, Value>;

/// Text columns with at most this many distinct values are exposed as categories.
const MAX_CATEGORIES: usize = 12;

/// A table in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,

    /// Business domain the table belongs to (e.g. "finance")
    #[serde(default)]
    pub domain: Option<String>,

    /// Column identifying a row
    #[serde(default = "default_key_column")]
    pub key_column: String,

    /// Column holding an ISO date used for date-range filters
    #[serde(default)]
    pub date_column: Option<String>,

    /// Column naming the source document a row was extracted from
    #[serde(default)]
    pub source_column: Option<String>,

    /// Column giving the locator inside that source document
    #[serde(default)]
    pub locator_column: Option<String>,

    #[serde(default)]
    pub rows: Vec<Row>,
}

fn default_key_column() -> String {
    "id".to_string()
}

/// Snapshot of every table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    #[serde(default)]
    pub tables: Vec<Table>,
}

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub kind: ColumnKind,

    /// Distinct values of low-cardinality text columns, sorted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub domain: Option<String>,
    pub key_column: String,
    pub date_column: Option<String>,
    pub columns: Vec<ColumnSchema>,
    pub row_count: usize,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.kind == ColumnKind::Numeric)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl CompareOp {
    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Eq => (left - right).abs() < f64::EPSILON,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
        }
    }
}

/// A row filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Predicate {
    /// Numeric comparison against a column.
    Compare {
        column: String,
        op: CompareOp,
        value: f64,
    },
    /// Case-insensitive membership of the column's text in `values`.
    Equals { column: String, values: Vec<String> },
    /// Any text column contains any of `values` (case-insensitive).
    MentionsAny { values: Vec<String> },
    /// Inclusive date range on a date column.
    DateRange {
        column: String,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A query the table store can execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub table: String,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl StructuredQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicates: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.table)?;

        for (i, predicate) in self.predicates.iter().enumerate() {
            f.write_str(if i == 0 { " WHERE " } else { " AND " })?;
            match predicate {
                Predicate::Compare { column, op, value } => {
                    write!(f, "{} {} {}", column, op.symbol(), value)?
                }
                Predicate::Equals { column, values } => {
                    write!(f, "{} IN ({})", column, quote_list(values))?
                }
                Predicate::MentionsAny { values } => {
                    write!(f, "MENTIONS ANY ({})", quote_list(values))?
                }
                Predicate::DateRange { column, from, to } => {
                    let from = from.map(|d| d.to_string()).unwrap_or_else(|| "-inf".into());
                    let to = to.map(|d| d.to_string()).unwrap_or_else(|| "+inf".into());
                    write!(f, "{} BETWEEN '{}' AND '{}'", column, from, to)?
                }
            }
        }

        if let Some(order) = &self.order_by {
            write!(
                f,
                " ORDER BY {} {}",
                order.column,
                if order.descending { "DESC" } else { "ASC" }
            )?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}

/// A row returned by a query, with the identifiers needed to cite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRow {
    pub table: String,
    pub key: String,
    pub source_id: String,
    pub locator: String,
    pub values: Row,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableQueryResult {
    pub rows: Vec<MatchedRow>,
    /// More rows matched than the caller allowed
    pub truncated: bool,
}

/// Read-only access to structured tables.
pub trait TableStore: Send + Sync {
    /// Schemas of every table, in snapshot order.
    fn schema(&self) -> Vec<TableSchema>;

    /// Run `query`, returning at most `max_rows` rows.
    fn execute(&self, query: &StructuredQuery, max_rows: usize) -> AppResult<TableQueryResult>;
}

/// Render a JSON value as plain text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?;
    let prefix = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Table store over an in-memory snapshot.
#[derive(Debug, Clone)]
pub struct InMemoryTableStore {
    tables: Vec<Table>,
    schemas: Vec<TableSchema>,
}

impl InMemoryTableStore {
    pub fn new(snapshot: TableSnapshot) -> Self {
        let schemas = snapshot.tables.iter().map(infer_schema).collect();
        Self {
            tables: snapshot.tables,
            schemas,
        }
    }

    fn table_index(&self, name: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn matches(row: &Row, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Compare { column, op, value } => row
                .get(column)
                .and_then(value_number)
                .is_some_and(|v| op.holds(v, *value)),
            Predicate::Equals { column, values } => row.get(column).is_some_and(|v| {
                let text = value_text(v);
                values.iter().any(|candidate| candidate.eq_ignore_ascii_case(&text))
            }),
            Predicate::MentionsAny { values } => {
                let needles: Vec<String> = values.iter().map(|v| v.to_lowercase()).collect();
                row.values().filter(|v| v.is_string()).any(|v| {
                    let haystack = value_text(v).to_lowercase();
                    needles.iter().any(|n| !n.is_empty() && haystack.contains(n))
                })
            }
            Predicate::DateRange { column, from, to } => {
                match row.get(column).and_then(value_date) {
                    Some(date) => {
                        from.map_or(true, |from| date >= from) && to.map_or(true, |to| date <= to)
                    }
                    None => false,
                }
            }
        }
    }
}

fn infer_schema(table: &Table) -> TableSchema {
    // First-seen column order.
    let mut ordered: Vec<&str> = Vec::new();
    for row in &table.rows {
        for key in row.keys() {
            if !ordered.contains(&key.as_str()) {
                ordered.push(key);
            }
        }
    }

    let columns = ordered
        .into_iter()
        .map(|name| {
            let values: Vec<&Value> = table
                .rows
                .iter()
                .filter_map(|row| row.get(name))
                .filter(|v| !v.is_null())
                .collect();

            let kind = if !values.is_empty() && values.iter().all(|v| v.is_number()) {
                ColumnKind::Numeric
            } else if !values.is_empty() && values.iter().all(|v| v.is_boolean()) {
                ColumnKind::Boolean
            } else {
                ColumnKind::Text
            };

            let categories = if kind == ColumnKind::Text && name != table.key_column {
                let distinct: BTreeSet<String> = values.iter().map(|v| value_text(v)).collect();
                if distinct.len() <= MAX_CATEGORIES {
                    distinct.into_iter().collect()
                } else {
                    Vec::new()
                }
            } else {
                Vec::new()
            };

            ColumnSchema {
                name: name.to_string(),
                kind,
                categories,
            }
        })
        .collect();

    TableSchema {
        name: table.name.clone(),
        domain: table.domain.clone(),
        key_column: table.key_column.clone(),
        date_column: table.date_column.clone(),
        columns,
        row_count: table.rows.len(),
    }
}

impl TableStore for InMemoryTableStore {
    fn schema(&self) -> Vec<TableSchema> {
        self.schemas.clone()
    }

    fn execute(&self, query: &StructuredQuery, max_rows: usize) -> AppResult<TableQueryResult> {
        let index = self
            .table_index(&query.table)
            .ok_or_else(|| AppError::Knowledge(format!("Unknown table: {}", query.table)))?;
        let table = &self.tables[index];
        let schema = &self.schemas[index];

        for predicate in &query.predicates {
            let column = match predicate {
                Predicate::Compare { column, .. }
                | Predicate::Equals { column, .. }
                | Predicate::DateRange { column, .. } => Some(column),
                Predicate::MentionsAny { .. } => None,
            };
            if let Some(column) = column {
                if schema.column(column).is_none() {
                    return Err(AppError::Knowledge(format!(
                        "Unknown column {} in table {}",
                        column, table.name
                    )));
                }
            }
        }

        let mut rows: Vec<&Row> = table
            .rows
            .iter()
            .filter(|row| query.predicates.iter().all(|p| Self::matches(row, p)))
            .collect();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let left = a.get(&order.column).and_then(value_number);
                let right = b.get(&order.column).and_then(value_number);
                let ordering = left
                    .partial_cmp(&right)
                    .unwrap_or(std::cmp::Ordering::Equal);
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        let truncated = rows.len() > max_rows;
        rows.truncate(max_rows);

        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(position, row)| {
                let key = row
                    .get(&table.key_column)
                    .map(value_text)
                    .unwrap_or_else(|| position.to_string());
                let source_id = table
                    .source_column
                    .as_ref()
                    .and_then(|c| row.get(c))
                    .map(value_text)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| table.name.clone());
                let locator = table
                    .locator_column
                    .as_ref()
                    .and_then(|c| row.get(c))
                    .map(value_text)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| format!("row:{}", key));

                MatchedRow {
                    table: table.name.clone(),
                    key,
                    source_id,
                    locator,
                    values: row.clone(),
                }
            })
            .collect();

        Ok(TableQueryResult { rows, truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> InMemoryTableStore {
        let snapshot: TableSnapshot = serde_json::from_value(json!({
            "tables": [
                {
                    "name": "customers",
                    "domain": "finance",
                    "dateColumn": "onboarded",
                    "rows": [
                        {"id": 1, "name": "Acme Corp", "revenue": 12000000, "risk_level": "LOW", "onboarded": "2023-02-01"},
                        {"id": 2, "name": "BioMed Research", "revenue": 45000000, "risk_level": "HIGH", "onboarded": "2023-07-15"},
                        {"id": 3, "name": "NextGen Pharmaceuticals", "revenue": 52000000, "risk_level": "HIGH", "onboarded": "2024-01-10"}
                    ]
                },
                {
                    "name": "contracts",
                    "keyColumn": "contract_id",
                    "sourceColumn": "document_id",
                    "locatorColumn": "locator",
                    "rows": [
                        {"contract_id": "C-9", "customer": "BioMed Research", "document_id": "contract-c9", "locator": "chunk:0"}
                    ]
                }
            ]
        }))
        .unwrap();
        InMemoryTableStore::new(snapshot)
    }

    #[test]
    fn test_schema_inference() {
        let schema = store().schema();
        let customers = &schema[0];
        assert_eq!(customers.column("revenue").unwrap().kind, ColumnKind::Numeric);
        assert_eq!(
            customers.column("risk_level").unwrap().categories,
            vec!["HIGH".to_string(), "LOW".to_string()]
        );
        assert!(customers.column("id").unwrap().categories.is_empty());
        assert_eq!(customers.row_count, 3);
    }

    #[test]
    fn test_compare_and_order() {
        let query = StructuredQuery {
            table: "customers".to_string(),
            predicates: vec![Predicate::Compare {
                column: "revenue".to_string(),
                op: CompareOp::Gt,
                value: 40_000_000.0,
            }],
            order_by: Some(OrderBy {
                column: "revenue".to_string(),
                descending: true,
            }),
            limit: None,
        };

        let result = store().execute(&query, 50).unwrap();
        let keys: Vec<&str> = result.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["3", "2"]);
        assert_eq!(result.rows[0].locator, "row:3");
        assert_eq!(result.rows[0].source_id, "customers");
        assert!(!result.truncated);
    }

    #[test]
    fn test_equals_is_case_insensitive() {
        let query = StructuredQuery::new("Customers").with_predicate(Predicate::Equals {
            column: "risk_level".to_string(),
            values: vec!["high".to_string()],
        });
        assert_eq!(store().execute(&query, 50).unwrap().rows.len(), 2);
    }

    #[test]
    fn test_truncation_marks_result() {
        let result = store()
            .execute(&StructuredQuery::new("customers"), 2)
            .unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(result.truncated);
    }

    #[test]
    fn test_date_range() {
        let query = StructuredQuery::new("customers").with_predicate(Predicate::DateRange {
            column: "onboarded".to_string(),
            from: NaiveDate::from_ymd_opt(2023, 6, 1),
            to: NaiveDate::from_ymd_opt(2023, 12, 31),
        });
        let result = store().execute(&query, 50).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].key, "2");
    }

    #[test]
    fn test_source_columns_give_document_provenance() {
        let query = StructuredQuery::new("contracts").with_predicate(Predicate::MentionsAny {
            values: vec!["biomed".to_string()],
        });
        let result = store().execute(&query, 50).unwrap();
        assert_eq!(result.rows[0].source_id, "contract-c9");
        assert_eq!(result.rows[0].locator, "chunk:0");
        assert_eq!(result.rows[0].key, "C-9");
    }

    #[test]
    fn test_unknown_column_and_table() {
        let bad_column = StructuredQuery::new("customers").with_predicate(Predicate::Compare {
            column: "profit".to_string(),
            op: CompareOp::Gt,
            value: 1.0,
        });
        assert!(store().execute(&bad_column, 50).is_err());
        assert!(store().execute(&StructuredQuery::new("vendors"), 50).is_err());
    }

    #[test]
    fn test_display_renders_sql_like_text() {
        let query = StructuredQuery {
            table: "customers".to_string(),
            predicates: vec![
                Predicate::Compare {
                    column: "revenue".to_string(),
                    op: CompareOp::Gt,
                    value: 40_000_000.0,
                },
                Predicate::Equals {
                    column: "risk_level".to_string(),
                    values: vec!["HIGH".to_string()],
                },
            ],
            order_by: None,
            limit: Some(5),
        };
        assert_eq!(
            query.to_string(),
            "SELECT * FROM customers WHERE revenue > 40000000 AND risk_level IN ('HIGH') LIMIT 5"
        );
    }
}
