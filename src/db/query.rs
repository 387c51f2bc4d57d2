use anyhow::Result;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::error::Error as StdError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, Row};

use crate::spec::sql::CompiledQuery;

/// Categorized error types for SQL query failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (type mismatch, resource limits)
    Execution,
    /// Transaction state errors (e.g., serialization failure)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Database failure with the context PostgreSQL reported for it.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// SQLSTATE error code (e.g., "42601" for syntax_error)
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Computed from the reported byte position, 1-based.
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl StructuredError {
    /// Build from a tokio_postgres error, using the query text to compute
    /// line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code().to_string();
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            StructuredError {
                category: categorize_sqlstate(&code),
                code,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            StructuredError {
                category,
                code: String::new(),
                message: err.to_string(),
                detail: err.source().map(|e| e.to_string()),
                hint: None,
                line: None,
                col: None,
            }
        }
    }

    /// Multi-line rendering with position, SQLSTATE, detail and hint.
    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category, self.message)];
        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }
        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_full())
    }
}

impl StdError for StructuredError {}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len());
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        // 42601 = syntax_error; 42P01 undefined_table, 42703 undefined_column, ...
        "42" if code == "42601" || code == "42000" => ErrorCategory::Syntax,
        "42" => ErrorCategory::Semantic,
        "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// A single scalar cell, from the database or an in-memory dataset.
///
/// Deserializes untagged, so JSON datasets can carry plain values. Strings
/// that parse as RFC 3339 become timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    TimestampTz(DateTime<Utc>),
    Text(String),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "boolean",
            CellValue::Int64(_) => "integer",
            CellValue::Float64(_) => "float",
            CellValue::TimestampTz(_) => "timestamp",
            CellValue::Text(_) => "text",
        }
    }

    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::TimestampTz(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            CellValue::Text(s) => s.clone(),
        }
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CellValue::Bool(_) => 0,
            CellValue::Int64(_) | CellValue::Float64(_) => 1,
            CellValue::TimestampTz(_) => 2,
            CellValue::Text(_) => 3,
            CellValue::Null => 4,
        }
    }

    /// Total order used for sorting. NULL sorts last, matching PostgreSQL's
    /// default for ascending keys. Integers and floats compare numerically.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (CellValue::Int64(a), CellValue::Int64(b)) => a.cmp(b),
            (CellValue::Float64(a), CellValue::Float64(b)) => a.total_cmp(b),
            (CellValue::Int64(a), CellValue::Float64(b)) => (*a as f64).total_cmp(b),
            (CellValue::Float64(a), CellValue::Int64(b)) => a.total_cmp(&(*b as f64)),
            (CellValue::TimestampTz(a), CellValue::TimestampTz(b)) => a.cmp(b),
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => true,
            (CellValue::Bool(a), CellValue::Bool(b)) => a == b,
            (CellValue::Int64(a), CellValue::Int64(b)) => a == b,
            (CellValue::Float64(a), CellValue::Float64(b)) => a.to_bits() == b.to_bits(),
            (CellValue::TimestampTz(a), CellValue::TimestampTz(b)) => a == b,
            (CellValue::Text(a), CellValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::Null => {}
            CellValue::Bool(b) => b.hash(state),
            CellValue::Int64(i) => i.hash(state),
            CellValue::Float64(f) => f.to_bits().hash(state),
            CellValue::TimestampTz(dt) => dt.hash(state),
            CellValue::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int64(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::TimestampTz(value)
    }
}

/// Binds a cell to the parameter type the server inferred. Integers narrow
/// to INT4/INT2 only when they fit. Other pairings are errors.
impl ToSql for CellValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match (self, ty) {
            (CellValue::Null, _) => Ok(IsNull::Yes),
            (CellValue::Bool(b), &Type::BOOL) => b.to_sql(ty, out),
            (CellValue::Int64(i), &Type::INT8) => i.to_sql(ty, out),
            (CellValue::Int64(i), &Type::INT4) => i32::try_from(*i)?.to_sql(ty, out),
            (CellValue::Int64(i), &Type::INT2) => i16::try_from(*i)?.to_sql(ty, out),
            (CellValue::Float64(f), &Type::FLOAT8) => f.to_sql(ty, out),
            (CellValue::Float64(f), &Type::FLOAT4) => (*f as f32).to_sql(ty, out),
            (CellValue::TimestampTz(dt), &Type::TIMESTAMPTZ) => dt.to_sql(ty, out),
            (CellValue::TimestampTz(dt), &Type::TIMESTAMP) => dt.naive_utc().to_sql(ty, out),
            (CellValue::Text(s), &Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME) => {
                s.to_sql(ty, out)
            }
            (value, ty) => Err(format!(
                "cannot bind {} value to a {} parameter",
                value.kind(),
                ty.name()
            )
            .into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::BOOL
                | Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::TIMESTAMP
                | Type::TIMESTAMPTZ
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
        )
    }

    to_sql_checked!();
}

/// One flat row keyed by column label, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRecord {
    pub fields: Vec<(String, CellValue)>,
}

impl FlatRecord {
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn values(&self) -> impl Iterator<Item = &CellValue> {
        self.fields.iter().map(|(_, v)| v)
    }
}

impl Serialize for FlatRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Rows returned by a storage engine, labelled with projection labels.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub row_count: usize,
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>, execution_time: Duration) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time,
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![], vec![], Duration::ZERO)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Widest display width per column, header included.
    pub fn column_widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self
            .columns
            .iter()
            .map(|c| unicode_width::UnicodeWidthStr::width(c.as_str()))
            .collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.display_width());
                }
            }
        }
        widths
    }

    pub fn records(&self) -> Vec<FlatRecord> {
        self.rows
            .iter()
            .map(|row| FlatRecord {
                fields: self.columns.iter().cloned().zip(row.iter().cloned()).collect(),
            })
            .collect()
    }
}

/// Run a compiled statement and relabel the result columns.
///
/// PostgreSQL folds unquoted aliases, so the labels come from `labels`
/// rather than from the row description.
pub async fn execute_query(
    client: &Client,
    query: &CompiledQuery,
    labels: &[String],
) -> Result<QueryResult> {
    let start = Instant::now();
    let params: Vec<&(dyn ToSql + Sync)> = query
        .params
        .iter()
        .map(|p| p as &(dyn ToSql + Sync))
        .collect();

    tracing::debug!(sql = %query.sql, params = params.len(), "executing query");
    let rows = client
        .query(query.sql.as_str(), &params)
        .await
        .map_err(|e| anyhow::Error::new(StructuredError::from_pg_error(&e, &query.sql)))?;

    let execution_time = start.elapsed();
    Ok(parse_rows(&rows, labels, execution_time))
}

fn parse_rows(rows: &[Row], labels: &[String], execution_time: Duration) -> QueryResult {
    let result_rows: Vec<Vec<CellValue>> = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| extract_value(row, i, col.type_()))
                .collect()
        })
        .collect();

    let columns = match rows.first() {
        Some(first) if first.columns().len() != labels.len() => first
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        _ => labels.to_vec(),
    };

    QueryResult::new(columns, result_rows, execution_time)
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int64(v.into()))
            .unwrap_or(CellValue::Null),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int64(v.into()))
            .unwrap_or(CellValue::Null),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int64)
            .unwrap_or(CellValue::Null),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float64(v.into()))
            .unwrap_or(CellValue::Null),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float64)
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|dt| CellValue::TimestampTz(dt.and_utc()))
            .unwrap_or(CellValue::Null),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::TimestampTz)
            .unwrap_or(CellValue::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Text)
            .unwrap_or(CellValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Null.display(), "NULL");
        assert_eq!(CellValue::Bool(true).display(), "true");
        assert_eq!(CellValue::Int64(9_999_999).display(), "9999999");
        assert_eq!(CellValue::Float64(2.5).display(), "2.5");
        assert_eq!(CellValue::text("hello").display(), "hello");
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(CellValue::TimestampTz(ts).display(), "2024-03-01T12:00:00Z");
    }

    #[test]
    fn test_display_width() {
        assert_eq!(CellValue::Null.display_width(), 4);
        assert_eq!(CellValue::text("héllo").display_width(), 5);
        assert_eq!(CellValue::text("日本").display_width(), 4);
    }

    #[test]
    fn test_total_cmp_puts_null_last() {
        let mut values = vec![
            CellValue::Null,
            CellValue::Int64(3),
            CellValue::Float64(1.5),
            CellValue::Int64(2),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                CellValue::Float64(1.5),
                CellValue::Int64(2),
                CellValue::Int64(3),
                CellValue::Null,
            ]
        );
    }

    #[test]
    fn test_deserialize_untagged() {
        let values: Vec<CellValue> =
            serde_json::from_str(r#"[null, true, 7, 1.25, "2024-01-02T03:04:05Z", "admin"]"#)
                .unwrap();
        assert_eq!(values[0], CellValue::Null);
        assert_eq!(values[1], CellValue::Bool(true));
        assert_eq!(values[2], CellValue::Int64(7));
        assert_eq!(values[3], CellValue::Float64(1.25));
        assert!(matches!(values[4], CellValue::TimestampTz(_)));
        assert_eq!(values[5], CellValue::text("admin"));
    }

    #[test]
    fn test_hash_matches_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(CellValue::text("r1"));
        set.insert(CellValue::text("r1"));
        set.insert(CellValue::Int64(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_records_keep_column_order() {
        let result = QueryResult::new(
            vec!["id".into(), "username".into()],
            vec![vec![CellValue::Int64(1), CellValue::text("a")]],
            Duration::ZERO,
        );
        let records = result.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("username"), Some(&CellValue::text("a")));
        assert_eq!(
            serde_json::to_string(&records[0]).unwrap(),
            r#"{"id":1,"username":"a"}"#
        );
        assert_eq!(result.column_index("username"), Some(1));
        assert_eq!(result.column_widths(), vec![2, 8]);
    }

    #[test]
    fn test_empty_result() {
        let r = QueryResult::empty();
        assert!(r.columns.is_empty());
        assert_eq!(r.row_count, 0);
    }

    #[test]
    fn test_structured_error_display_full() {
        let err = StructuredError {
            category: ErrorCategory::Semantic,
            code: "42703".to_string(),
            message: "column roles.nme does not exist".to_string(),
            detail: None,
            hint: Some("Perhaps you meant to reference the column \"roles.name\".".to_string()),
            line: Some(1),
            col: Some(8),
        };
        let full = err.display_full();
        assert!(full.starts_with("Semantic Error: column roles.nme"));
        assert!(full.contains("at line 1, column 8"));
        assert!(full.contains("SQLSTATE: 42703"));
        assert!(full.contains("Hint: Perhaps"));
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "SELECT *\nFROM cust_user\nWHERE id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (Some(1), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 10), (Some(2), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 25), (Some(3), Some(1)));
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("22012"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("40001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
        assert_eq!(categorize_sqlstate("4"), ErrorCategory::Unknown);
    }

    fn bind(value: &CellValue, ty: &Type) -> Result<usize, Box<dyn StdError + Sync + Send>> {
        let mut out = BytesMut::new();
        value.to_sql_checked(ty, &mut out)?;
        Ok(out.len())
    }

    #[test]
    fn test_integer_narrows_to_parameter_width() {
        assert_eq!(bind(&CellValue::Int64(7), &Type::INT8).unwrap(), 8);
        assert_eq!(bind(&CellValue::Int64(7), &Type::INT4).unwrap(), 4);
        assert_eq!(bind(&CellValue::Int64(7), &Type::INT2).unwrap(), 2);
        assert!(bind(&CellValue::Int64(1 << 40), &Type::INT4).is_err());
        assert!(bind(&CellValue::Int64(70_000), &Type::INT2).is_err());
    }

    #[test]
    fn test_mismatched_binding_rejected() {
        assert!(bind(&CellValue::text("x"), &Type::INT8).is_err());
        assert!(bind(&CellValue::Int64(1), &Type::TEXT).is_err());
        assert!(bind(&CellValue::Bool(true), &Type::INT4).is_err());
        assert!(!<CellValue as ToSql>::accepts(&Type::JSONB));
        assert!(bind(&CellValue::text("{}"), &Type::JSONB).is_err());
    }

    #[test]
    fn test_text_timestamp_and_null_bindings() {
        assert_eq!(bind(&CellValue::text("ab"), &Type::VARCHAR).unwrap(), 2);
        let ts = CellValue::TimestampTz(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(bind(&ts, &Type::TIMESTAMPTZ).unwrap(), 8);
        assert_eq!(bind(&ts, &Type::TIMESTAMP).unwrap(), 8);

        let mut out = BytesMut::new();
        let is_null = CellValue::Null.to_sql_checked(&Type::INT4, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(out.is_empty());
    }
}
