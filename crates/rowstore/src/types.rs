//! Data types for the rowstore crate

use serde::Serialize;
use serde_json::Value;

/// Outcome of an ad-hoc statement
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    /// Column names, empty for statements that return no rows
    pub columns: Vec<String>,
    /// One JSON value per column
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a non-query statement
    pub changes: usize,
}

impl QueryResult {
    pub fn is_query(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// One recorded row change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub table_name: String,
    /// `INSERT`, `UPDATE` or `DELETE`
    pub operation: String,
    pub old_row: Option<Value>,
    pub new_row: Option<Value>,
    pub changed_at: String,
}
