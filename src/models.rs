use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::structure::SchemaColumn;

/// One row as returned by the executor, positional and aligned with `QueryResult::fields`.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
  pub schema: Option<String>,
  pub name: String,
}

impl TableRef {
  pub fn new(name: impl Into<String>) -> Self {
    Self { schema: None, name: name.into() }
  }

  pub fn with_schema(name: impl Into<String>, schema: impl Into<String>) -> Self {
    Self { schema: Some(schema.into()), name: name.into() }
  }

  pub fn schema(&self) -> Option<&str> {
    self.schema.as_deref().filter(|s| !s.is_empty())
  }
}

impl fmt::Display for TableRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.schema() {
      Some(schema) => write!(f, "{schema}.{}", self.name),
      None => write!(f, "{}", self.name),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
  pub name: String,
  pub data_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
  pub rows: Vec<Row>,
  pub fields: Vec<Field>,
  pub row_count: u64,
  pub execution_time_ms: u64,
}

impl QueryResult {
  pub fn column_index(&self, name: &str) -> Option<usize> {
    self.fields.iter().position(|f| f.name == name)
  }

  /// The first column of the first row as an integer; how COUNT(*) results are read.
  pub fn scalar_u64(&self) -> Option<u64> {
    let value = self.rows.first()?.first()?;
    match value {
      Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|i| i.max(0) as u64)),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
  pub name: String,
  pub columns: Vec<String>,
  pub is_unique: bool,
  pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
  pub name: String,
  pub columns: Vec<String>,
  pub referenced_table: String,
  pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
  pub columns: Vec<SchemaColumn>,
  pub indexes: Vec<IndexInfo>,
  pub foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableStructure {
  pub fn primary_key_columns(&self) -> Vec<String> {
    self.columns.iter().filter(|c| c.is_primary_key).map(|c| c.name.clone()).collect()
  }
}
