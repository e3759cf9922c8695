use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::{
  dialect::Dialect,
  error::{Result, ValidationError},
  filter::{TableFilter, WhereBuilder},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum SortDirection {
  #[default]
  #[strum(serialize = "ASC")]
  Asc,
  #[strum(serialize = "DESC")]
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
  pub column: String,
  pub direction: SortDirection,
}

/// A statement plus the values bound to its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
  pub sql: String,
  pub params: Vec<Value>,
}

/// Everything that determines which rows one page shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
  pub table: String,
  pub schema: Option<String>,
  pub page: u64,
  pub page_size: u64,
  pub sort: Option<SortSpec>,
  pub filters: Vec<TableFilter>,
  pub primary_key_columns: Vec<String>,
}

impl PageRequest {
  pub fn new(table: impl Into<String>, schema: Option<String>, page_size: u64) -> Self {
    Self {
      table: table.into(),
      schema,
      page: 1,
      page_size,
      sort: None,
      filters: Vec::new(),
      primary_key_columns: Vec::new(),
    }
  }

  /// Pages are 1-based; page 0 is read as the first page.
  pub fn offset(&self) -> u64 {
    self.page.max(1).saturating_sub(1).saturating_mul(self.page_size)
  }
}

pub struct QueryPlanner<'a> {
  dialect: Dialect,
  where_builder: &'a dyn WhereBuilder,
}

impl<'a> QueryPlanner<'a> {
  pub fn new(dialect: Dialect, where_builder: &'a dyn WhereBuilder) -> Self {
    Self { dialect, where_builder }
  }

  pub fn build_data_query(&self, request: &PageRequest) -> Result<PlannedQuery> {
    if request.page_size == 0 {
      return Err(ValidationError::ZeroPageSize.into());
    }

    let d = self.dialect;
    let table = d.qualified_name(&request.table, request.schema.as_deref());
    let clause = self.where_builder.build_where_clause(&request.filters, d, 1);

    let order_by = match &request.sort {
      Some(sort) if !sort.column.is_empty() => {
        format!(" ORDER BY {} {}", d.quote_identifier(&sort.column), sort.direction)
      },
      _ if !request.primary_key_columns.is_empty() => {
        let keys: Vec<String> =
          request.primary_key_columns.iter().map(|c| format!("{} ASC", d.quote_identifier(c))).collect();
        format!(" ORDER BY {}", keys.join(", "))
      },
      _ => String::new(),
    };

    let mut params = clause.params.clone();
    let limit = d.placeholder(params.len() + 1);
    let offset = d.placeholder(params.len() + 2);
    params.push(Value::from(request.page_size));
    params.push(Value::from(request.offset()));

    let sql = format!("SELECT * FROM {table}{}{order_by} LIMIT {limit} OFFSET {offset}", clause.to_suffix());
    tracing::debug!(%sql, "planned data query");
    Ok(PlannedQuery { sql, params })
  }

  pub fn build_count_query(&self, table: &str, schema: Option<&str>, filters: &[TableFilter]) -> PlannedQuery {
    let d = self.dialect;
    let clause = self.where_builder.build_where_clause(filters, d, 1);
    let sql = format!("SELECT COUNT(*) AS count FROM {}{}", d.qualified_name(table, schema), clause.to_suffix());
    PlannedQuery { sql, params: clause.params }
  }
}
