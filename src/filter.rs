use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::dialect::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FilterOperator {
  Equals,
  NotEquals,
  Contains,
  NotContains,
  StartsWith,
  EndsWith,
  GreaterThan,
  LessThan,
  GreaterOrEqual,
  LessOrEqual,
  IsNull,
  IsNotNull,
  /// Comma separated list of values.
  In,
}

impl FilterOperator {
  pub fn takes_value(self) -> bool {
    !matches!(self, Self::IsNull | Self::IsNotNull)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableFilter {
  pub id: String,
  pub enabled: bool,
  pub column: String,
  pub operator: FilterOperator,
  pub value: String,
}

impl TableFilter {
  pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      enabled: true,
      column: column.into(),
      operator,
      value: value.into(),
    }
  }

  pub fn disabled(mut self) -> Self {
    self.enabled = false;
    self
  }
}

pub fn any_enabled(filters: &[TableFilter]) -> bool {
  filters.iter().any(|f| f.enabled)
}

/// Conditions without the `WHERE` keyword. Empty `sql` means no filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
  pub sql: String,
  pub params: Vec<Value>,
}

impl WhereClause {
  pub fn is_empty(&self) -> bool {
    self.sql.is_empty()
  }

  /// ` WHERE ...` ready to append after a FROM clause, or nothing.
  pub fn to_suffix(&self) -> String {
    if self.is_empty() {
      String::new()
    } else {
      format!(" WHERE {}", self.sql)
    }
  }
}

/// Translates the filter list into SQL. Placeholders start at `first_placeholder` so callers can
/// append more parameters after the filter values.
pub trait WhereBuilder: Send + Sync {
  fn build_where_clause(&self, filters: &[TableFilter], dialect: Dialect, first_placeholder: usize) -> WhereClause;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterTranslator;

impl WhereBuilder for FilterTranslator {
  fn build_where_clause(&self, filters: &[TableFilter], dialect: Dialect, first_placeholder: usize) -> WhereClause {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    for filter in filters.iter().filter(|f| f.enabled && !f.column.is_empty()) {
      let column = dialect.quote_identifier(&filter.column);
      let text_column = match dialect {
        Dialect::Postgres => format!("{column}::text"),
        Dialect::MySql => column.clone(),
      };

      let condition = match filter.operator {
        FilterOperator::IsNull => format!("{column} IS NULL"),
        FilterOperator::IsNotNull => format!("{column} IS NOT NULL"),
        FilterOperator::In => {
          let values: Vec<&str> = filter.value.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
          if values.is_empty() {
            continue;
          }
          let mut placeholders = Vec::with_capacity(values.len());
          for value in values {
            placeholders.push(dialect.placeholder(first_placeholder + params.len()));
            params.push(Value::String(value.to_string()));
          }
          format!("{text_column} IN ({})", placeholders.join(", "))
        },
        FilterOperator::GreaterThan
        | FilterOperator::LessThan
        | FilterOperator::GreaterOrEqual
        | FilterOperator::LessOrEqual => {
          let sql_op = match filter.operator {
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterOrEqual => ">=",
            _ => "<=",
          };
          let ph = dialect.placeholder(first_placeholder + params.len());
          // Numbers compare numerically against the raw column, anything else as text.
          match numeric_value(&filter.value) {
            Some(number) => {
              params.push(number);
              format!("{column} {sql_op} {ph}")
            },
            None => {
              params.push(Value::String(filter.value.clone()));
              format!("{text_column} {sql_op} {ph}")
            },
          }
        },
        op => {
          let (sql_op, pattern) = match op {
            FilterOperator::NotEquals => ("<>", filter.value.clone()),
            FilterOperator::Contains => ("LIKE", format!("%{}%", escape_like(&filter.value))),
            FilterOperator::NotContains => ("NOT LIKE", format!("%{}%", escape_like(&filter.value))),
            FilterOperator::StartsWith => ("LIKE", format!("{}%", escape_like(&filter.value))),
            FilterOperator::EndsWith => ("LIKE", format!("%{}", escape_like(&filter.value))),
            _ => ("=", filter.value.clone()),
          };
          let ph = dialect.placeholder(first_placeholder + params.len());
          params.push(Value::String(pattern));
          format!("{text_column} {sql_op} {ph}")
        },
      };
      conditions.push(condition);
    }

    WhereClause { sql: conditions.join(" AND "), params }
  }
}

fn numeric_value(value: &str) -> Option<Value> {
  let value = value.trim();
  if let Ok(int) = value.parse::<i64>() {
    return Some(Value::from(int));
  }
  value.parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::from)
}

fn escape_like(value: &str) -> String {
  value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
