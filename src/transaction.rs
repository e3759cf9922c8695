use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  dialect::Dialect,
  error::{Error, FailedChange, Result},
  executor::QueryExecutor,
  ledger::{ChangeKind, RowIdentity, StagedChange},
  models::TableRef,
};

/// What to do with updates and deletes on tables without a known primary key, where the whole
/// row is used to find the target and duplicate rows would all match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
  Allow,
  #[default]
  Warn,
  Refuse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
  pub sql: String,
  pub params: Vec<Value>,
  pub source: FailedChange,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
  pub updated: usize,
  pub inserted: usize,
  pub deleted: usize,
  pub rows_affected: u64,
}

impl CommitSummary {
  pub fn total(&self) -> usize {
    self.updated + self.inserted + self.deleted
  }
}

pub struct TransactionCompiler {
  dialect: Dialect,
  auto_increment: HashSet<String>,
  column_types: HashMap<String, String>,
  identity_policy: IdentityPolicy,
}

impl TransactionCompiler {
  pub fn new(dialect: Dialect) -> Self {
    Self {
      dialect,
      auto_increment: HashSet::new(),
      column_types: HashMap::new(),
      identity_policy: IdentityPolicy::default(),
    }
  }

  pub fn with_auto_increment<I, S>(mut self, columns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.auto_increment = columns.into_iter().map(Into::into).collect();
    self
  }

  /// Declared column types, as the structure query reports them. Postgres placeholders for
  /// these columns are cast to the declared type.
  pub fn with_column_types<I, C, T>(mut self, columns: I) -> Self
  where
    I: IntoIterator<Item = (C, T)>,
    C: Into<String>,
    T: Into<String>,
  {
    self.column_types = columns.into_iter().map(|(c, t)| (c.into(), t.into())).collect();
    self
  }

  pub fn with_identity_policy(mut self, policy: IdentityPolicy) -> Self {
    self.identity_policy = policy;
    self
  }

  /// Updates, then inserts, then deletes. `snapshot` is expected to hold changes of one table.
  pub fn compile(&self, snapshot: &[StagedChange]) -> Result<Vec<CompiledStatement>> {
    let by_kind = |kind: ChangeKind| snapshot.iter().filter(move |c| c.kind == kind);

    let mut statements = Vec::with_capacity(snapshot.len());
    for change in by_kind(ChangeKind::Update) {
      if let Some(statement) = self.compile_update(change)? {
        statements.push(statement);
      }
    }
    for change in by_kind(ChangeKind::Insert) {
      statements.push(self.compile_insert(change));
    }
    for change in by_kind(ChangeKind::Delete) {
      statements.push(self.compile_delete(change)?);
    }
    Ok(statements)
  }

  fn compile_update(&self, change: &StagedChange) -> Result<Option<CompiledStatement>> {
    if change.changes.is_empty() {
      return Ok(None);
    }
    let d = self.dialect;
    let mut params = Vec::new();
    let assignments: Vec<String> = change
      .changes
      .iter()
      .map(|(column, cell)| {
        params.push(cell.new.clone());
        format!("{} = {}", d.quote_identifier(column), self.value_expr(column, params.len()))
      })
      .collect();

    let identity = self.identity_for(change)?;
    let predicate = self.where_identity(identity, &mut params);
    let sql = format!(
      "UPDATE {} SET {} WHERE {predicate}{}",
      self.table_name(&change.table),
      assignments.join(", "),
      self.row_limit()
    );

    let column = change.column.clone().or_else(|| change.changes.keys().next().cloned());
    Ok(Some(CompiledStatement { sql, params, source: self.source(change, column) }))
  }

  fn compile_insert(&self, change: &StagedChange) -> CompiledStatement {
    let d = self.dialect;
    let table = self.table_name(&change.table);
    let values: Vec<&(String, Value)> = change
      .new_row
      .iter()
      .flatten()
      .filter(|(column, value)| !(value.is_null() && self.auto_increment.contains(column)))
      .collect();

    let sql = if values.is_empty() {
      match d {
        Dialect::Postgres => format!("INSERT INTO {table} DEFAULT VALUES"),
        Dialect::MySql => format!("INSERT INTO {table} () VALUES ()"),
      }
    } else {
      let columns: Vec<String> = values.iter().map(|(c, _)| d.quote_identifier(c)).collect();
      let placeholders: Vec<String> =
        values.iter().enumerate().map(|(i, (column, _))| self.value_expr(column, i + 1)).collect();
      format!("INSERT INTO {table} ({}) VALUES ({})", columns.join(", "), placeholders.join(", "))
    };

    CompiledStatement {
      sql,
      params: values.into_iter().map(|(_, v)| v.clone()).collect(),
      source: self.source(change, None),
    }
  }

  fn compile_delete(&self, change: &StagedChange) -> Result<CompiledStatement> {
    let mut params = Vec::new();
    let identity = self.identity_for(change)?;
    let predicate = self.where_identity(identity, &mut params);
    let sql = format!("DELETE FROM {} WHERE {predicate}{}", self.table_name(&change.table), self.row_limit());
    Ok(CompiledStatement { sql, params, source: self.source(change, None) })
  }

  fn identity_for<'c>(&self, change: &'c StagedChange) -> Result<&'c RowIdentity> {
    let identity = change
      .primary_key
      .as_ref()
      .filter(|id| !id.values.is_empty())
      .ok_or_else(|| Error::RowIdentity(format!("{} on {} has no identifying columns", change.kind, change.table)))?;

    if identity.full_row {
      match self.identity_policy {
        IdentityPolicy::Allow => {},
        IdentityPolicy::Warn => {
          tracing::warn!(table = %change.table, kind = %change.kind, "no primary key, matching on every column")
        },
        IdentityPolicy::Refuse => {
          return Err(Error::RowIdentity(format!("{} has no primary key; refusing to {}", change.table, change.kind)))
        },
      }
    }
    Ok(identity)
  }

  /// NULL-safe equality on every identity column. Placeholders continue after `params`.
  fn where_identity(&self, identity: &RowIdentity, params: &mut Vec<Value>) -> String {
    let d = self.dialect;
    identity
      .values
      .iter()
      .map(|(column, value)| {
        if value.is_null() {
          format!("{} IS NULL", d.quote_identifier(column))
        } else {
          params.push(value.clone());
          let quoted = d.quote_identifier(column);
          match self.cast_type(column) {
            // json has no equality operator
            Some(ty) if base_type(ty) == "json" => {
              format!("CAST({quoted} AS jsonb) = CAST({} AS jsonb)", d.placeholder(params.len()))
            },
            _ => format!("{quoted} = {}", self.value_expr(column, params.len())),
          }
        }
      })
      .collect::<Vec<_>>()
      .join(" AND ")
  }

  /// The placeholder for `column`, cast to its declared type on Postgres. Parameters bind as
  /// TEXT, BIGINT, DOUBLE, BOOLEAN or JSONB, which Postgres will not compare with or assign to
  /// other types implicitly. Textual columns stay uncast: an explicit cast to `varchar(n)`
  /// truncates instead of failing.
  fn value_expr(&self, column: &str, index: usize) -> String {
    let placeholder = self.dialect.placeholder(index);
    match self.cast_type(column) {
      Some(ty) => format!("CAST({placeholder} AS {ty})"),
      None => placeholder,
    }
  }

  fn cast_type(&self, column: &str) -> Option<&str> {
    if self.dialect != Dialect::Postgres {
      return None;
    }
    self.column_types.get(column).map(|ty| ty.trim()).filter(|ty| !ty.is_empty() && !is_textual(ty))
  }

  fn row_limit(&self) -> &'static str {
    if self.dialect.supports_update_limit() {
      " LIMIT 1"
    } else {
      ""
    }
  }

  fn table_name(&self, table: &TableRef) -> String {
    self.dialect.qualified_name(&table.name, table.schema())
  }

  fn source(&self, change: &StagedChange, column: Option<String>) -> FailedChange {
    FailedChange { table: change.table.to_string(), kind: change.kind, column }
  }

  /// BEGIN, every statement in order, COMMIT. The first failure stops the run and rolls back once.
  pub async fn execute(&self, executor: &dyn QueryExecutor, statements: &[CompiledStatement]) -> Result<CommitSummary> {
    let mut summary = CommitSummary::default();
    if statements.is_empty() {
      return Ok(summary);
    }

    executor.query(self.dialect.begin_statement(), &[]).await?;

    for statement in statements {
      tracing::debug!(sql = %statement.sql, params = statement.params.len(), "executing staged change");
      match executor.query(&statement.sql, &statement.params).await {
        Ok(result) => {
          summary.rows_affected += result.row_count;
          match statement.source.kind {
            ChangeKind::Update => summary.updated += 1,
            ChangeKind::Insert => summary.inserted += 1,
            ChangeKind::Delete => summary.deleted += 1,
          }
        },
        Err(err) => {
          let rollback_failed = rollback(executor).await;
          return Err(Error::Transaction {
            change: Some(statement.source.clone()),
            source: Box::new(err),
            rollback_failed,
          });
        },
      }
    }

    if let Err(err) = executor.query("COMMIT", &[]).await {
      let rollback_failed = rollback(executor).await;
      return Err(Error::Transaction { change: None, source: Box::new(err), rollback_failed });
    }

    tracing::info!(
      updated = summary.updated,
      inserted = summary.inserted,
      deleted = summary.deleted,
      "committed staged changes"
    );
    Ok(summary)
  }
}

/// `character varying(255)` is `character varying`; arrays keep their brackets.
fn base_type(data_type: &str) -> &str {
  let data_type = data_type.trim();
  if data_type.ends_with("[]") {
    return data_type;
  }
  data_type.split('(').next().unwrap_or(data_type).trim()
}

fn is_textual(data_type: &str) -> bool {
  let base = base_type(data_type).to_ascii_lowercase();
  matches!(
    base.as_str(),
    "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" | "citext" | "name"
  )
}

/// Attempted once. Returns true when the ROLLBACK itself failed.
async fn rollback(executor: &dyn QueryExecutor) -> bool {
  match executor.query("ROLLBACK", &[]).await {
    Ok(_) => false,
    Err(err) => {
      tracing::error!(error = %err, "rollback failed");
      true
    },
  }
}
