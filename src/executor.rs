use async_trait::async_trait;
use serde_json::Value;

use crate::{
  dialect::Dialect,
  error::Result,
  models::{QueryResult, TableRef, TableStructure},
};

/// One database session. Every call goes to the same underlying connection, so statements of a
/// transaction issued one after another see each other's effects.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
  fn dialect(&self) -> Dialect;

  async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

  /// Statistics based row count. Cheap, possibly stale.
  async fn estimate_row_count(&self, table: &TableRef) -> Result<u64>;

  async fn table_structure(&self, table: &TableRef) -> Result<TableStructure>;

  /// Runs each statement in order and stops at the first failure.
  async fn execute_statements(&self, statements: &[String]) -> Result<()> {
    for statement in statements {
      tracing::debug!(%statement, "executing statement");
      self.query(statement, &[]).await?;
    }
    Ok(())
  }
}
