use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use table_crafter::{
    dialect::Dialect,
    error::{Error, Result},
    executor::QueryExecutor,
    models::{Field, QueryResult, TableRef, TableStructure},
};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<Value>,
}

struct Hold {
    prefix: String,
    release: Arc<Notify>,
}

/// Scripted stand-in for a database session. Every statement is recorded in order.
pub struct FakeExecutor {
    dialect: Dialect,
    page: Mutex<QueryResult>,
    count: Mutex<u64>,
    estimate: Mutex<Option<u64>>,
    structure: Mutex<TableStructure>,
    failures: Mutex<Vec<(String, String)>>,
    hold: Mutex<Option<Hold>>,
    recorded: Mutex<Vec<Recorded>>,
}

impl FakeExecutor {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            page: Mutex::new(QueryResult::default()),
            count: Mutex::new(0),
            estimate: Mutex::new(Some(0)),
            structure: Mutex::new(TableStructure::default()),
            failures: Mutex::new(Vec::new()),
            hold: Mutex::new(None),
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn postgres() -> Self {
        Self::new(Dialect::Postgres)
    }

    pub fn mysql() -> Self {
        Self::new(Dialect::MySql)
    }

    pub fn with_page(self, page: QueryResult) -> Self {
        *self.page.lock().unwrap() = page;
        self
    }

    pub fn with_count(self, count: u64) -> Self {
        *self.count.lock().unwrap() = count;
        self
    }

    /// `None` makes the estimate fail.
    pub fn with_estimate(self, estimate: Option<u64>) -> Self {
        *self.estimate.lock().unwrap() = estimate;
        self
    }

    pub fn with_structure(self, structure: TableStructure) -> Self {
        self.set_structure(structure);
        self
    }

    pub fn set_structure(&self, structure: TableStructure) {
        *self.structure.lock().unwrap() = structure;
    }

    /// Any statement containing `needle` fails with `message`.
    pub fn fail_when(&self, needle: &str, message: &str) {
        self.failures.lock().unwrap().push((needle.to_string(), message.to_string()));
    }

    /// The next statement starting with `prefix` waits until the returned handle is notified.
    pub fn hold_next(&self, prefix: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(Hold { prefix: prefix.to_string(), release: release.clone() });
        release
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.recorded().into_iter().map(|r| r.sql).collect()
    }

    pub fn reset_recorded(&self) {
        self.recorded.lock().unwrap().clear();
    }

    fn take_hold(&self, sql: &str) -> Option<Arc<Notify>> {
        let mut hold = self.hold.lock().unwrap();
        if hold.as_ref().is_some_and(|h| sql.starts_with(&h.prefix)) {
            return hold.take().map(|h| h.release);
        }
        None
    }

    fn failure_for(&self, sql: &str) -> Option<String> {
        self.failures.lock().unwrap().iter().find(|(needle, _)| sql.contains(needle.as_str())).map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.recorded.lock().unwrap().push(Recorded { sql: sql.to_string(), params: params.to_vec() });

        if let Some(release) = self.take_hold(sql) {
            release.notified().await;
        }
        if let Some(message) = self.failure_for(sql) {
            return Err(Error::query(message));
        }

        if sql.starts_with("SELECT COUNT(*)") {
            let count = *self.count.lock().unwrap();
            return Ok(QueryResult {
                rows: vec![vec![json!(count)]],
                fields: vec![Field { name: "count".into(), data_type: "INT8".into() }],
                row_count: 1,
                execution_time_ms: 1,
            });
        }
        if sql.starts_with("SELECT *") {
            return Ok(self.page.lock().unwrap().clone());
        }
        Ok(QueryResult { row_count: 1, ..Default::default() })
    }

    async fn estimate_row_count(&self, _table: &TableRef) -> Result<u64> {
        let estimate = *self.estimate.lock().unwrap();
        estimate.ok_or_else(|| Error::query("permission denied for pg_class"))
    }

    async fn table_structure(&self, _table: &TableRef) -> Result<TableStructure> {
        Ok(self.structure.lock().unwrap().clone())
    }
}
