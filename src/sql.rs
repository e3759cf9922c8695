use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use sqlx::{
  mysql::{MySqlPoolOptions, MySqlRow},
  postgres::{PgPoolOptions, PgRow},
  types::Uuid,
  Column, Row, TypeInfo,
};
use tokio_stream::StreamExt as OtherStream;

use crate::{
  dialect::Dialect,
  error::{Error, Result},
  executor::QueryExecutor,
  models::{Field, ForeignKeyInfo, IndexInfo, QueryResult, TableRef, TableStructure},
  structure::SchemaColumn,
};

/// Open a single-connection session for `url`, choosing the backend from its scheme.
pub async fn connect(url: &str) -> Result<Arc<dyn QueryExecutor>> {
  match Dialect::from_url(url) {
    Some(Dialect::Postgres) => Ok(Arc::new(Postgres::new(url).await?)),
    Some(Dialect::MySql) => Ok(Arc::new(MySql::new(url).await?)),
    None => Err(Error::query(format!("unsupported connection url: {url}"))),
  }
}

/// Binds JSON cell values in order. Integers bind as BIGINT, other numbers as DOUBLE.
macro_rules! bind_params {
  ($query:expr, $params:expr) => {{
    let mut query = $query;
    for value in $params {
      query = match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
          Some(i) => query.bind(i),
          None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(sqlx::types::Json(other.clone())),
      };
    }
    query
  }};
}

/// Tries each decoding in turn; the first type the column accepts wins.
macro_rules! decode_first {
  ($row:expr, $idx:expr; $($ty:ty => $conv:expr),+ $(,)?) => {{
    $(
      if let Ok(value) = $row.try_get::<Option<$ty>, _>($idx) {
        return Ok(value.map_or(Value::Null, $conv));
      }
    )+
  }};
}

fn returns_rows(sql: &str) -> bool {
  let head = sql.trim_start().split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
  matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "VALUES" | "TABLE" | "DESCRIBE")
    || sql.to_ascii_uppercase().contains(" RETURNING ")
}

fn elapsed_ms(start: Instant) -> u64 {
  let elapsed = start.elapsed();
  let millis = elapsed.as_millis() as u64;
  // Show at least 1ms for very fast queries
  if elapsed.as_micros() > 0 && millis == 0 {
    1
  } else {
    millis
  }
}

pub struct Postgres {
  pool: sqlx::PgPool,
}

impl Postgres {
  pub async fn new(conn_str: &str) -> Result<Self> {
    // One connection: BEGIN, the staged statements and COMMIT must share a session.
    let pool = PgPoolOptions::new().max_connections(1).connect(conn_str).await?;
    Ok(Self { pool })
  }
}

#[async_trait]
impl QueryExecutor for Postgres {
  fn dialect(&self) -> Dialect {
    Dialect::Postgres
  }

  async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start = Instant::now();
    let query = bind_params!(sqlx::query(sql), params);

    if !returns_rows(sql) {
      let done = query.execute(&self.pool).await?;
      return Ok(QueryResult {
        row_count: done.rows_affected(),
        execution_time_ms: elapsed_ms(start),
        ..Default::default()
      });
    }

    let mut rows = query.fetch(&self.pool);
    let mut fields = vec![];
    let mut results = vec![];
    while let Some(row) = rows.try_next().await? {
      if fields.is_empty() {
        fields = row
          .columns()
          .iter()
          .map(|c| Field { name: c.name().to_string(), data_type: c.type_info().name().to_string() })
          .collect();
      }
      let mut row_result = Vec::with_capacity(row.columns().len());
      for idx in 0..row.columns().len() {
        row_result.push(get_pg_value(&row, idx)?);
      }
      results.push(row_result);
    }

    let row_count = results.len() as u64;
    Ok(QueryResult { rows: results, fields, row_count, execution_time_ms: elapsed_ms(start) })
  }

  async fn estimate_row_count(&self, table: &TableRef) -> Result<u64> {
    let estimate: Option<i64> = sqlx::query_scalar(
      "SELECT c.reltuples::bigint
       FROM pg_class c
       JOIN pg_namespace n ON n.oid = c.relnamespace
       WHERE c.relname = $1 AND n.nspname = $2",
    )
    .bind(&table.name)
    .bind(table.schema().unwrap_or("public"))
    .fetch_optional(&self.pool)
    .await?;
    // reltuples is -1 for tables that were never analyzed
    Ok(estimate.unwrap_or(0).max(0) as u64)
  }

  async fn table_structure(&self, table: &TableRef) -> Result<TableStructure> {
    let schema = table.schema().unwrap_or("public");
    let rows = sqlx::query(
      "SELECT c.column_name::text AS column_name,
              c.data_type::text AS data_type,
              format_type(a.atttypid, a.atttypmod) AS full_type,
              c.is_nullable::text AS is_nullable,
              c.column_default::text AS column_default,
              c.ordinal_position::int4 AS ordinal_position,
              c.is_identity::text AS is_identity,
              c.is_generated::text AS is_generated,
              c.generation_expression::text AS generation_expression,
              c.character_set_name::text AS character_set_name,
              c.collation_name::text AS collation_name,
              col_description(a.attrelid, a.attnum) AS comment,
              EXISTS (
                SELECT 1 FROM pg_index i
                WHERE i.indrelid = a.attrelid AND i.indisprimary AND a.attnum = ANY(i.indkey)
              ) AS is_primary
       FROM information_schema.columns c
       JOIN pg_namespace n ON n.nspname = c.table_schema
       JOIN pg_class cl ON cl.relname = c.table_name AND cl.relnamespace = n.oid
       JOIN pg_attribute a ON a.attrelid = cl.oid AND a.attname = c.column_name
       WHERE c.table_schema = $1 AND c.table_name = $2
       ORDER BY c.ordinal_position",
    )
    .bind(schema)
    .bind(&table.name)
    .fetch_all(&self.pool)
    .await?;

    let columns = rows
      .into_iter()
      .filter_map(|row| {
        let name = row.try_get::<String, _>("column_name").ok()?;
        let data_type = row
          .try_get::<Option<String>, _>("full_type")
          .ok()
          .flatten()
          .or_else(|| row.try_get::<String, _>("data_type").ok())?;
        let default_value = row.try_get::<Option<String>, _>("column_default").ok().flatten();
        let is_identity = row.try_get::<String, _>("is_identity").map(|v| v == "YES").unwrap_or(false);
        let is_serial = default_value.as_deref().is_some_and(|d| d.starts_with("nextval("));
        let is_primary_key = row.try_get::<bool, _>("is_primary").unwrap_or(false);
        Some(SchemaColumn {
          name,
          data_type,
          nullable: row.try_get::<String, _>("is_nullable").map(|v| v == "YES").unwrap_or(true),
          is_auto_increment: is_identity || is_serial,
          default_value,
          is_primary_key,
          comment: row.try_get::<Option<String>, _>("comment").ok().flatten().unwrap_or_default(),
          charset: row.try_get::<Option<String>, _>("character_set_name").ok().flatten(),
          collation: row.try_get::<Option<String>, _>("collation_name").ok().flatten(),
          ordinal_position: row.try_get::<i32, _>("ordinal_position").unwrap_or_default().max(0) as u32,
          column_key: if is_primary_key { "PRI".to_string() } else { String::new() },
          is_generated: row.try_get::<String, _>("is_generated").map(|v| v == "ALWAYS").unwrap_or(false),
          generation_expression: row.try_get::<Option<String>, _>("generation_expression").ok().flatten(),
        })
      })
      .collect();

    let index_rows = sqlx::query(
      "SELECT ic.relname::text AS index_name,
              i.indisunique AS is_unique,
              i.indisprimary AS is_primary,
              array_agg(a.attname::text ORDER BY k.ord) AS columns
       FROM pg_index i
       JOIN pg_class t ON t.oid = i.indrelid
       JOIN pg_namespace n ON n.oid = t.relnamespace
       JOIN pg_class ic ON ic.oid = i.indexrelid
       CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, ord)
       JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
       WHERE n.nspname = $1 AND t.relname = $2
       GROUP BY ic.relname, i.indisunique, i.indisprimary
       ORDER BY ic.relname",
    )
    .bind(schema)
    .bind(&table.name)
    .fetch_all(&self.pool)
    .await?;

    let indexes = index_rows
      .into_iter()
      .filter_map(|row| {
        Some(IndexInfo {
          name: row.try_get("index_name").ok()?,
          columns: row.try_get("columns").ok()?,
          is_unique: row.try_get("is_unique").unwrap_or(false),
          is_primary: row.try_get("is_primary").unwrap_or(false),
        })
      })
      .collect();

    let fk_rows = sqlx::query(
      "SELECT con.conname::text AS name,
              ARRAY(SELECT a.attname::text FROM unnest(con.conkey) WITH ORDINALITY k(n, o)
                    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.n ORDER BY k.o) AS columns,
              ref.relname::text AS referenced_table,
              ARRAY(SELECT a.attname::text FROM unnest(con.confkey) WITH ORDINALITY k(n, o)
                    JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.n ORDER BY k.o)
                AS referenced_columns
       FROM pg_constraint con
       JOIN pg_class t ON t.oid = con.conrelid
       JOIN pg_namespace n ON n.oid = t.relnamespace
       JOIN pg_class ref ON ref.oid = con.confrelid
       WHERE con.contype = 'f' AND n.nspname = $1 AND t.relname = $2
       ORDER BY con.conname",
    )
    .bind(schema)
    .bind(&table.name)
    .fetch_all(&self.pool)
    .await?;

    let foreign_keys = fk_rows
      .into_iter()
      .filter_map(|row| {
        Some(ForeignKeyInfo {
          name: row.try_get("name").ok()?,
          columns: row.try_get("columns").ok()?,
          referenced_table: row.try_get("referenced_table").ok()?,
          referenced_columns: row.try_get("referenced_columns").ok()?,
        })
      })
      .collect();

    Ok(TableStructure { columns, indexes, foreign_keys })
  }
}

pub struct MySql {
  pool: sqlx::MySqlPool,
}

impl MySql {
  pub async fn new(conn_str: &str) -> Result<Self> {
    let pool = MySqlPoolOptions::new().max_connections(1).connect(conn_str).await?;
    Ok(Self { pool })
  }
}

#[async_trait]
impl QueryExecutor for MySql {
  fn dialect(&self) -> Dialect {
    Dialect::MySql
  }

  async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start = Instant::now();
    let query = bind_params!(sqlx::query(sql), params);

    if !returns_rows(sql) {
      let done = query.execute(&self.pool).await?;
      return Ok(QueryResult {
        row_count: done.rows_affected(),
        execution_time_ms: elapsed_ms(start),
        ..Default::default()
      });
    }

    let mut rows = query.fetch(&self.pool);
    let mut fields = vec![];
    let mut results = vec![];
    while let Some(row) = rows.try_next().await? {
      if fields.is_empty() {
        fields = row
          .columns()
          .iter()
          .map(|c| Field { name: c.name().to_string(), data_type: c.type_info().name().to_string() })
          .collect();
      }
      let mut row_result = Vec::with_capacity(row.columns().len());
      for idx in 0..row.columns().len() {
        row_result.push(get_mysql_value(&row, idx)?);
      }
      results.push(row_result);
    }

    let row_count = results.len() as u64;
    Ok(QueryResult { rows: results, fields, row_count, execution_time_ms: elapsed_ms(start) })
  }

  async fn estimate_row_count(&self, table: &TableRef) -> Result<u64> {
    let estimate: Option<Option<u64>> = sqlx::query_scalar(
      "SELECT TABLE_ROWS FROM information_schema.TABLES
       WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?",
    )
    .bind(table.schema())
    .bind(&table.name)
    .fetch_optional(&self.pool)
    .await?;
    Ok(estimate.flatten().unwrap_or(0))
  }

  async fn table_structure(&self, table: &TableRef) -> Result<TableStructure> {
    let rows = sqlx::query(
      "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
              CAST(COLUMN_TYPE AS CHAR) AS column_type,
              CAST(IS_NULLABLE AS CHAR) AS is_nullable,
              CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
              CAST(COLUMN_KEY AS CHAR) AS column_key,
              CAST(EXTRA AS CHAR) AS extra,
              CAST(COLUMN_COMMENT AS CHAR) AS column_comment,
              CAST(CHARACTER_SET_NAME AS CHAR) AS character_set_name,
              CAST(COLLATION_NAME AS CHAR) AS collation_name,
              CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position,
              CAST(GENERATION_EXPRESSION AS CHAR) AS generation_expression
       FROM information_schema.COLUMNS
       WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
       ORDER BY ORDINAL_POSITION",
    )
    .bind(table.schema())
    .bind(&table.name)
    .fetch_all(&self.pool)
    .await?;

    let columns = rows
      .into_iter()
      .filter_map(|row| {
        let extra = row.try_get::<Option<String>, _>("extra").ok().flatten().unwrap_or_default().to_lowercase();
        let column_key = row.try_get::<Option<String>, _>("column_key").ok().flatten().unwrap_or_default();
        let generation_expression =
          row.try_get::<Option<String>, _>("generation_expression").ok().flatten().filter(|e| !e.is_empty());
        Some(SchemaColumn {
          name: row.try_get("column_name").ok()?,
          data_type: row.try_get("column_type").ok()?,
          nullable: row.try_get::<String, _>("is_nullable").map(|v| v == "YES").unwrap_or(true),
          default_value: row.try_get::<Option<String>, _>("column_default").ok().flatten(),
          is_primary_key: column_key == "PRI",
          is_auto_increment: extra.contains("auto_increment"),
          comment: row.try_get::<Option<String>, _>("column_comment").ok().flatten().unwrap_or_default(),
          charset: row.try_get::<Option<String>, _>("character_set_name").ok().flatten(),
          collation: row.try_get::<Option<String>, _>("collation_name").ok().flatten(),
          ordinal_position: row.try_get::<i64, _>("ordinal_position").unwrap_or_default().max(0) as u32,
          column_key,
          is_generated: extra.contains("generated"),
          generation_expression,
        })
      })
      .collect();

    let index_rows = sqlx::query(
      "SELECT CAST(INDEX_NAME AS CHAR) AS index_name,
              CAST(NON_UNIQUE AS SIGNED) AS non_unique,
              CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) AS CHAR) AS columns
       FROM information_schema.STATISTICS
       WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
       GROUP BY INDEX_NAME, NON_UNIQUE
       ORDER BY INDEX_NAME",
    )
    .bind(table.schema())
    .bind(&table.name)
    .fetch_all(&self.pool)
    .await?;

    let indexes = index_rows
      .into_iter()
      .filter_map(|row| {
        let name: String = row.try_get("index_name").ok()?;
        let columns: String = row.try_get("columns").ok()?;
        Some(IndexInfo {
          is_primary: name == "PRIMARY",
          is_unique: row.try_get::<i64, _>("non_unique").map(|v| v == 0).unwrap_or(false),
          columns: columns.split(',').map(str::to_string).collect(),
          name,
        })
      })
      .collect();

    let fk_rows = sqlx::query(
      "SELECT CAST(CONSTRAINT_NAME AS CHAR) AS name,
              CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY ORDINAL_POSITION) AS CHAR) AS columns,
              CAST(REFERENCED_TABLE_NAME AS CHAR) AS referenced_table,
              CAST(GROUP_CONCAT(REFERENCED_COLUMN_NAME ORDER BY ORDINAL_POSITION) AS CHAR) AS referenced_columns
       FROM information_schema.KEY_COLUMN_USAGE
       WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL
       GROUP BY CONSTRAINT_NAME, REFERENCED_TABLE_NAME
       ORDER BY CONSTRAINT_NAME",
    )
    .bind(table.schema())
    .bind(&table.name)
    .fetch_all(&self.pool)
    .await?;

    let foreign_keys = fk_rows
      .into_iter()
      .filter_map(|row| {
        let columns: String = row.try_get("columns").ok()?;
        let referenced: String = row.try_get("referenced_columns").ok()?;
        Some(ForeignKeyInfo {
          name: row.try_get("name").ok()?,
          columns: columns.split(',').map(str::to_string).collect(),
          referenced_table: row.try_get("referenced_table").ok()?,
          referenced_columns: referenced.split(',').map(str::to_string).collect(),
        })
      })
      .collect();

    Ok(TableStructure { columns, indexes, foreign_keys })
  }
}

fn get_pg_value(row: &PgRow, idx: usize) -> Result<Value> {
  decode_first!(row, idx;
    bool => Value::Bool,
    i16 => Value::from,
    i32 => Value::from,
    i64 => Value::from,
    f32 => |v: f32| Value::from(v as f64),
    f64 => Value::from,
    rust_decimal::Decimal => |v: rust_decimal::Decimal| Value::String(v.to_string()),
    String => Value::String,
    chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()),
    NaiveDateTime => |v: NaiveDateTime| Value::String(v.to_string()),
    NaiveDate => |v: NaiveDate| Value::String(v.to_string()),
    NaiveTime => |v: NaiveTime| Value::String(v.to_string()),
    Uuid => |v: Uuid| Value::String(v.to_string()),
    serde_json::Value => |v| v,
    Vec<String> => |v: Vec<String>| Value::from(v),
    Vec<u8> => |v: Vec<u8>| Value::String(format!("\\x{}", v.iter().map(|b| format!("{b:02x}")).collect::<String>())),
  );
  let column = row.columns().get(idx).map(|c| c.name().to_string()).unwrap_or_default();
  Err(Error::query(format!("Unknown type for column {column}")))
}

fn get_mysql_value(row: &MySqlRow, idx: usize) -> Result<Value> {
  // TINYINT(1) stays numeric; MySQL has no separate boolean type.
  decode_first!(row, idx;
    i64 => Value::from,
    u64 => Value::from,
    f32 => |v: f32| Value::from(v as f64),
    f64 => Value::from,
    rust_decimal::Decimal => |v: rust_decimal::Decimal| Value::String(v.to_string()),
    String => Value::String,
    chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| Value::String(v.to_rfc3339()),
    NaiveDateTime => |v: NaiveDateTime| Value::String(v.to_string()),
    NaiveDate => |v: NaiveDate| Value::String(v.to_string()),
    NaiveTime => |v: NaiveTime| Value::String(v.to_string()),
    serde_json::Value => |v| v,
    Vec<u8> => |v: Vec<u8>| Value::String(String::from_utf8_lossy(&v).into_owned()),
  );
  let column = row.columns().get(idx).map(|c| c.name().to_string()).unwrap_or_default();
  Err(Error::query(format!("Unknown type for column {column}")))
}
