//! Turns structure-editor changes into DDL.
//!
//! Statements are only ever handed out inside a [`DdlPreview`]; executing them requires turning
//! the preview into a [`ConfirmedDdl`], so nothing runs without having been shown first.

use std::collections::BTreeSet;

use crate::{
  dialect::{is_safe_identifier, Dialect},
  error::Result,
  models::TableRef,
  structure::{validate_columns, ColumnStatus, SchemaColumn, StructureColumn},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlPreview {
  table: TableRef,
  dialect: Dialect,
  statements: Vec<String>,
}

impl DdlPreview {
  pub fn table(&self) -> &TableRef {
    &self.table
  }

  pub fn dialect(&self) -> Dialect {
    self.dialect
  }

  pub fn statements(&self) -> &[String] {
    &self.statements
  }

  pub fn is_empty(&self) -> bool {
    self.statements.is_empty()
  }

  /// Statements formatted for display.
  pub fn pretty(&self) -> String {
    self
      .statements
      .iter()
      .map(|s| sqlformat::format(s, &sqlformat::QueryParams::None, sqlformat::FormatOptions::default()))
      .collect::<Vec<_>>()
      .join("\n\n")
  }

  /// The caller has shown the statements and the user accepted them.
  pub fn confirm(self) -> ConfirmedDdl {
    ConfirmedDdl { table: self.table, statements: self.statements }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDdl {
  table: TableRef,
  statements: Vec<String>,
}

impl ConfirmedDdl {
  pub fn table(&self) -> &TableRef {
    &self.table
  }

  pub fn statements(&self) -> &[String] {
    &self.statements
  }
}

struct Classified<'a> {
  deleted: Vec<&'a StructureColumn>,
  modified: Vec<(&'a StructureColumn, &'a SchemaColumn)>,
  added: Vec<&'a StructureColumn>,
}

fn classify(columns: &[StructureColumn]) -> Classified<'_> {
  let mut classified = Classified { deleted: Vec::new(), modified: Vec::new(), added: Vec::new() };
  for column in columns {
    match (column.status, column.original()) {
      (ColumnStatus::Existing, _) if column.deleted => classified.deleted.push(column),
      (ColumnStatus::Existing, Some(original)) if column.is_modified() => classified.modified.push((column, original)),
      (ColumnStatus::Added, _) if !column.deleted && !column.column.name.trim().is_empty() => {
        classified.added.push(column)
      },
      _ => {},
    }
  }
  classified
}

/// Primary key column names before and after the edit, when they differ.
fn primary_key_change(columns: &[StructureColumn]) -> Option<(Vec<String>, Vec<String>)> {
  let before: BTreeSet<String> = columns
    .iter()
    .filter_map(|c| c.original())
    .filter(|o| o.is_primary_key)
    .map(|o| o.name.clone())
    .collect();
  let after_columns: Vec<String> = columns
    .iter()
    .filter(|c| !c.deleted && c.column.is_primary_key && !c.column.name.trim().is_empty())
    .map(|c| c.column.name.clone())
    .collect();

  // Dropping a key column takes the key with it, so only surviving columns count.
  let flags_changed = columns.iter().filter(|c| !c.deleted).any(|c| match c.original() {
    Some(o) => o.is_primary_key != c.column.is_primary_key,
    None => c.column.is_primary_key,
  });
  if !flags_changed {
    return None;
  }
  Some((before.into_iter().collect(), after_columns))
}

pub struct SchemaDiffCompiler {
  dialect: Dialect,
  primary_key_name: Option<String>,
}

impl SchemaDiffCompiler {
  pub fn new(dialect: Dialect) -> Self {
    Self { dialect, primary_key_name: None }
  }

  /// Name of the existing primary key constraint. Postgres falls back to `<table>_pkey`.
  pub fn with_primary_key_name(mut self, name: Option<String>) -> Self {
    self.primary_key_name = name.filter(|n| !n.trim().is_empty());
    self
  }

  /// Validates names, then diffs every column against its load-time snapshot.
  pub fn compile(&self, table: &TableRef, columns: &[StructureColumn]) -> Result<DdlPreview> {
    validate_columns(columns)?;
    let statements = match self.dialect {
      Dialect::MySql => self.mysql(table, columns),
      Dialect::Postgres => self.postgres(table, columns),
    };
    tracing::debug!(%table, statements = statements.len(), "compiled structure changes");
    Ok(DdlPreview { table: table.clone(), dialect: self.dialect, statements })
  }

  fn quote(&self, name: &str) -> String {
    self.dialect.quote_identifier(name)
  }

  fn default_clause(&self, value: &str) -> String {
    if self.dialect.is_safe_default_literal(value) {
      format!("DEFAULT {}", value.trim())
    } else {
      format!("DEFAULT {}", self.dialect.quote_string_literal(value))
    }
  }

  fn mysql_definition(&self, column: &SchemaColumn) -> String {
    let mut parts = vec![column.data_type.trim().to_string()];
    if let Some(charset) = column.charset.as_deref().filter(|c| is_safe_identifier(c)) {
      parts.push(format!("CHARACTER SET {charset}"));
    }
    if let Some(collation) = column.collation.as_deref().filter(|c| is_safe_identifier(c)) {
      parts.push(format!("COLLATE {collation}"));
    }
    parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
    if column.is_auto_increment {
      parts.push("AUTO_INCREMENT".to_string());
    } else if let Some(default) = &column.default_value {
      parts.push(self.default_clause(default));
    }
    if !column.comment.is_empty() {
      parts.push(format!("COMMENT {}", self.dialect.quote_string_literal(&column.comment)));
    }
    parts.join(" ")
  }

  fn mysql(&self, table: &TableRef, columns: &[StructureColumn]) -> Vec<String> {
    let Classified { deleted, modified, added } = classify(columns);
    let mut clauses = Vec::new();

    for column in deleted {
      clauses.push(format!("DROP COLUMN {}", self.quote(&column.original_name)));
    }
    for (column, _) in modified {
      let definition = self.mysql_definition(&column.column);
      if column.is_renamed() {
        clauses.push(format!(
          "CHANGE COLUMN {} {} {definition}",
          self.quote(&column.original_name),
          self.quote(&column.column.name)
        ));
      } else {
        clauses.push(format!("MODIFY COLUMN {} {definition}", self.quote(&column.column.name)));
      }
    }
    for column in added {
      clauses.push(format!("ADD COLUMN {} {}", self.quote(&column.column.name), self.mysql_definition(&column.column)));
    }
    if let Some((before, after)) = primary_key_change(columns) {
      if !before.is_empty() {
        clauses.push("DROP PRIMARY KEY".to_string());
      }
      if !after.is_empty() {
        clauses.push(format!("ADD PRIMARY KEY ({})", self.quote_list(&after)));
      }
    }

    if clauses.is_empty() {
      return Vec::new();
    }
    let name = self.dialect.qualified_name(&table.name, table.schema());
    vec![format!("ALTER TABLE {name} {};", clauses.join(", "))]
  }

  fn postgres_type(&self, column: &SchemaColumn) -> String {
    match column.collation.as_deref().filter(|c| is_safe_identifier(c)) {
      Some(collation) => format!("{} COLLATE {}", column.data_type.trim(), self.quote(collation)),
      None => column.data_type.trim().to_string(),
    }
  }

  fn postgres(&self, table: &TableRef, columns: &[StructureColumn]) -> Vec<String> {
    let Classified { deleted, modified, added } = classify(columns);
    let name = self.dialect.qualified_name(&table.name, table.schema());
    let comment_table = format!(
      "{}.{}",
      self.quote(table.schema().unwrap_or("public")),
      self.quote(&table.name)
    );

    let mut renames = Vec::new();
    let mut clauses = Vec::new();
    let mut comments = Vec::new();

    for column in deleted {
      clauses.push(format!("DROP COLUMN {}", self.quote(&column.original_name)));
    }

    for (column, original) in modified {
      let current = &column.column;
      let col = self.quote(&current.name);
      if column.is_renamed() {
        renames.push(format!(
          "ALTER TABLE {name} RENAME COLUMN {} TO {col};",
          self.quote(&column.original_name)
        ));
      }
      if current.data_type != original.data_type || current.collation != original.collation {
        clauses.push(format!("ALTER COLUMN {col} TYPE {}", self.postgres_type(current)));
      }
      if current.nullable != original.nullable {
        let action = if current.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
        clauses.push(format!("ALTER COLUMN {col} {action}"));
      }
      if current.is_auto_increment != original.is_auto_increment {
        let action =
          if current.is_auto_increment { "ADD GENERATED BY DEFAULT AS IDENTITY" } else { "DROP IDENTITY IF EXISTS" };
        clauses.push(format!("ALTER COLUMN {col} {action}"));
      }
      if current.default_value != original.default_value && !current.is_auto_increment {
        match &current.default_value {
          Some(default) => clauses.push(format!("ALTER COLUMN {col} SET {}", self.default_clause(default))),
          None => clauses.push(format!("ALTER COLUMN {col} DROP DEFAULT")),
        }
      }
      if current.comment != original.comment {
        comments.push(self.postgres_comment(&comment_table, current));
      }
    }

    for column in added {
      let current = &column.column;
      let mut definition = vec![self.postgres_type(current)];
      if !current.nullable {
        definition.push("NOT NULL".to_string());
      }
      if current.is_auto_increment {
        definition.push("GENERATED BY DEFAULT AS IDENTITY".to_string());
      } else if let Some(default) = &current.default_value {
        definition.push(self.default_clause(default));
      }
      clauses.push(format!("ADD COLUMN {} {}", self.quote(&current.name), definition.join(" ")));
      if !current.comment.is_empty() {
        comments.push(self.postgres_comment(&comment_table, current));
      }
    }

    if let Some((before, after)) = primary_key_change(columns) {
      if !before.is_empty() {
        let constraint = self.primary_key_name.clone().unwrap_or_else(|| format!("{}_pkey", table.name));
        clauses.push(format!("DROP CONSTRAINT {}", self.quote(&constraint)));
      }
      if !after.is_empty() {
        clauses.push(format!("ADD PRIMARY KEY ({})", self.quote_list(&after)));
      }
    }

    let mut statements = renames;
    if !clauses.is_empty() {
      statements.push(format!("ALTER TABLE {name} {};", clauses.join(", ")));
    }
    statements.extend(comments);
    statements
  }

  fn postgres_comment(&self, comment_table: &str, column: &SchemaColumn) -> String {
    let value = if column.comment.is_empty() {
      "NULL".to_string()
    } else {
      self.dialect.quote_string_literal(&column.comment)
    };
    format!("COMMENT ON COLUMN {comment_table}.{} IS {value};", self.quote(&column.name))
  }

  fn quote_list(&self, names: &[String]) -> String {
    names.iter().map(|n| self.quote(n)).collect::<Vec<_>>().join(", ")
  }
}
