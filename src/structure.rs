use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Column metadata as reported by the database, fetched once per table load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
  pub name: String,
  #[serde(rename = "type")]
  pub data_type: String,
  pub nullable: bool,
  pub default_value: Option<String>,
  pub is_primary_key: bool,
  pub is_auto_increment: bool,
  pub comment: String,
  pub charset: Option<String>,
  pub collation: Option<String>,
  pub ordinal_position: u32,
  pub column_key: String,
  pub is_generated: bool,
  pub generation_expression: Option<String>,
}

impl SchemaColumn {
  pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
    Self { name: name.into(), data_type: data_type.into(), nullable: true, ..Default::default() }
  }

  /// Fields the structure editor can change. Anything else differing is not a modification.
  fn editable_fields_differ(&self, other: &Self) -> bool {
    self.name != other.name
      || self.data_type != other.data_type
      || self.nullable != other.nullable
      || self.default_value != other.default_value
      || self.is_primary_key != other.is_primary_key
      || self.is_auto_increment != other.is_auto_increment
      || self.comment != other.comment
      || self.charset != other.charset
      || self.collation != other.collation
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnStatus {
  Existing,
  Added,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureColumn {
  #[serde(flatten)]
  pub column: SchemaColumn,
  pub uid: u64,
  pub status: ColumnStatus,
  pub deleted: bool,
  pub original_name: String,
  /// Snapshot taken at load time. `None` only for added columns.
  pub original: Option<SchemaColumn>,
}

impl StructureColumn {
  pub fn existing(uid: u64, column: SchemaColumn) -> Self {
    Self {
      uid,
      status: ColumnStatus::Existing,
      deleted: false,
      original_name: column.name.clone(),
      original: Some(column.clone()),
      column,
    }
  }

  pub fn added(uid: u64, column: SchemaColumn) -> Self {
    Self { uid, status: ColumnStatus::Added, deleted: false, original_name: String::new(), original: None, column }
  }

  /// Recomputed from the snapshot on every call.
  pub fn is_modified(&self) -> bool {
    match (&self.status, &self.original) {
      (ColumnStatus::Existing, Some(original)) => self.column.editable_fields_differ(original),
      _ => false,
    }
  }

  pub fn is_renamed(&self) -> bool {
    self.status == ColumnStatus::Existing && self.column.name != self.original_name
  }

  pub fn original(&self) -> Option<&SchemaColumn> {
    self.original.as_ref()
  }
}

/// Working copy of a table's columns while the structure editor is open.
#[derive(Debug, Clone, Default)]
pub struct StructureEditor {
  columns: Vec<StructureColumn>,
  next_uid: u64,
}

impl StructureEditor {
  pub fn load(columns: Vec<SchemaColumn>) -> Self {
    let mut editor = Self::default();
    editor.reload(columns);
    editor
  }

  /// Replace everything with freshly fetched metadata, dropping pending edits.
  pub fn reload(&mut self, mut columns: Vec<SchemaColumn>) {
    columns.sort_by_key(|c| c.ordinal_position);
    self.columns = columns
      .into_iter()
      .map(|c| {
        self.next_uid += 1;
        StructureColumn::existing(self.next_uid, c)
      })
      .collect();
  }

  pub fn columns(&self) -> &[StructureColumn] {
    &self.columns
  }

  pub fn get(&self, uid: u64) -> Option<&StructureColumn> {
    self.columns.iter().find(|c| c.uid == uid)
  }

  pub fn add_column(&mut self, column: SchemaColumn) -> u64 {
    self.next_uid += 1;
    let mut column = column;
    column.ordinal_position = self.columns.len() as u32 + 1;
    self.columns.push(StructureColumn::added(self.next_uid, column));
    self.next_uid
  }

  /// Apply `edit` to the column's current fields. Returns false for an unknown uid.
  pub fn update(&mut self, uid: u64, edit: impl FnOnce(&mut SchemaColumn)) -> bool {
    match self.columns.iter_mut().find(|c| c.uid == uid) {
      Some(column) => {
        edit(&mut column.column);
        true
      },
      None => false,
    }
  }

  /// Added columns disappear outright; existing ones are soft-deleted so the delete can be undone.
  pub fn delete(&mut self, uid: u64) {
    let Some(pos) = self.columns.iter().position(|c| c.uid == uid) else {
      return;
    };
    if self.columns[pos].status == ColumnStatus::Added {
      self.columns.remove(pos);
    } else {
      self.columns[pos].deleted = true;
    }
  }

  pub fn undo_delete(&mut self, uid: u64) {
    if let Some(column) = self.columns.iter_mut().find(|c| c.uid == uid) {
      column.deleted = false;
    }
  }

  /// Restore the load-time snapshot of an existing column.
  pub fn revert(&mut self, uid: u64) {
    if let Some(column) = self.columns.iter_mut().find(|c| c.uid == uid) {
      if let Some(original) = column.original.clone() {
        column.column = original;
        column.deleted = false;
      }
    }
  }

  pub fn has_changes(&self) -> bool {
    self.columns.iter().any(|c| c.deleted || c.status == ColumnStatus::Added || c.is_modified())
  }

  pub fn validate(&self) -> Result<(), ValidationError> {
    validate_columns(&self.columns)
  }
}

/// Rejects empty and duplicate (case-insensitive) names, and named columns without a type, among the
/// columns that will survive.
pub fn validate_columns(columns: &[StructureColumn]) -> Result<(), ValidationError> {
  let mut seen = HashSet::new();
  for (position, column) in columns.iter().filter(|c| !c.deleted).enumerate() {
    let name = column.column.name.trim();
    if name.is_empty() {
      // A blank row the user added and never filled in is skipped, not an error.
      if column.status == ColumnStatus::Added && column.column.data_type.trim().is_empty() {
        continue;
      }
      return Err(ValidationError::EmptyColumnName { position: position + 1 });
    }
    if !seen.insert(name.to_lowercase()) {
      return Err(ValidationError::DuplicateColumnName(name.to_string()));
    }
    if column.column.data_type.trim().is_empty() {
      return Err(ValidationError::EmptyColumnType(name.to_string()));
    }
  }
  Ok(())
}
