use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use uuid::Uuid;

use crate::models::{Field, Row, TableRef};

/// Column name / value pairs in column order.
pub type RowValues = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
  Update,
  Insert,
  Delete,
}

/// Identity of a staged change. Cell edits and deletes are keyed by their position in the current
/// result set, so the same edit staged twice lands on the same entry; inserts get a fresh uuid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeId {
  Cell { table: TableRef, row: usize, field: String },
  Row { table: TableRef, row: usize },
  Insert { table: TableRef, uid: Uuid },
}

impl ChangeId {
  pub fn table(&self) -> &TableRef {
    match self {
      Self::Cell { table, .. } | Self::Row { table, .. } | Self::Insert { table, .. } => table,
    }
  }

  /// Row position for ids that depend on it. Inserts are position independent.
  pub fn row(&self) -> Option<usize> {
    match self {
      Self::Cell { row, .. } | Self::Row { row, .. } => Some(*row),
      Self::Insert { .. } => None,
    }
  }

  pub fn is_positional(&self) -> bool {
    self.row().is_some()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellChange {
  pub old: Value,
  pub new: Value,
}

/// Equality predicate used to find one row on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowIdentity {
  pub values: RowValues,
  /// No primary key was known, so every column of the row is used. May match duplicates.
  pub full_row: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedChange {
  pub id: ChangeId,
  pub kind: ChangeKind,
  pub table: TableRef,
  pub primary_key: Option<RowIdentity>,
  pub changes: BTreeMap<String, CellChange>,
  pub new_row: Option<RowValues>,
  pub row_data: Option<RowValues>,
  pub column: Option<String>,
  pub old_value: Option<Value>,
  pub new_value: Option<Value>,
}

impl StagedChange {
  fn bare(id: ChangeId, kind: ChangeKind) -> Self {
    Self {
      table: id.table().clone(),
      id,
      kind,
      primary_key: None,
      changes: BTreeMap::new(),
      new_row: None,
      row_data: None,
      column: None,
      old_value: None,
      new_value: None,
    }
  }

  pub fn update(
    table: TableRef,
    row: usize,
    field: impl Into<String>,
    old: Value,
    new: Value,
    identity: RowIdentity,
  ) -> Self {
    let field = field.into();
    let mut change = Self::bare(ChangeId::Cell { table, row, field: field.clone() }, ChangeKind::Update);
    change.changes.insert(field.clone(), CellChange { old: old.clone(), new: new.clone() });
    change.primary_key = Some(identity);
    change.column = Some(field);
    change.old_value = Some(old);
    change.new_value = Some(new);
    change
  }

  pub fn insert(table: TableRef, new_row: RowValues) -> Self {
    let mut change = Self::bare(ChangeId::Insert { table, uid: Uuid::new_v4() }, ChangeKind::Insert);
    change.new_row = Some(new_row);
    change
  }

  pub fn delete(table: TableRef, row: usize, row_data: RowValues, identity: RowIdentity) -> Self {
    let mut change = Self::bare(ChangeId::Row { table, row }, ChangeKind::Delete);
    change.row_data = Some(row_data);
    change.primary_key = Some(identity);
    change
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
  Staged,
  /// The value went back to what the server has; the staged entry is gone.
  Reverted,
  /// Edits on a row staged for deletion are ignored.
  RowDeleted,
}

#[derive(Debug, Clone)]
struct Entry {
  seq: u64,
  change: StagedChange,
}

/// Uncommitted edits of one table-editing session.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
  entries: HashMap<ChangeId, Entry>,
  originals: HashMap<ChangeId, Value>,
  next_seq: u64,
}

impl ChangeLedger {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn len_for(&self, table: &TableRef) -> usize {
    self.entries.keys().filter(|id| id.table() == table).count()
  }

  /// Replace the entry with the same id, keeping its position, or append a new one.
  pub fn upsert(&mut self, change: StagedChange) {
    match self.entries.get_mut(&change.id) {
      Some(entry) => entry.change = change,
      None => {
        self.next_seq += 1;
        self.entries.insert(change.id.clone(), Entry { seq: self.next_seq, change });
      },
    }
  }

  pub fn remove(&mut self, id: &ChangeId) -> Option<StagedChange> {
    self.originals.remove(id);
    self.entries.remove(id).map(|e| e.change)
  }

  pub fn get(&self, id: &ChangeId) -> Option<&StagedChange> {
    self.entries.get(id).map(|e| &e.change)
  }

  /// Changes for `table` in the order they were first staged.
  pub fn list_for(&self, table: &TableRef) -> Vec<&StagedChange> {
    let mut entries: Vec<&Entry> = self.entries.values().filter(|e| &e.change.table == table).collect();
    entries.sort_by_key(|e| e.seq);
    entries.into_iter().map(|e| &e.change).collect()
  }

  /// Owned copy for compilers, so the ledger can keep accepting edits while a commit runs.
  pub fn snapshot(&self, table: &TableRef) -> Vec<StagedChange> {
    self.list_for(table).into_iter().cloned().collect()
  }

  /// Stage a cell edit. `current` is the value shown before this edit; it is only remembered the
  /// first time the cell is touched.
  pub fn stage_cell_edit(
    &mut self,
    table: &TableRef,
    row: usize,
    field: &str,
    current: Value,
    new: Value,
    identity: RowIdentity,
  ) -> EditOutcome {
    if self.is_row_deleted(table, row) {
      return EditOutcome::RowDeleted;
    }

    let id = ChangeId::Cell { table: table.clone(), row, field: field.to_string() };
    let original = self.originals.entry(id.clone()).or_insert(current).clone();

    if values_equivalent(&original, &new) {
      self.remove(&id);
      return EditOutcome::Reverted;
    }

    self.upsert(StagedChange::update(table.clone(), row, field, original, new, identity));
    EditOutcome::Staged
  }

  /// Returns false when the row was already staged for deletion.
  pub fn stage_row_delete(&mut self, table: &TableRef, row: usize, row_data: RowValues, identity: RowIdentity) -> bool {
    if self.is_row_deleted(table, row) {
      return false;
    }

    let moot: Vec<ChangeId> = self
      .entries
      .keys()
      .filter(|id| matches!(id, ChangeId::Cell { table: t, row: r, .. } if t == table && *r == row))
      .cloned()
      .collect();
    for id in moot {
      self.remove(&id);
    }

    self.upsert(StagedChange::delete(table.clone(), row, row_data, identity));
    true
  }

  pub fn stage_insert(&mut self, table: &TableRef, new_row: RowValues) -> ChangeId {
    let change = StagedChange::insert(table.clone(), new_row);
    let id = change.id.clone();
    self.upsert(change);
    id
  }

  /// Edit one value of a staged insert. Returns false if `id` is not a staged insert.
  pub fn update_insert_cell(&mut self, id: &ChangeId, field: &str, value: Value) -> bool {
    let Some(entry) = self.entries.get_mut(id) else {
      return false;
    };
    let Some(new_row) = entry.change.new_row.as_mut() else {
      return false;
    };
    match new_row.iter_mut().find(|(name, _)| name == field) {
      Some((_, slot)) => *slot = value,
      None => new_row.push((field.to_string(), value)),
    }
    true
  }

  pub fn cell_change(&self, table: &TableRef, row: usize, field: &str) -> Option<&CellChange> {
    let id = ChangeId::Cell { table: table.clone(), row, field: field.to_string() };
    self.get(&id).and_then(|c| c.changes.get(field))
  }

  pub fn is_cell_edited(&self, table: &TableRef, row: usize, field: &str) -> bool {
    self.cell_change(table, row, field).is_some()
  }

  pub fn is_row_deleted(&self, table: &TableRef, row: usize) -> bool {
    self.entries.contains_key(&ChangeId::Row { table: table.clone(), row })
  }

  pub fn inserted_rows(&self, table: &TableRef) -> Vec<&StagedChange> {
    self.list_for(table).into_iter().filter(|c| c.kind == ChangeKind::Insert).collect()
  }

  pub fn clear(&mut self, table: &TableRef) {
    self.entries.retain(|id, _| id.table() != table);
    self.originals.retain(|id, _| id.table() != table);
  }

  /// Drop entries that were committed, leaving anything re-staged since the snapshot was taken.
  pub fn clear_committed(&mut self, committed: &[StagedChange]) {
    for change in committed {
      if self.get(&change.id) == Some(change) {
        self.remove(&change.id);
      }
    }
  }

  /// Row positions no longer mean the same rows after a page, sort, filter or table change.
  pub fn discard_positional(&mut self, table: &TableRef, preserve_inserts: bool) {
    self.entries.retain(|id, _| id.table() != table || (preserve_inserts && !id.is_positional()));
    self.originals.retain(|id, _| id.table() != table || !id.is_positional());
  }
}

/// Columns the grid adds for its own bookkeeping, never part of the server row.
pub fn is_synthetic_column(name: &str) -> bool {
  name.starts_with("__")
}

/// `{column: value}` for each known primary key column. Without a known key every real column of
/// the row becomes part of the identity.
pub fn build_primary_key(fields: &[Field], row: &Row, pk_columns: &[String]) -> RowIdentity {
  let known: Vec<&String> = pk_columns.iter().filter(|pk| fields.iter().any(|f| &f.name == *pk)).collect();

  if !known.is_empty() {
    let values = known
      .into_iter()
      .map(|pk| {
        let idx = fields.iter().position(|f| &f.name == pk).unwrap_or_default();
        (pk.clone(), row.get(idx).cloned().unwrap_or(Value::Null))
      })
      .collect();
    return RowIdentity { values, full_row: false };
  }

  RowIdentity { values: row_values(fields, row), full_row: true }
}

pub fn row_values(fields: &[Field], row: &Row) -> RowValues {
  fields
    .iter()
    .zip(row.iter())
    .filter(|(f, _)| !is_synthetic_column(&f.name))
    .map(|(f, v)| (f.name.clone(), v.clone()))
    .collect()
}

/// Editor widgets hand back strings for numbers and booleans, so `1` and `"1"` count as equal.
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
  a == b || matches!((normalized(a), normalized(b)), (Some(x), Some(y)) if x == y)
}

fn normalized(value: &Value) -> Option<String> {
  match value {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}
