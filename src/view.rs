//! One open table: the rows on screen, the edits staged against them and the structure editor.

use std::{
  future::Future,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use serde_json::Value;

use crate::{
  config::Config,
  count::CountEstimator,
  error::{Error, Result, ValidationError},
  executor::QueryExecutor,
  filter::{FilterTranslator, TableFilter, WhereBuilder},
  ledger::{build_primary_key, is_synthetic_column, row_values, ChangeId, ChangeLedger, EditOutcome, StagedChange},
  models::{QueryResult, TableRef, TableStructure},
  pagination::PaginationState,
  planner::{PageRequest, SortSpec},
  runner::{CancellableQueryRunner, PageLoad},
  schema_diff::{ConfirmedDdl, DdlPreview, SchemaDiffCompiler},
  structure::StructureEditor,
  transaction::{CommitSummary, CompiledStatement, TransactionCompiler},
};

/// Held while a write runs; dropping it releases the view for the next write.
struct WriteSlot(Arc<AtomicBool>);

impl WriteSlot {
  fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
    if flag.swap(true, Ordering::SeqCst) {
      return Err(Error::SaveInProgress);
    }
    Ok(Self(flag.clone()))
  }
}

impl Drop for WriteSlot {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// A commit detached from the view so it can run while the user keeps editing.
pub struct PendingSave {
  executor: Arc<dyn QueryExecutor>,
  compiler: TransactionCompiler,
  snapshot: Vec<StagedChange>,
  statements: Vec<CompiledStatement>,
  slot: WriteSlot,
}

impl PendingSave {
  pub fn statements(&self) -> &[CompiledStatement] {
    &self.statements
  }

  pub async fn run(self) -> SaveOutcome {
    let result = self.compiler.execute(self.executor.as_ref(), &self.statements).await;
    drop(self.slot);
    SaveOutcome { snapshot: self.snapshot, result }
  }
}

pub struct SaveOutcome {
  snapshot: Vec<StagedChange>,
  result: Result<CommitSummary>,
}

pub struct TableView {
  table: TableRef,
  executor: Arc<dyn QueryExecutor>,
  runner: Arc<CancellableQueryRunner>,
  config: Config,
  request: PageRequest,
  pagination: PaginationState,
  result: QueryResult,
  structure: TableStructure,
  editor: StructureEditor,
  ledger: ChangeLedger,
  writing: Arc<AtomicBool>,
}

impl TableView {
  pub fn new(executor: Arc<dyn QueryExecutor>, table: TableRef, config: Config) -> Self {
    Self::with_where_builder(executor, table, config, Arc::new(FilterTranslator))
  }

  pub fn with_where_builder(
    executor: Arc<dyn QueryExecutor>,
    table: TableRef,
    config: Config,
    where_builder: Arc<dyn WhereBuilder>,
  ) -> Self {
    let runner = CancellableQueryRunner::new(where_builder, CountEstimator::new(config.estimate_threshold));
    let request = PageRequest::new(table.name.clone(), table.schema.clone(), config.page_size);
    Self {
      pagination: PaginationState::new(config.page_size),
      table,
      executor,
      runner: Arc::new(runner),
      config,
      request,
      result: QueryResult::default(),
      structure: TableStructure::default(),
      editor: StructureEditor::default(),
      ledger: ChangeLedger::new(),
      writing: Arc::new(AtomicBool::new(false)),
    }
  }

  /// Fetch the structure, then the first page.
  pub async fn open(executor: Arc<dyn QueryExecutor>, table: TableRef, config: Config) -> Result<Self> {
    let mut view = Self::new(executor, table, config);
    view.load_structure().await?;
    view.load_page().await?;
    Ok(view)
  }

  pub fn table(&self) -> &TableRef {
    &self.table
  }

  pub fn request(&self) -> &PageRequest {
    &self.request
  }

  pub fn pagination(&self) -> &PaginationState {
    &self.pagination
  }

  pub fn result(&self) -> &QueryResult {
    &self.result
  }

  pub fn structure(&self) -> &TableStructure {
    &self.structure
  }

  pub fn ledger(&self) -> &ChangeLedger {
    &self.ledger
  }

  pub fn staged_changes(&self) -> Vec<&StagedChange> {
    self.ledger.list_for(&self.table)
  }

  pub fn editor(&self) -> &StructureEditor {
    &self.editor
  }

  pub fn editor_mut(&mut self) -> &mut StructureEditor {
    &mut self.editor
  }

  pub fn is_saving(&self) -> bool {
    self.writing.load(Ordering::SeqCst)
  }

  // Reads

  /// Dispatch the current request and apply it. Returns false when a newer request superseded it.
  pub async fn load_page(&mut self) -> Result<bool> {
    let load = self.runner.dispatch(self.executor.as_ref(), &self.request, self.config.cache_reads).await?;
    Ok(load.is_some_and(|load| self.apply_page(load)))
  }

  /// The current request as a detached future, for callers that spawn reads and apply them later
  /// with [`TableView::apply_page`].
  pub fn page_task(&self) -> impl Future<Output = Result<Option<PageLoad>>> + Send + 'static {
    let runner = self.runner.clone();
    let executor = self.executor.clone();
    let request = self.request.clone();
    let use_cache = self.config.cache_reads;
    async move { runner.dispatch(executor.as_ref(), &request, use_cache).await }
  }

  /// Apply a finished read unless a newer one has been dispatched since.
  pub fn apply_page(&mut self, load: PageLoad) -> bool {
    if !self.runner.is_latest(load.request_id) {
      tracing::debug!(request_id = load.request_id, "ignoring superseded page");
      return false;
    }
    self.request = load.request;
    self.result = load.result;
    self.pagination = load.pagination;
    true
  }

  /// Replace an estimated total with COUNT(*). Returns false if the view moved on meanwhile.
  pub async fn request_exact_count(&mut self) -> Result<bool> {
    match self.runner.request_exact_count(self.executor.as_ref(), &self.request).await? {
      Some((request_id, count)) if self.runner.is_latest(request_id) => {
        self.pagination.set_count(count);
        Ok(true)
      },
      _ => Ok(false),
    }
  }

  pub fn set_page(&mut self, page: u64) {
    let page = page.max(1);
    if page != self.request.page {
      self.request.page = page;
      self.invalidate_positions();
    }
  }

  pub fn next_page(&mut self) -> bool {
    if !self.pagination.has_next_page() {
      return false;
    }
    self.set_page(self.request.page + 1);
    true
  }

  pub fn previous_page(&mut self) -> bool {
    if !self.pagination.has_previous_page() {
      return false;
    }
    self.set_page(self.request.page - 1);
    true
  }

  pub fn set_page_size(&mut self, page_size: u64) -> Result<()> {
    if page_size == 0 {
      return Err(ValidationError::ZeroPageSize.into());
    }
    self.request.page_size = page_size;
    self.request.page = 1;
    self.invalidate_positions();
    Ok(())
  }

  pub fn set_sort(&mut self, sort: Option<SortSpec>) {
    if sort != self.request.sort {
      self.request.sort = sort;
      self.request.page = 1;
      self.invalidate_positions();
    }
  }

  pub fn set_filters(&mut self, filters: Vec<TableFilter>) {
    if filters != self.request.filters {
      self.request.filters = filters;
      self.request.page = 1;
      self.invalidate_positions();
    }
  }

  fn invalidate_positions(&mut self) {
    self.ledger.discard_positional(&self.table, self.config.preserve_inserts_on_navigation);
  }

  // Staging

  /// Rows on the page followed by staged inserts.
  pub fn row_count(&self) -> usize {
    self.result.rows.len() + self.ledger.inserted_rows(&self.table).len()
  }

  /// What the grid shows for a cell: the staged value if any, else the fetched one.
  pub fn cell_value(&self, row: usize, field: &str) -> Option<Value> {
    if let Some(insert) = self.insert_at(row) {
      let new_row = self.ledger.get(&insert)?.new_row.as_ref()?;
      return new_row.iter().find(|(name, _)| name == field).map(|(_, v)| v.clone());
    }
    if let Some(change) = self.ledger.cell_change(&self.table, row, field) {
      return Some(change.new.clone());
    }
    let idx = self.result.column_index(field)?;
    self.result.rows.get(row)?.get(idx).cloned()
  }

  /// Stage a new value for one cell. Rows past the fetched ones address staged inserts.
  pub fn edit_cell(&mut self, row: usize, field: &str, value: Value) -> Result<EditOutcome> {
    if is_synthetic_column(field) {
      return Err(ValidationError::Other(format!("{field} is not an editable column")).into());
    }

    if let Some(insert) = self.insert_at(row) {
      if !self.has_column(field) {
        return Err(ValidationError::Other(format!("unknown column {field}")).into());
      }
      self.ledger.update_insert_cell(&insert, field, value);
      return Ok(EditOutcome::Staged);
    }

    let data = self.result.rows.get(row).ok_or_else(|| Error::RowIdentity(format!("no row at position {row}")))?;
    let idx = self
      .result
      .column_index(field)
      .ok_or_else(|| ValidationError::Other(format!("unknown column {field}")))?;
    let current = data.get(idx).cloned().unwrap_or(Value::Null);
    let identity = build_primary_key(&self.result.fields, data, &self.request.primary_key_columns);
    Ok(self.ledger.stage_cell_edit(&self.table, row, field, current, value, identity))
  }

  /// Stage a delete, or drop the staged insert shown at `row`. Returns false if nothing changed.
  pub fn delete_row(&mut self, row: usize) -> Result<bool> {
    if let Some(insert) = self.insert_at(row) {
      return Ok(self.ledger.remove(&insert).is_some());
    }
    let data = self.result.rows.get(row).ok_or_else(|| Error::RowIdentity(format!("no row at position {row}")))?;
    let identity = build_primary_key(&self.result.fields, data, &self.request.primary_key_columns);
    let row_data = row_values(&self.result.fields, data);
    Ok(self.ledger.stage_row_delete(&self.table, row, row_data, identity))
  }

  /// Stage an empty row; its grid position is the returned index.
  pub fn insert_row(&mut self) -> (usize, ChangeId) {
    let columns: Vec<String> = if self.result.fields.is_empty() {
      self.structure.columns.iter().map(|c| c.name.clone()).collect()
    } else {
      self.result.fields.iter().map(|f| f.name.clone()).collect()
    };
    let new_row = columns.into_iter().filter(|c| !is_synthetic_column(c)).map(|c| (c, Value::Null)).collect();
    let id = self.ledger.stage_insert(&self.table, new_row);
    (self.row_count() - 1, id)
  }

  fn has_column(&self, field: &str) -> bool {
    self.result.column_index(field).is_some() || self.structure.columns.iter().any(|c| c.name == field)
  }

  fn insert_at(&self, row: usize) -> Option<ChangeId> {
    let offset = row.checked_sub(self.result.rows.len())?;
    self.ledger.inserted_rows(&self.table).get(offset).map(|c| c.id.clone())
  }

  pub fn undo(&mut self, id: &ChangeId) -> Option<StagedChange> {
    self.ledger.remove(id)
  }

  pub fn discard(&mut self) {
    self.ledger.clear(&self.table);
  }

  // Saving

  /// Snapshot and compile the staged changes. The view rejects other writes until the returned
  /// save has run.
  pub fn begin_save(&mut self) -> Result<PendingSave> {
    let slot = WriteSlot::acquire(&self.writing)?;
    let snapshot = self.ledger.snapshot(&self.table);
    let columns = &self.structure.columns;
    let compiler = TransactionCompiler::new(self.executor.dialect())
      .with_auto_increment(columns.iter().filter(|c| c.is_auto_increment).map(|c| c.name.clone()))
      .with_column_types(columns.iter().map(|c| (c.name.clone(), c.data_type.clone())))
      .with_identity_policy(self.config.identity_policy);
    let statements = compiler.compile(&snapshot)?;
    Ok(PendingSave { executor: self.executor.clone(), compiler, snapshot, statements, slot })
  }

  /// Clears what was committed. On failure the ledger is left untouched so the user can retry.
  pub fn finish_save(&mut self, outcome: SaveOutcome) -> Result<CommitSummary> {
    let summary = outcome.result?;
    self.ledger.clear_committed(&outcome.snapshot);
    self.runner.invalidate_table(&self.table);
    tracing::info!(table = %self.table, changes = summary.total(), "saved staged changes");
    Ok(summary)
  }

  /// Commit everything staged for this table, then refresh the page to show server-side values.
  /// A failed refresh does not fail the save: the commit stands and the page keeps its old rows.
  pub async fn save(&mut self) -> Result<CommitSummary> {
    let pending = self.begin_save()?;
    if pending.statements.is_empty() {
      return Ok(CommitSummary::default());
    }
    let outcome = pending.run().await;
    let summary = self.finish_save(outcome)?;
    if let Err(err) = self.load_page().await {
      tracing::warn!(table = %self.table, error = %err, "refresh after save failed");
    }
    Ok(summary)
  }

  // Structure

  pub async fn load_structure(&mut self) -> Result<()> {
    let structure = self.executor.table_structure(&self.table).await?;
    self.request.primary_key_columns = structure.primary_key_columns();
    self.editor.reload(structure.columns.clone());
    self.structure = structure;
    Ok(())
  }

  pub fn preview_ddl(&self) -> Result<DdlPreview> {
    let primary_key = self.structure.indexes.iter().find(|i| i.is_primary).map(|i| i.name.clone());
    SchemaDiffCompiler::new(self.executor.dialect())
      .with_primary_key_name(primary_key)
      .compile(&self.table, self.editor.columns())
  }

  /// Run confirmed DDL statement by statement, then refetch the structure. Statements that ran
  /// before a failure stay applied; the structure is refetched either way.
  pub async fn apply_ddl(&mut self, ddl: ConfirmedDdl) -> Result<()> {
    if ddl.table() != &self.table {
      return Err(ValidationError::Other(format!("DDL for {} cannot run on {}", ddl.table(), self.table)).into());
    }
    let slot = WriteSlot::acquire(&self.writing)?;
    let executed = self.executor.execute_statements(ddl.statements()).await;
    drop(slot);

    self.runner.invalidate_table(&self.table);
    self.invalidate_positions();
    self.load_structure().await?;
    executed?;
    tracing::info!(table = %self.table, statements = ddl.statements().len(), "applied structure changes");
    Ok(())
  }
}
