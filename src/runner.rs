use std::{
  collections::HashMap,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
  },
};

use tokio_util::sync::CancellationToken;

use crate::{
  count::{CountEstimator, CountOutcome},
  error::Result,
  executor::QueryExecutor,
  filter::{any_enabled, WhereBuilder},
  models::{QueryResult, TableRef},
  pagination::PaginationState,
  planner::{PageRequest, QueryPlanner},
};

const MAX_CACHED_PAGES: usize = 64;

/// Ticket for one dispatched read. A read may only apply its results while its ticket is current.
#[derive(Debug, Clone)]
pub struct RequestGuard {
  id: u64,
  latest: Arc<AtomicU64>,
  token: CancellationToken,
}

impl RequestGuard {
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn is_current(&self) -> bool {
    !self.token.is_cancelled() && self.latest.load(Ordering::SeqCst) == self.id
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLoad {
  pub request_id: u64,
  pub request: PageRequest,
  pub result: QueryResult,
  pub pagination: PaginationState,
  pub from_cache: bool,
}

/// Sequences reads for one table view so that only the most recently dispatched one is applied.
/// Cancelling does not interrupt a statement already sent to the server, it only discards the result.
pub struct CancellableQueryRunner {
  latest: Arc<AtomicU64>,
  current: Mutex<CancellationToken>,
  cache: Mutex<HashMap<String, PageLoad>>,
  where_builder: Arc<dyn WhereBuilder>,
  estimator: CountEstimator,
}

impl CancellableQueryRunner {
  pub fn new(where_builder: Arc<dyn WhereBuilder>, estimator: CountEstimator) -> Self {
    Self {
      latest: Arc::new(AtomicU64::new(0)),
      current: Mutex::new(CancellationToken::new()),
      cache: Mutex::new(HashMap::new()),
      where_builder,
      estimator,
    }
  }

  /// Cancel whatever is in flight and hand out the next ticket.
  pub fn begin(&self) -> RequestGuard {
    let token = CancellationToken::new();
    let previous = std::mem::replace(&mut *self.current.lock().unwrap_or_else(PoisonError::into_inner), token.clone());
    previous.cancel();
    let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
    RequestGuard { id, latest: self.latest.clone(), token }
  }

  /// A ticket sharing the latest request's identity, for follow-up work such as an exact count
  /// that must be dropped once the user moves on.
  pub fn follow_up(&self) -> RequestGuard {
    let token = self.current.lock().unwrap_or_else(PoisonError::into_inner).clone();
    RequestGuard { id: self.latest.load(Ordering::SeqCst), latest: self.latest.clone(), token }
  }

  pub fn is_latest(&self, request_id: u64) -> bool {
    self.latest.load(Ordering::SeqCst) == request_id
  }

  pub fn cancel(&self) {
    self.current.lock().unwrap_or_else(PoisonError::into_inner).cancel();
  }

  /// Plan, fetch and count one page. `Ok(None)` means a newer dispatch superseded this one.
  pub async fn dispatch(
    &self,
    executor: &dyn QueryExecutor,
    request: &PageRequest,
    use_cache: bool,
  ) -> Result<Option<PageLoad>> {
    let guard = self.begin();
    let key = cache_key(request);

    if use_cache {
      let cached = self.cache.lock().unwrap_or_else(PoisonError::into_inner).get(&key).cloned();
      if let Some(mut hit) = cached {
        tracing::debug!(table = %request.table, page = request.page, "serving page from cache");
        hit.request_id = guard.id();
        hit.from_cache = true;
        return Ok(Some(hit));
      }
    }

    match self.run(executor, request, &guard).await {
      Ok(Some(load)) => {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= MAX_CACHED_PAGES {
          cache.clear();
        }
        cache.insert(key, load.clone());
        Ok(Some(load))
      },
      Ok(None) => {
        tracing::debug!(request_id = guard.id(), "discarding stale read");
        Ok(None)
      },
      // A superseded request's failure is as irrelevant as its rows.
      Err(_) if !guard.is_current() => Ok(None),
      Err(err) => Err(err),
    }
  }

  async fn run(
    &self,
    executor: &dyn QueryExecutor,
    request: &PageRequest,
    guard: &RequestGuard,
  ) -> Result<Option<PageLoad>> {
    let planner = QueryPlanner::new(executor.dialect(), self.where_builder.as_ref());
    let table = TableRef { schema: request.schema.clone(), name: request.table.clone() };

    if !guard.is_current() {
      return Ok(None);
    }
    let data_query = planner.build_data_query(request)?;
    let result = executor.query(&data_query.sql, &data_query.params).await?;

    if !guard.is_current() {
      return Ok(None);
    }
    let count_query = planner.build_count_query(&request.table, request.schema.as_deref(), &request.filters);
    let filters_active = any_enabled(&request.filters);
    let Some(count) = self.estimator.resolve(executor, &table, &count_query, filters_active, guard).await? else {
      return Ok(None);
    };

    if !guard.is_current() {
      return Ok(None);
    }
    Ok(Some(PageLoad {
      request_id: guard.id(),
      request: request.clone(),
      result,
      pagination: PaginationState::from_count(request.page, request.page_size, count),
      from_cache: false,
    }))
  }

  /// Exact COUNT(*) regardless of the estimate threshold. `Ok(None)` if the view moved on meanwhile.
  pub async fn request_exact_count(
    &self,
    executor: &dyn QueryExecutor,
    request: &PageRequest,
  ) -> Result<Option<(u64, CountOutcome)>> {
    let guard = self.follow_up();
    let planner = QueryPlanner::new(executor.dialect(), self.where_builder.as_ref());
    let count_query = planner.build_count_query(&request.table, request.schema.as_deref(), &request.filters);

    match crate::count::exact_count(executor, &count_query).await {
      Ok(total) if guard.is_current() => Ok(Some((guard.id(), CountOutcome::exact(total)))),
      Ok(_) => Ok(None),
      Err(_) if !guard.is_current() => Ok(None),
      Err(err) => Err(err),
    }
  }

  /// Forget cached pages of `table`, e.g. after a commit changed its rows.
  pub fn invalidate_table(&self, table: &TableRef) {
    let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
    cache.retain(|_, load| !(load.request.table == table.name && load.request.schema == table.schema));
  }

  pub fn cached_pages(&self) -> usize {
    self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
  }
}

/// Serialized (table, schema, page, page size, sort, filters).
fn cache_key(request: &PageRequest) -> String {
  serde_json::json!([
    request.table,
    request.schema,
    request.page.max(1),
    request.page_size,
    request.sort,
    request.filters,
  ])
  .to_string()
}
