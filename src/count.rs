use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  executor::QueryExecutor,
  models::TableRef,
  planner::PlannedQuery,
  runner::RequestGuard,
};

/// Above this many (estimated) rows an unfiltered COUNT(*) is not run automatically.
pub const DEFAULT_ESTIMATE_THRESHOLD: u64 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountOutcome {
  pub total_rows: u64,
  pub is_estimated: bool,
}

impl CountOutcome {
  pub fn exact(total_rows: u64) -> Self {
    Self { total_rows, is_estimated: false }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct CountEstimator {
  threshold: u64,
}

impl Default for CountEstimator {
  fn default() -> Self {
    Self::new(DEFAULT_ESTIMATE_THRESHOLD)
  }
}

impl CountEstimator {
  pub fn new(threshold: u64) -> Self {
    Self { threshold }
  }

  pub fn threshold(&self) -> u64 {
    self.threshold
  }

  /// Filtered reads always count exactly. Unfiltered reads start from the statistics estimate and
  /// only count exactly when the estimate is at or below the threshold. `Ok(None)` means the
  /// request went stale between steps.
  pub async fn resolve(
    &self,
    executor: &dyn QueryExecutor,
    table: &TableRef,
    count_query: &PlannedQuery,
    filters_active: bool,
    guard: &RequestGuard,
  ) -> Result<Option<CountOutcome>> {
    if filters_active {
      if !guard.is_current() {
        return Ok(None);
      }
      let total = exact_count(executor, count_query).await?;
      return Ok(Some(CountOutcome::exact(total)));
    }

    if !guard.is_current() {
      return Ok(None);
    }
    let estimate = match executor.estimate_row_count(table).await {
      Ok(estimate) => Some(estimate),
      Err(err) => {
        tracing::warn!(%table, error = %err, "row estimate failed, counting exactly");
        None
      },
    };

    match estimate {
      Some(estimate) if estimate > self.threshold => {
        tracing::debug!(%table, estimate, threshold = self.threshold, "keeping estimated row count");
        Ok(Some(CountOutcome { total_rows: estimate, is_estimated: true }))
      },
      _ => {
        if !guard.is_current() {
          return Ok(None);
        }
        let total = exact_count(executor, count_query).await?;
        Ok(Some(CountOutcome::exact(total)))
      },
    }
  }
}

pub async fn exact_count(executor: &dyn QueryExecutor, count_query: &PlannedQuery) -> Result<u64> {
  tracing::debug!(sql = %count_query.sql, "counting rows");
  let result = executor.query(&count_query.sql, &count_query.params).await?;
  result.scalar_u64().ok_or_else(|| Error::query("COUNT(*) query returned no result"))
}
