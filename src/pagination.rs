use serde::{Deserialize, Serialize};

use crate::count::CountOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
  pub page: u64,
  pub page_size: u64,
  pub total_rows: u64,
  pub total_pages: u64,
  /// `total_rows` came from table statistics; callers may offer an exact count.
  pub is_estimated_count: bool,
}

impl PaginationState {
  pub fn new(page_size: u64) -> Self {
    Self { page: 1, page_size, total_rows: 0, total_pages: 1, is_estimated_count: false }
  }

  pub fn from_count(page: u64, page_size: u64, count: CountOutcome) -> Self {
    let mut state = Self { page: page.max(1), page_size, ..Self::new(page_size) };
    state.set_count(count);
    state
  }

  pub fn set_count(&mut self, count: CountOutcome) {
    self.total_rows = count.total_rows;
    self.is_estimated_count = count.is_estimated;
    self.total_pages = total_pages(count.total_rows, self.page_size);
  }

  pub fn has_next_page(&self) -> bool {
    self.page < self.total_pages
  }

  pub fn has_previous_page(&self) -> bool {
    self.page > 1
  }
}

pub fn total_pages(total_rows: u64, page_size: u64) -> u64 {
  if page_size == 0 {
    return 1;
  }
  total_rows.div_ceil(page_size).max(1)
}
