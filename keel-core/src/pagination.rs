//! Pagination window math for list queries.

use serde::{Deserialize, Serialize};

/// Page size used when the caller supplies none (or a non-positive one).
pub const DEFAULT_PAGE_SIZE: u32 = 10;
/// Upper bound on page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Derived pagination metadata. Recomputed on every list query, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationWindow {
    pub current_page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PaginationWindow {
    /// Build the window for `page` (1-based) of `per_page` items over
    /// `total_items`. `page` is raised to 1 and `per_page` clamped to
    /// `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u32, per_page: u32, total_items: u64) -> Self {
        let current_page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
        let total_pages = total_items.div_ceil(u64::from(per_page));
        let total_pages = u32::try_from(total_pages).unwrap_or(u32::MAX);

        Self {
            current_page,
            per_page,
            total_pages,
            total_items,
            has_next_page: current_page < total_pages,
            has_prev_page: current_page > 1,
        }
    }

    /// Zero-based offset of the first item on the current page.
    pub fn offset(&self) -> u64 {
        u64::from(self.current_page - 1) * u64::from(self.per_page)
    }
}
