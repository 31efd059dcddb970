//! Paging for history queries

use serde::{Deserialize, Serialize};

/// Page size used when none is requested
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Largest accepted page size
pub const MAX_PAGE_LIMIT: usize = 100;

/// Requested window into a result list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    /// Items per page, between 1 and [`MAX_PAGE_LIMIT`]
    pub limit: usize,

    /// Items to skip from the start
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Create a page request; `limit` is clamped to `1..=MAX_PAGE_LIMIT`
    pub fn new(limit: usize, offset: usize) -> Self {
        Pagination {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            offset,
        }
    }
}

/// One page of results with its position in the full list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    /// Items on this page
    pub data: Vec<T>,

    /// Requested page size
    pub limit: usize,

    /// Items skipped before this page
    pub offset: usize,

    /// Items in the full list
    pub total: usize,

    /// Whether items exist after this page
    pub has_next: bool,

    /// Whether items exist before this page
    pub has_prev: bool,

    /// 1-based page number; an offset inside a page rounds down
    pub page: usize,

    /// Items on this page, at most `limit`
    pub page_size: usize,
}

impl<T> Paginated<T> {
    /// Cut the page described by `pagination` out of the full, ordered list
    pub fn from_items(items: Vec<T>, pagination: Pagination) -> Self {
        let Pagination { limit, offset } = Pagination::new(pagination.limit, pagination.offset);
        let total = items.len();
        let data: Vec<T> = items.into_iter().skip(offset).take(limit).collect();

        Paginated {
            page_size: data.len(),
            data,
            limit,
            offset,
            total,
            has_next: offset.saturating_add(limit) < total,
            has_prev: offset > 0,
            page: offset / limit + 1,
        }
    }

    /// Transform every item, keeping the page position
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            limit: self.limit,
            offset: self.offset,
            total: self.total,
            has_next: self.has_next,
            has_prev: self.has_prev,
            page: self.page,
            page_size: self.page_size,
        }
    }
}
