//! Pagination primitives
//!
//! Every listing operation takes a [`PageRequest`] and returns a [`Page`].
//! Page size is capped at 1000 so no query can turn into an unbounded scan.

use serde::{Deserialize, Serialize};

/// Hard upper bound on a single page
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Default page size when the caller does not specify one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    /// First page at the default size
    pub fn first() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Clamp the size into `1..=MAX_PAGE_SIZE`
    pub fn clamped(self) -> Self {
        Self {
            page: self.page,
            size: self.size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// SQL OFFSET for the clamped request
    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    /// SQL LIMIT for the clamped request
    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first()
    }
}

/// One page of results plus the total match count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            size: request.size,
        }
    }

    /// Empty page for a request that matched nothing
    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), 0, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_caps_oversized_requests() {
        let req = PageRequest::new(0, 5000).clamped();
        assert_eq!(req.size, MAX_PAGE_SIZE);

        let req = PageRequest::new(3, 0).clamped();
        assert_eq!(req.size, 1);
    }

    #[test]
    fn offset_is_page_times_size() {
        let req = PageRequest::new(2, 50).clamped();
        assert_eq!(req.offset(), 100);
        assert_eq!(req.limit(), 50);
    }
}
