//! Paging for grid-style media listings

use serde::{Deserialize, Serialize};

/// Rows per page a grid asks for when it does not say otherwise.
pub const DEFAULT_PAGE_SIZE: u32 = 120;

/// Upper bound on a single page; larger requests are clamped.
pub const MAX_PAGE_SIZE: u32 = 1_000;

/// Zero-indexed page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The page after this one, same size.
    pub fn next(self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus the total row count of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            request,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.request.page_size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.request.page) + 1 < self.total_pages()
    }

    /// Request for the following page, if there is one.
    pub fn next_request(&self) -> Option<PageRequest> {
        self.has_next().then(|| self.request.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_first_grid_page() {
        let request = PageRequest::default();
        assert_eq!(request.page, 0);
        assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(request.offset(), 0);
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(PageRequest::new(0, 0).page_size, 1);
        assert_eq!(PageRequest::new(0, 50_000).page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_offset_and_limit() {
        let request = PageRequest::new(2, 20);
        assert_eq!(request.offset(), 40);
        assert_eq!(request.limit(), 20);

        let far = PageRequest::new(u32::MAX, MAX_PAGE_SIZE);
        assert!(far.offset() > 0);
        assert_eq!(far.next().page, u32::MAX);
    }

    #[test]
    fn test_walking_pages() {
        let first = Page::new(vec![1; 10], 25, PageRequest::new(0, 10));
        assert_eq!(first.total_pages(), 3);
        let second = first.next_request().unwrap();
        assert_eq!(second, PageRequest::new(1, 10));

        let last = Page::new(vec![1; 5], 25, PageRequest::new(2, 10));
        assert!(!last.has_next());
        assert!(last.next_request().is_none());
    }

    #[test]
    fn test_empty_listing() {
        let page: Page<i64> = Page::new(Vec::new(), 0, PageRequest::default());
        assert_eq!(page.total_pages(), 0);
        assert!(!page.has_next());
    }
}
