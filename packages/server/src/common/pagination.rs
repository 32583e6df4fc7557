//! Page/offset pagination for list endpoints.

use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 200;

/// Validated pagination parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

impl Page {
    /// 1-based page number, clamped to >= 1.
    pub fn number(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size clamped to [1, MAX_PAGE_SIZE].
    pub fn size(&self) -> i64 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    /// SQL OFFSET for this page.
    pub fn offset(&self) -> i64 {
        (self.number() - 1) * self.size()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: None,
            page_size: None,
        }
    }
}

/// A page of results plus enough metadata for clients to keep paging.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: &Page, total: i64) -> Self {
        Self {
            items,
            page: page.number(),
            page_size: page.size(),
            total,
        }
    }

    /// Map item type, keeping paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let page = Page::default();
        assert_eq!(page.number(), 1);
        assert_eq!(page.size(), DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn page_size_is_clamped() {
        let page = Page {
            page: Some(3),
            page_size: Some(10_000),
        };
        assert_eq!(page.size(), MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 2 * MAX_PAGE_SIZE);
    }

    #[test]
    fn negative_page_clamps_to_first() {
        let page = Page {
            page: Some(-4),
            page_size: Some(10),
        };
        assert_eq!(page.number(), 1);
        assert_eq!(page.offset(), 0);
    }
}
