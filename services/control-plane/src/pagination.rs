//! Page-based pagination for list endpoints

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Page size when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Largest page size a client may ask for
pub const MAX_PAGE_SIZE: u64 = 100;

/// Header carrying the total number of matching items
pub static TOTAL_COUNT: HeaderName = HeaderName::from_static("x-total-count");

/// Header echoing the page that was returned
pub static PAGE: HeaderName = HeaderName::from_static("x-page");

/// Header echoing the page size that was applied
pub static PAGE_SIZE: HeaderName = HeaderName::from_static("x-page-size");

/// Raw pagination query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    page: Option<i64>,
    #[serde(alias = "size")]
    page_size: Option<i64>,
}

impl PageQuery {
    /// Validate the query, applying defaults.
    pub fn validate(self) -> Result<Pagination> {
        let page = self.page.unwrap_or(1);
        let size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE as i64);

        if page < 1 {
            return Err(Error::BadRequest(format!("invalid page {page}")));
        }
        if size < 1 || size > MAX_PAGE_SIZE as i64 {
            return Err(Error::BadRequest(format!(
                "invalid page size {size}, must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        Ok(Pagination {
            page: page as u64,
            size: size as u64,
        })
    }
}

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// 1-indexed page number
    pub page: u64,

    /// Items per page
    pub size: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    /// A pagination which returns everything on the first page.
    pub fn all() -> Self {
        Self {
            page: 1,
            size: u64::MAX,
        }
    }

    /// Cut the requested page out of an already filtered and sorted list.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = (self.page - 1).saturating_mul(self.size);
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let size = usize::try_from(self.size).unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(size).collect()
    }

    /// Wrap the total and the items already cut for this pagination.
    pub fn page<T>(self, (total, items): (usize, Vec<T>)) -> Page<T> {
        Page::new(self, total, items)
    }
}

/// A page of items, rendered as a JSON array.
///
/// The total lands in `X-Total-Count`, the page and size in `X-Page` and
/// `X-Page-Size`.
#[derive(Debug)]
pub struct Page<T> {
    pagination: Pagination,
    total: usize,
    items: Vec<T>,
}

impl<T> Page<T> {
    /// Create a page from a total count and the items on this page
    pub fn new(pagination: Pagination, total: usize, items: Vec<T>) -> Self {
        Self {
            pagination,
            total,
            items,
        }
    }
}

impl<T: Serialize> IntoResponse for Page<T> {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (TOTAL_COUNT.clone(), HeaderValue::from(self.total)),
                (PAGE.clone(), HeaderValue::from(self.pagination.page)),
                (PAGE_SIZE.clone(), HeaderValue::from(self.pagination.size)),
            ],
            axum::Json(self.items),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<i64>, page_size: Option<i64>) -> PageQuery {
        PageQuery { page, page_size }
    }

    #[test]
    fn defaults_apply() {
        let pagination = query(None, None).validate().unwrap();
        assert_eq!(pagination, Pagination { page: 1, size: 10 });
    }

    #[test]
    fn boundaries_are_rejected() {
        assert!(query(Some(0), None).validate().is_err());
        assert!(query(Some(-1), None).validate().is_err());
        assert!(query(None, Some(0)).validate().is_err());
        assert!(query(None, Some(101)).validate().is_err());
        assert!(query(Some(3), Some(100)).validate().is_ok());
    }

    #[test]
    fn size_alias() {
        let parsed: PageQuery = serde_json::from_str(r#"{"page":2,"size":5}"#).unwrap();
        assert_eq!(parsed.validate().unwrap(), Pagination { page: 2, size: 5 });
    }

    #[test]
    fn slices_pages() {
        let items: Vec<u32> = (1..=25).collect();
        let page = Pagination { page: 3, size: 10 };
        assert_eq!(page.apply(items.clone()), vec![21, 22, 23, 24, 25]);
        assert!(Pagination { page: 4, size: 10 }.apply(items.clone()).is_empty());
        assert_eq!(Pagination::all().apply(items).len(), 25);
    }

    #[test]
    fn page_sets_headers() {
        let pagination = Pagination { page: 2, size: 3 };
        let response = pagination.page((42, vec![4, 5, 6])).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[&TOTAL_COUNT], "42");
        assert_eq!(response.headers()[&PAGE], "2");
        assert_eq!(response.headers()[&PAGE_SIZE], "3");
    }
}
