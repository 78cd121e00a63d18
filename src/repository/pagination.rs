//! Offset pagination.
//!
//! A [`PageRequest`] comes from the caller and is never trusted: the page is
//! raised to at least 1 and the limit is clamped to `[1, max_limit]` before
//! any statement is built. Results travel in the [`Paginated`] envelope:
//!
//! ```json
//! { "data": [...], "pagination": { "page": 1, "limit": 20, "total": 3,
//!   "totalPages": 1, "hasNext": false, "hasPrev": false } }
//! ```

use serde::{Deserialize, Serialize};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Largest page size a caller can get.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse a direction from user input. Anything but `desc` sorts ascending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            Self::Desc
        } else {
            Self::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Requested page, as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    /// Mapped through the entity's sort allow-list
    pub sort_by: Option<String>,
    pub direction: SortDirection,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort_by: None,
            direction: SortDirection::Asc,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by = Some(column.into());
        self.direction = direction;
        self
    }

    /// 1-based page number, at least 1.
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    /// Page size clamped to `[1, max_limit]`.
    pub fn limit(&self, max_limit: u32) -> u32 {
        self.limit.clamp(1, max_limit.max(1))
    }

    /// `(page − 1) × limit`
    pub fn offset(&self, max_limit: u32) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit(max_limit))
    }
}

/// Pagination block of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let limit = limit.max(1);
        Self {
            page,
            limit,
            total,
            total_pages: total.div_ceil(u64::from(limit)),
            has_next: u64::from(page) * u64::from(limit) < total,
            has_prev: page > 1,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_request_clamping() {
        let request = PageRequest::new(0, 1_000);
        assert_eq!(request.page(), 1);
        assert_eq!(request.limit(MAX_PAGE_LIMIT), 100);
        assert_eq!(request.offset(MAX_PAGE_LIMIT), 0);

        let request = PageRequest::new(3, 0);
        assert_eq!(request.limit(MAX_PAGE_LIMIT), 1);
        assert_eq!(request.offset(MAX_PAGE_LIMIT), 2);

        let request = PageRequest::new(4, 25);
        assert_eq!(request.offset(MAX_PAGE_LIMIT), 75);
    }

    #[test]
    fn test_page_request_deserialize_defaults() {
        let request: PageRequest = serde_json::from_value(json!({ "page": 2 })).unwrap();
        assert_eq!(request.page, 2);
        assert_eq!(request.limit, DEFAULT_PAGE_LIMIT);
        assert!(request.sort_by.is_none());

        let request: PageRequest =
            serde_json::from_value(json!({ "sortBy": "name", "direction": "desc" })).unwrap();
        assert_eq!(request.sort_by.as_deref(), Some("name"));
        assert_eq!(request.direction, SortDirection::Desc);
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!(SortDirection::parse("DESC"), SortDirection::Desc);
        assert_eq!(SortDirection::parse(" desc "), SortDirection::Desc);
        assert_eq!(SortDirection::parse("asc"), SortDirection::Asc);
        assert_eq!(SortDirection::parse("; DROP TABLE x"), SortDirection::Asc);
    }

    #[test]
    fn test_pagination_math() {
        let p = Pagination::new(1, 20, 3);
        assert_eq!(p.total_pages, 1);
        assert!(!p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::new(2, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(p.has_prev);

        let p = Pagination::new(3, 10, 30);
        assert!(!p.has_next);

        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
    }

    #[test]
    fn test_envelope_uses_camel_case() {
        let page = Paginated {
            data: vec![json!({ "id": 1 })],
            pagination: Pagination::new(1, 20, 1),
        };
        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(
            value["pagination"],
            json!({
                "page": 1,
                "limit": 20,
                "total": 1,
                "totalPages": 1,
                "hasNext": false,
                "hasPrev": false
            })
        );
    }
}
