//! Pagination utilities for the notification inbox

/// Page size when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: i64 = 10;
/// Largest page a client may request
pub const MAX_PAGE_SIZE: i64 = 100;

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    /// Rows per page
    pub limit: i64,
    /// Total number of pages
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

/// Calculate pagination metadata
///
/// `limit` is clamped to `1..=MAX_PAGE_SIZE` and `page` to at least 1. A
/// page past the end is kept as requested and simply yields no rows.
///
/// # Examples
/// ```
/// use verity_api::pagination::calculate_pagination;
///
/// // 25 results at 10 per page = 3 pages
/// let p = calculate_pagination(25, Some(2), Some(10));
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 10);
///
/// // Oversized limits are clamped
/// let p = calculate_pagination(25, None, Some(1000));
/// assert_eq!(p.limit, 100);
/// assert_eq!(p.total_pages, 1);
/// ```
pub fn calculate_pagination(
    total_results: i64,
    requested_page: Option<i64>,
    requested_limit: Option<i64>,
) -> Pagination {
    let limit = requested_limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let page = requested_page.unwrap_or(1).max(1);
    let total_pages = (total_results.max(0) + limit - 1) / limit;

    Pagination {
        page,
        limit,
        total_pages,
        offset: (page - 1).saturating_mul(limit),
    }
}
