use serde::Serialize;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 50;

/// Normalised `page` / `limit` query values. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: i64,
    pub limit: i64,
}

impl Paging {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, paging: Paging, total: i64) -> Self {
        let total_pages = (total + paging.limit - 1) / paging.limit;
        Self {
            items,
            page: paging.page,
            limit: paging.limit,
            total,
            total_pages,
        }
    }
}

/// `%term%` for a LIKE ... ESCAPE '\' clause, with wildcards in the term escaped.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_and_clamps() {
        assert_eq!(Paging::new(None, None), Paging { page: 1, limit: 20 });
        assert_eq!(Paging::new(Some(0), Some(500)), Paging { page: 1, limit: 50 });
        assert_eq!(Paging::new(Some(-3), Some(0)), Paging { page: 1, limit: 1 });
        assert_eq!(Paging::new(Some(3), Some(10)).offset(), 20);
        assert_eq!(Paging::new(Some(i64::MAX), Some(50)).offset(), i64::MAX);
    }

    #[test]
    fn total_pages_rounds_up() {
        let paging = Paging::new(Some(1), Some(10));
        assert_eq!(Page::new(Vec::<()>::new(), paging, 0).total_pages, 0);
        assert_eq!(Page::new(Vec::<()>::new(), paging, 10).total_pages, 1);
        assert_eq!(Page::new(Vec::<()>::new(), paging, 11).total_pages, 2);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }
}
