use crawldeck_api::ListParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

pub const DEFAULT_LIMIT: u64 = 10;

/// Columns the list endpoint can order by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Url,
    Status,
    PageTitle,
}

impl SortField {
    pub const ALL: [SortField; 5] = [
        SortField::CreatedAt,
        SortField::UpdatedAt,
        SortField::Url,
        SortField::Status,
        SortField::PageTitle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Url => "url",
            SortField::Status => "status",
            SortField::PageTitle => "page_title",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "created_at" | "created" => Some(SortField::CreatedAt),
            "updated_at" | "updated" => Some(SortField::UpdatedAt),
            "url" => Some(SortField::Url),
            "status" => Some(SortField::Status),
            "page_title" | "title" => Some(SortField::PageTitle),
            _ => None,
        }
    }

    /// The field after this one, wrapping around.
    pub fn next(&self) -> Self {
        let index = Self::ALL.iter().position(|f| f == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

/// Ordering of a list query. Only known columns can be expressed, so nothing
/// caller-controlled ever reaches the server's ORDER BY verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn descending(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} DESC", self.field.as_str())
        } else {
            f.write_str(self.field.as_str())
        }
    }
}

/// Identifies one list query: pagination, sort and filter.
///
/// Equality and hashing go through [`QueryDescriptor::cache_key`], so two
/// descriptors that render the same canonical key share one cache entry.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    limit: u64,
    offset: u64,
    sort_by: SortKey,
    filter_text: String,
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            sort_by: SortKey::default(),
            filter_text: String::new(),
        }
    }
}

impl QueryDescriptor {
    pub fn new(limit: u64, offset: u64, sort_by: SortKey, filter_text: &str) -> Self {
        Self {
            limit: limit.max(1),
            offset,
            sort_by,
            filter_text: filter_text.trim().to_string(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn sort_by(&self) -> SortKey {
        self.sort_by
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn cache_key(&self) -> String {
        format!(
            "limit={}&offset={}&sortBy={}&filterBy={}",
            self.limit, self.offset, self.sort_by, self.filter_text
        )
    }

    pub fn to_params(&self) -> ListParams {
        ListParams {
            limit: self.limit,
            offset: self.offset,
            sort_by: self.sort_by.to_string(),
            filter_by: self.filter_text.clone(),
        }
    }

    /// `ceil(total / limit)`.
    pub fn page_count(&self, total: u64) -> u64 {
        total.div_ceil(self.limit)
    }

    /// Zero-based page this descriptor points at.
    pub fn page_index(&self) -> u64 {
        self.offset / self.limit
    }

    pub fn with_page(&self, page_index: u64) -> Self {
        Self {
            offset: page_index.saturating_mul(self.limit),
            ..self.clone()
        }
    }

    pub fn with_limit(&self, limit: u64) -> Self {
        Self {
            limit: limit.max(1),
            offset: 0,
            ..self.clone()
        }
    }

    pub fn next_page(&self) -> Self {
        self.with_page(self.page_index() + 1)
    }

    pub fn previous_page(&self) -> Self {
        self.with_page(self.page_index().saturating_sub(1))
    }

    /// A new filter starts again at the first page.
    pub fn with_filter(&self, filter_text: &str) -> Self {
        Self {
            offset: 0,
            filter_text: filter_text.trim().to_string(),
            ..self.clone()
        }
    }

    /// A new sort starts again at the first page.
    pub fn with_sort(&self, sort_by: SortKey) -> Self {
        Self {
            offset: 0,
            sort_by,
            ..self.clone()
        }
    }
}

impl PartialEq for QueryDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.cache_key() == other.cache_key()
    }
}

impl Eq for QueryDescriptor {}

impl Hash for QueryDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cache_key().hash(state);
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_page_count_rounds_up() {
        let descriptor = QueryDescriptor::new(5, 0, SortKey::default(), "");
        assert_eq!(descriptor.page_count(23), 5);
        assert_eq!(descriptor.page_count(25), 5);
        assert_eq!(descriptor.page_count(0), 0);
        assert_eq!(descriptor.page_count(1), 1);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let descriptor = QueryDescriptor::new(0, 0, SortKey::default(), "");
        assert_eq!(descriptor.limit(), 1);
    }

    #[test]
    fn test_identical_descriptors_collide() {
        let a = QueryDescriptor::new(10, 0, SortKey::default(), "example");
        let b = QueryDescriptor::new(10, 0, SortKey::default(), "  example ");

        assert_eq!(a, b);
        let set: HashSet<QueryDescriptor> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_any_field_difference_is_distinct() {
        let base = QueryDescriptor::default();
        assert_ne!(base, base.with_limit(20));
        assert_ne!(base, base.next_page());
        assert_ne!(base, base.with_filter("rust"));
        assert_ne!(base, base.with_sort(SortKey::descending(SortField::CreatedAt)));
    }

    #[test]
    fn test_cache_key_format() {
        let descriptor =
            QueryDescriptor::new(5, 10, SortKey::descending(SortField::UpdatedAt), "docs");
        assert_eq!(
            descriptor.cache_key(),
            "limit=5&offset=10&sortBy=updated_at DESC&filterBy=docs"
        );
    }

    #[test]
    fn test_paging_navigation() {
        let descriptor = QueryDescriptor::new(5, 0, SortKey::default(), "");
        let second = descriptor.next_page();
        assert_eq!(second.offset(), 5);
        assert_eq!(second.page_index(), 1);
        assert_eq!(second.previous_page().offset(), 0);
        assert_eq!(descriptor.previous_page().offset(), 0);
    }

    #[test]
    fn test_filter_and_sort_reset_offset() {
        let third = QueryDescriptor::new(5, 10, SortKey::default(), "");
        assert_eq!(third.with_filter("x").offset(), 0);
        assert_eq!(third.with_sort(SortKey::ascending(SortField::Url)).offset(), 0);
    }

    #[test]
    fn test_params_render_sort() {
        let descriptor = QueryDescriptor::new(5, 0, SortKey::descending(SortField::Status), "a");
        let params = descriptor.to_params();
        assert_eq!(params.sort_by, "status DESC");
        assert_eq!(params.filter_by, "a");
    }

    #[test]
    fn test_sort_field_parsing_and_cycle() {
        assert_eq!(SortField::from_str("title"), Some(SortField::PageTitle));
        assert_eq!(SortField::from_str("Created-At"), Some(SortField::CreatedAt));
        assert_eq!(SortField::from_str("bogus"), None);
        assert_eq!(SortField::PageTitle.next(), SortField::CreatedAt);
    }
}
