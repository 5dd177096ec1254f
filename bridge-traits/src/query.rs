//! Query Options
//!
//! Server-agnostic paging, sorting and filtering passed to every client fetch.
//! Adapters translate these into their native query parameters and ignore
//! what their server cannot express.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Title,
    SortTitle,
    DateAdded,
    ReleaseDate,
    LastPlayed,
    PlayCount,
    CommunityRating,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Filters an adapter may apply server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    pub favorite: Option<bool>,
    pub played: Option<bool>,
    pub genres: Vec<String>,
    pub years: Vec<i32>,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub studios: Vec<String>,
    pub content_ratings: Vec<String>,
    pub tags: Vec<String>,
    pub added_after: Option<NaiveDate>,
    pub added_before: Option<NaiveDate>,
    pub released_after: Option<NaiveDate>,
    pub released_before: Option<NaiveDate>,
    pub min_rating: Option<f64>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        *self == QueryFilters::default()
    }
}

/// Options accepted by every fetch on [`MediaClient`](crate::client::MediaClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Remote user to act as; `None` means the adapter's default user
    pub user_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub sort: Option<SortKey>,
    pub sort_direction: SortDirection,
    pub search: Option<String>,
    pub filters: QueryFilters,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            user_id: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            sort: None,
            sort_direction: SortDirection::Ascending,
            search: None,
            filters: QueryFilters::default(),
        }
    }
}

impl QueryOptions {
    /// First page of `limit` items.
    pub fn first_page(limit: u32) -> Self {
        Self::default().with_page(0, limit)
    }

    pub fn with_page(mut self, offset: u32, limit: u32) -> Self {
        self.offset = offset;
        self.limit = limit.max(1);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_sort(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.sort = Some(key);
        self.sort_direction = direction;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Options for the page after this one, keeping everything else.
    pub fn next_page(&self) -> Self {
        let mut next = self.clone();
        next.offset = self.offset.saturating_add(self.limit);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = QueryOptions::default();
        assert_eq!(options.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(options.offset, 0);
        assert!(options.filters.is_empty());
        assert!(options.user_id.is_none());
    }

    #[test]
    fn test_next_page_keeps_filters() {
        let options = QueryOptions::first_page(50)
            .with_user("remote-user")
            .with_sort(SortKey::SortTitle, SortDirection::Descending)
            .with_filters(QueryFilters {
                favorite: Some(true),
                ..Default::default()
            });

        let next = options.next_page();
        assert_eq!(next.offset, 50);
        assert_eq!(next.limit, 50);
        assert_eq!(next.user_id.as_deref(), Some("remote-user"));
        assert_eq!(next.sort, Some(SortKey::SortTitle));
        assert_eq!(next.filters.favorite, Some(true));
        assert_eq!(next.next_page().offset, 100);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let options = QueryOptions::default().with_page(10, 0);
        assert_eq!(options.limit, 1);
        assert_eq!(options.offset, 10);
    }

    #[test]
    fn test_filters_not_empty_with_genre() {
        let filters = QueryFilters {
            genres: vec!["Drama".to_string()],
            ..Default::default()
        };
        assert!(!filters.is_empty());
    }
}
