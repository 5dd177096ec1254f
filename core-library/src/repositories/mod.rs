//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for the catalog store.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `CatalogRepository` - Canonical items, cross-reference ids and client linkages
//! - `UserStateRepository` - Per-user play state, favorites and ratings
//! - `ListItemRepository` - Collection and playlist membership

pub mod catalog;
pub mod list_items;
pub mod user_state;

pub use catalog::{unclaimed_cross_refs, CatalogRepository, SqliteCatalogRepository};
pub use list_items::{ListDiff, ListItemRepository, SqliteListItemRepository};
pub use user_state::{SqliteUserStateRepository, UserStateRepository};
