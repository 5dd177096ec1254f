//! # Canonical Catalog Module
//!
//! Owns the deduplicated media catalog database and provides repository
//! patterns for data access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Canonical items and their cross-reference ids
//! - Client linkages mapping each server's native ids to canonical items
//! - Per-user play state, favorites and ratings
//! - Collection and playlist membership with change history

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{
    CanonicalItem, CanonicalItemData, ClientLinkage, CrossRef, CrossRefSource, CrossRefs, ItemId,
    ItemKind, ListItem, RemoteUserData, UserId, UserItemState,
};
