//! # Catalog Database
//!
//! Opens the SQLite file behind the canonical catalog, applies the embedded
//! migrations and checks that every catalog table is present before any
//! repository touches the pool.
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("media.db").max_connections(4)).await?;
//! let catalog = SqliteCatalogRepository::new(pool.clone());
//! ```
//!
//! Every connection to `sqlite::memory:` opens its own empty database, so an
//! in-memory catalog is pinned to one connection that is never recycled.
//! Repositories never hold a transaction while issuing a query through the
//! pool.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tables the sync engine reads and writes.
pub const CATALOG_TABLES: [&str; 5] = [
    "canonical_items",
    "item_cross_refs",
    "client_linkages",
    "user_item_state",
    "list_items",
];

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Where the catalog lives and how many connections may reach it.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// How long a sync step waits for a free connection
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// A file-backed catalog at `database_path`, created if missing.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// In-memory catalogs stay at one connection regardless.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = if self.is_in_memory() { 1 } else { max.max(1) };
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Open the catalog, migrate it and verify its tables.
///
/// # Errors
///
/// - `Database` if the file cannot be opened or the pool cannot connect
/// - `Migration` if an embedded migration fails to apply
/// - `Migration` if a catalog table is still missing afterwards
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening catalog database"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true);

    // A recycled in-memory connection would drop the whole catalog
    let lifetime = if config.is_in_memory() {
        None
    } else {
        Some(Duration::from_secs(1800))
    };

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(lifetime)
        .idle_timeout(lifetime.map(|_| Duration::from_secs(600)))
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open catalog database");
            LibraryError::Database(e)
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        warn!(error = %e, "Catalog migration failed");
        LibraryError::Migration(e.to_string())
    })?;

    verify_schema(&pool).await?;
    debug!(connections = pool.size(), "Catalog database ready");

    Ok(pool)
}

/// An empty, migrated in-memory catalog.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn verify_schema(pool: &SqlitePool) -> Result<()> {
    for table in CATALOG_TABLES {
        let (present,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(pool)
                .await?;

        if present != 1 {
            return Err(LibraryError::Migration(format!("catalog table {table} is missing")));
        }
    }
    Ok(())
}
