//! # Core Configuration Module
//!
//! Configuration for the sync engine host.
//!
//! ## Overview
//!
//! A builder constructs a `CoreConfig` holding the catalog database location,
//! event bus sizing, sync tuning and logging setup. `build()` validates
//! everything up front so a bad value fails at startup, not halfway through a
//! sync run.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/media-sync/catalog.db")
//!     .page_size(100)
//!     .request_timeout(Duration::from_secs(15))
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.sync.page_size, 100);
//! ```
//!
//! Omitting the database path keeps the catalog in memory, which is what the
//! tests use.

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use crate::logging::LoggingConfig;
use bridge_traits::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Cross-reference sources the engine knows how to match on.
pub const KNOWN_CROSS_REF_SOURCES: &[&str] = &["imdb", "tmdb", "tvdb", "musicbrainz"];

/// Tuning for sync runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Items requested per page
    pub page_size: u32,
    /// Per-request timeout for client calls
    pub request_timeout_secs: u64,
    /// Emit a progress update every N items within a capability
    pub progress_item_interval: u64,
    /// Consecutive persistence failures that fail a run
    pub max_consecutive_persistence_failures: u32,
    /// Cross-reference sources trusted for matching, in priority order
    pub trusted_cross_ref_sources: Vec<String>,
    /// Create placeholder parents instead of skipping orphaned children
    pub create_missing_parents: bool,
    /// Per-item diagnostics kept on a job
    pub max_diagnostics: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 200,
            request_timeout_secs: 30,
            progress_item_interval: 25,
            max_consecutive_persistence_failures: 5,
            trusted_cross_ref_sources: KNOWN_CROSS_REF_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            create_missing_parents: true,
            max_diagnostics: 100,
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validates the sync settings.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > 10_000 {
            return Err(Error::Config(format!(
                "Page size must be between 1 and 10000, got {}",
                self.page_size
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }

        if self.progress_item_interval == 0 {
            return Err(Error::Config(
                "Progress item interval must be greater than 0".to_string(),
            ));
        }

        if self.max_consecutive_persistence_failures == 0 {
            return Err(Error::Config(
                "Persistence failure threshold must be greater than 0".to_string(),
            ));
        }

        for (i, source) in self.trusted_cross_ref_sources.iter().enumerate() {
            let normalized = source.to_lowercase();
            if !KNOWN_CROSS_REF_SOURCES.contains(&normalized.as_str()) {
                return Err(Error::Config(format!(
                    "Unknown cross-reference source '{}'. Expected one of: {}",
                    source,
                    KNOWN_CROSS_REF_SOURCES.join(", ")
                )));
            }
            if self.trusted_cross_ref_sources[..i]
                .iter()
                .any(|earlier| earlier.to_lowercase() == normalized)
            {
                return Err(Error::Config(format!(
                    "Cross-reference source '{}' listed twice",
                    source
                )));
            }
        }

        Ok(())
    }
}

/// Core configuration for the sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite catalog; `None` keeps it in memory
    pub database_path: Option<PathBuf>,

    /// Maximum pooled database connections
    pub max_db_connections: u32,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,

    /// Sync run tuning
    pub sync: SyncSettings,

    /// Logging setup
    pub logging: LoggingConfig,

    /// Time source for every stored timestamp
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("max_db_connections", &self.max_db_connections)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("sync", &self.sync)
            .field("logging", &self.logging)
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Whether the catalog lives in memory only
    pub fn is_in_memory(&self) -> bool {
        self.database_path.is_none()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty when given
    /// - Connection and buffer sizes are positive
    /// - Sync settings are within range
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.database_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if self.max_db_connections == 0 {
            return Err(Error::Config(
                "At least one database connection is required".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.sync.validate()
    }
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    max_db_connections: Option<u32>,
    event_buffer_size: Option<usize>,
    sync: SyncSettings,
    logging: Option<LoggingConfig>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the catalog database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/catalog.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Keeps the catalog in memory.
    pub fn in_memory(mut self) -> Self {
        self.database_path = None;
        self
    }

    pub fn max_db_connections(mut self, max: u32) -> Self {
        self.max_db_connections = Some(max);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Replaces all sync settings at once.
    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync = settings;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.sync.page_size = page_size;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.sync.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn progress_item_interval(mut self, interval: u64) -> Self {
        self.sync.progress_item_interval = interval;
        self
    }

    pub fn max_consecutive_persistence_failures(mut self, max: u32) -> Self {
        self.sync.max_consecutive_persistence_failures = max;
        self
    }

    /// Sets the trusted cross-reference sources, highest priority first.
    pub fn trusted_cross_ref_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync.trusted_cross_ref_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn create_missing_parents(mut self, enabled: bool) -> Self {
        self.sync.create_missing_parents = enabled;
        self
    }

    pub fn max_diagnostics(mut self, max: usize) -> Self {
        self.sync.max_diagnostics = max;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Injects a time source (defaults to [`SystemClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` with an actionable message if any value is
    /// out of range.
    pub fn build(self) -> Result<CoreConfig> {
        let config = CoreConfig {
            database_path: self.database_path,
            max_db_connections: self.max_db_connections.unwrap_or(5),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            sync: self.sync,
            logging: self.logging.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::FixedClock;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::builder().build().unwrap();

        assert!(config.is_in_memory());
        assert_eq!(config.max_db_connections, 5);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert_eq!(config.sync.page_size, 200);
        assert_eq!(config.sync.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync.progress_item_interval, 25);
        assert_eq!(config.sync.max_consecutive_persistence_failures, 5);
        assert_eq!(config.sync.trusted_cross_ref_sources.len(), 4);
        assert!(config.sync.create_missing_parents);
        assert_eq!(config.sync.max_diagnostics, 100);
    }

    #[test]
    fn test_builder_overrides() {
        let config = CoreConfig::builder()
            .database_path("/tmp/catalog.db")
            .max_db_connections(2)
            .page_size(50)
            .request_timeout(Duration::from_secs(5))
            .trusted_cross_ref_sources(["tmdb", "imdb"])
            .create_missing_parents(false)
            .clock(Arc::new(FixedClock::at(42)))
            .build()
            .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/catalog.db")));
        assert_eq!(config.sync.page_size, 50);
        assert_eq!(config.sync.request_timeout_secs, 5);
        assert_eq!(config.sync.trusted_cross_ref_sources, vec!["tmdb", "imdb"]);
        assert!(!config.sync.create_missing_parents);
        assert_eq!(config.clock.unix_timestamp(), 42);
        assert!(format!("{:?}", config).contains("Clock { ... }"));
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        assert!(CoreConfig::builder().page_size(0).build().is_err());
        assert!(CoreConfig::builder()
            .request_timeout(Duration::from_millis(10))
            .build()
            .is_err());
        assert!(CoreConfig::builder().progress_item_interval(0).build().is_err());
        assert!(CoreConfig::builder()
            .max_consecutive_persistence_failures(0)
            .build()
            .is_err());
        assert!(CoreConfig::builder().database_path("").build().is_err());
        assert!(CoreConfig::builder().event_buffer_size(0).build().is_err());
    }

    #[test]
    fn test_cross_ref_sources_validated() {
        let err = CoreConfig::builder()
            .trusted_cross_ref_sources(["imdb", "anidb"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("anidb"));

        assert!(CoreConfig::builder()
            .trusted_cross_ref_sources(["imdb", "IMDB"])
            .build()
            .is_err());

        assert!(CoreConfig::builder()
            .trusted_cross_ref_sources(Vec::<String>::new())
            .build()
            .is_ok());
    }

    #[test]
    fn test_sync_settings_deserialize_with_defaults() {
        let settings: SyncSettings = serde_json::from_str(r#"{"page_size": 75}"#).unwrap();
        assert_eq!(settings.page_size, 75);
        assert_eq!(settings.request_timeout_secs, 30);
        assert!(settings.validate().is_ok());
    }
}
