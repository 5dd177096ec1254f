//! # Client Bridge Traits
//!
//! The contract between the sync core and the adapters that talk to media
//! servers.
//!
//! ## Overview
//!
//! The core never speaks HTTP or knows a server's authentication scheme.
//! Each configured server is wrapped in an adapter implementing
//! [`MediaClient`](client::MediaClient), which reports which capabilities it
//! supports and returns native items page by page. Converting those items to
//! canonical records happens in the core.
//!
//! ## Traits
//!
//! - [`MediaClient`](client::MediaClient) - Capability probes and paged fetches
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Adapters return [`ClientError`](error::ClientError). An unsupported
//! capability is reported as `ClientError::NotSupported` so the caller can
//! skip the step without treating it as an empty catalog. Host-side sinks use
//! [`BridgeError`](error::BridgeError).
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`: one client instance may serve several
//! concurrent sync runs for different users.

pub mod client;
pub mod error;
pub mod query;
pub mod time;

pub use error::{BridgeError, ClientError, ClientResult};

// Re-export commonly used types
pub use client::{Capability, ClientId, ClientKind, MediaClient, NativeItem, NativePage};
pub use query::{QueryFilters, QueryOptions, SortDirection, SortKey};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
