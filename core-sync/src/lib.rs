//! # Sync Module
//!
//! Synchronizes media server catalogs and per-user state into the canonical
//! library.
//!
//! ## Overview
//!
//! This module manages the lifecycle of sync jobs, including:
//! - Fetching native items from `MediaClient` adapters capability by capability
//! - Converting native items into canonical data
//! - Resolving each item to one canonical record across all clients
//! - Merging play state, favorites and ratings per user
//! - Replacing collection and playlist membership
//!
//! ## Components
//!
//! - **Sync Job State Machine** (`job`): Job lifecycle with validated state transitions
//! - **Converter Registry** (`factory`, `converters`): Native item converters per server family
//! - **Identity Resolution** (`identity`): Linkage, cross-reference match or create
//! - **User-State Merge** (`merge`): Rules for folding remote reports into stored state
//! - **Client Registry** (`clients`): Adapters keyed by client id
//! - **Repository** (`repository`): Sync job storage
//! - **Sync Coordinator** (`coordinator`): Orchestrates runs per (user, client)

pub mod clients;
pub mod converters;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod identity;
pub mod job;
pub mod merge;
pub mod repository;

pub use clients::ClientRegistry;
pub use coordinator::{SyncConfig, SyncCoordinator, SyncRepositories};
pub use error::{Result, SyncError};
pub use factory::{ConvertFn, ConvertedItem, ConverterRegistry, ParentRef, RequiredConverter};
pub use identity::{IdentityResolver, Resolution, ResolvedItem};
pub use job::{
    CapabilityFailure, JobProgress, SkipReason, SyncDiagnostic, SyncJob, SyncJobId, SyncJobStats,
    SyncProgress, SyncStatus,
};
pub use merge::merge_user_state;
pub use repository::{InMemorySyncJobRepository, SyncJobRepository, DEFAULT_JOB_RETENTION};
