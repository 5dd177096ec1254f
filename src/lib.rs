//! Workspace umbrella crate.
//!
//! Re-exports the workspace crates so host applications can depend on
//! `media-sync` alone instead of wiring each crate individually.

pub use bridge_traits;
pub use core_library;
pub use core_runtime;
pub use core_service;
pub use core_sync;

pub use core_service::{CoreError, CoreService};
