use bridge_traits::{Capability, ClientError};
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Sync already in progress for user {user_id} on client {client_id}")]
    SyncInProgress { user_id: String, client_id: String },

    #[error("Client {0} is not registered")]
    ClientNotRegistered(String),

    #[error("Conversion failed for {native_kind}: {message}")]
    Conversion {
        native_kind: String,
        message: String,
    },

    #[error(
        "No converter registered for {client_kind} native kind '{native_kind}' as {canonical_kind}"
    )]
    NoFactoryRegistered {
        client_kind: String,
        native_kind: String,
        canonical_kind: String,
    },

    #[error("Capability not supported: {0}")]
    CapabilityUnsupported(Capability),

    #[error("Fetch failed for {capability}: {source}")]
    Fetch {
        capability: Capability,
        #[source]
        source: ClientError,
    },

    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    #[error("Missing parent {parent_kind} '{external_id}'")]
    MissingParent {
        parent_kind: String,
        external_id: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] LibraryError),

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn conversion(native_kind: &str, message: impl Into<String>) -> Self {
        SyncError::Conversion {
            native_kind: native_kind.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error only skips the item that produced it.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            SyncError::Conversion { .. }
                | SyncError::IdentityConflict(_)
                | SyncError::MissingParent { .. }
                | SyncError::Persistence(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
