//! # Sync Job State Machine
//!
//! Manages the lifecycle of sync jobs with validated state transitions.
//!
//! ## Overview
//!
//! One job is created per run for a (user, client) pair. It carries a
//! monotonically increasing progress value and status message for pollers,
//! per-reason skip counters, and a bounded list of per-item diagnostics.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Succeeded
//!     ↓         ↓
//!     └──────→ Failed
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::ClientId;
//! use core_library::UserId;
//! use core_sync::{SyncJob, SyncJobStats, SyncStatus};
//!
//! let job = SyncJob::new(UserId::new(), ClientId::new("living-room"), 1_700_000_000);
//! let mut job = job.start(1_700_000_000).unwrap();
//!
//! job.update_progress(40, "movies: 80 items").unwrap();
//!
//! let job = job.complete(SyncJobStats::default(), 1_700_000_060).unwrap();
//! assert_eq!(job.status, SyncStatus::Succeeded);
//! assert_eq!(job.progress.percent, 100);
//! ```

use crate::{Result, SyncError};
use bridge_traits::{Capability, ClientId};
use core_library::UserId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    /// Create a new random sync job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Job has been created but not yet started
    Pending,
    /// Job is currently running
    Running,
    /// Job finished; individual items may have been skipped
    Succeeded,
    /// No capability could be reached, the run was cancelled, or it failed fast
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Succeeded | SyncStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Running => "running",
            SyncStatus::Succeeded => "succeeded",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SyncStatus::Pending),
            "running" => Ok(SyncStatus::Running),
            "succeeded" => Ok(SyncStatus::Succeeded),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// Progress information for a running sync job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Progress percentage (0-100), never decreases
    pub percent: u8,
    /// Items fetched and handled so far, skipped ones included
    pub items_processed: u64,
    /// Human-readable status line
    pub message: String,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            percent: 0,
            items_processed: 0,
            message: "Pending".to_string(),
        }
    }

    /// Move forward to `percent` (capped at 100). Lower values keep the
    /// current percentage but still replace the message.
    pub fn advance(&mut self, percent: u8, message: &str) {
        self.percent = self.percent.max(percent.min(100));
        self.message = message.to_string();
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot returned to pollers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub percent: u8,
    pub message: String,
    pub status: SyncStatus,
}

impl From<&SyncJob> for JobProgress {
    fn from(job: &SyncJob) -> Self {
        Self {
            percent: job.progress.percent,
            message: job.progress.message.clone(),
            status: job.status,
        }
    }
}

// ============================================================================
// Statistics and Diagnostics
// ============================================================================

/// Why an item was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Conversion,
    MissingParent,
    IdentityConflict,
    Persistence,
}

impl SkipReason {
    /// Classify an item-level error. Returns `None` for errors that are not
    /// item-level.
    pub fn for_error(error: &SyncError) -> Option<Self> {
        match error {
            SyncError::Conversion { .. } => Some(SkipReason::Conversion),
            SyncError::MissingParent { .. } => Some(SkipReason::MissingParent),
            SyncError::IdentityConflict(_) => Some(SkipReason::IdentityConflict),
            SyncError::Persistence(_) => Some(SkipReason::Persistence),
            _ => None,
        }
    }

    fn describe(&self, count: u64) -> String {
        let plural = if count == 1 { "" } else { "s" };
        match self {
            SkipReason::Conversion => format!("{} conversion error{}", count, plural),
            SkipReason::MissingParent => format!("{} missing parent", count),
            SkipReason::IdentityConflict => format!("{} identity conflict{}", count, plural),
            SkipReason::Persistence => format!("{} persistence error{}", count, plural),
        }
    }
}

/// Statistics collected during a sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobStats {
    /// Items fetched from the client
    pub items_seen: u64,
    /// Items written against a canonical record
    pub items_synced: u64,
    /// New canonical items created for fetched items
    pub items_created: u64,
    /// Items matched to an existing record by cross-reference id
    pub items_matched: u64,
    /// Placeholder parents created
    pub placeholders_created: u64,
    /// User states inserted or merged
    pub user_states_updated: u64,
    /// Lists whose membership changed
    pub lists_updated: u64,
    pub conversion_errors: u64,
    pub missing_parent: u64,
    pub identity_conflicts: u64,
    pub persistence_errors: u64,
    /// Capabilities fetched to the end
    pub capabilities_synced: u64,
    /// Capabilities aborted by a fetch error
    pub capabilities_failed: u64,
    /// Capabilities the client reported as unsupported
    pub capabilities_unsupported: u64,
}

impl SyncJobStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Conversion => self.conversion_errors += 1,
            SkipReason::MissingParent => self.missing_parent += 1,
            SkipReason::IdentityConflict => self.identity_conflicts += 1,
            SkipReason::Persistence => self.persistence_errors += 1,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.conversion_errors + self.missing_parent + self.identity_conflicts + self.persistence_errors
    }

    /// Human-readable outcome line
    ///
    /// # Examples
    ///
    /// ```
    /// use core_sync::SyncJobStats;
    ///
    /// let stats = SyncJobStats {
    ///     items_seen: 820,
    ///     items_synced: 812,
    ///     conversion_errors: 5,
    ///     missing_parent: 3,
    ///     ..SyncJobStats::default()
    /// };
    /// assert_eq!(
    ///     stats.summary(),
    ///     "synced 812/820 items, 8 skipped: 5 conversion errors, 3 missing parent"
    /// );
    /// ```
    pub fn summary(&self) -> String {
        let mut summary = format!("synced {}/{} items", self.items_synced, self.items_seen);

        let skipped = self.skipped();
        if skipped > 0 {
            let parts: Vec<String> = [
                (SkipReason::Conversion, self.conversion_errors),
                (SkipReason::MissingParent, self.missing_parent),
                (SkipReason::IdentityConflict, self.identity_conflicts),
                (SkipReason::Persistence, self.persistence_errors),
            ]
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(reason, count)| reason.describe(*count))
            .collect();
            let _ = write!(summary, ", {} skipped: {}", skipped, parts.join(", "));
        }

        if self.capabilities_failed > 0 {
            let plural = if self.capabilities_failed == 1 { "y" } else { "ies" };
            let _ = write!(
                summary,
                "; {} capabilit{} failed",
                self.capabilities_failed, plural
            );
        }

        summary
    }
}

/// Detail about one skipped item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDiagnostic {
    pub capability: Capability,
    pub native_kind: String,
    pub external_id: Option<String>,
    pub reason: SkipReason,
    pub message: String,
}

/// A capability step aborted by a fetch error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFailure {
    pub capability: Capability,
    pub message: String,
}

// ============================================================================
// Sync Job Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: SyncJobId,
    pub user_id: UserId,
    pub client_id: ClientId,
    pub status: SyncStatus,
    pub progress: SyncProgress,
    pub stats: SyncJobStats,
    /// Most recent skipped items, bounded
    pub diagnostics: VecDeque<SyncDiagnostic>,
    /// Diagnostics dropped once the bound was reached
    pub diagnostics_dropped: u64,
    pub failed_capabilities: Vec<CapabilityFailure>,
    /// Outcome line, set when the job ends
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl SyncJob {
    /// Create a new sync job in pending state
    pub fn new(user_id: UserId, client_id: ClientId, now: i64) -> Self {
        Self {
            id: SyncJobId::new(),
            user_id,
            client_id,
            status: SyncStatus::Pending,
            progress: SyncProgress::new(),
            stats: SyncJobStats::new(),
            diagnostics: VecDeque::new(),
            diagnostics_dropped: 0,
            failed_capabilities: Vec::new(),
            summary: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Start the sync job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Pending` state
    pub fn start(mut self, now: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.started_at = Some(now);
        self.progress.advance(0, "Starting sync");
        Ok(self)
    }

    /// Update progress information
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Running` state
    pub fn update_progress(&mut self, percent: u8, message: &str) -> Result<()> {
        if self.status != SyncStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Job must be running to update progress".to_string(),
            });
        }

        self.progress.advance(percent, message);
        Ok(())
    }

    /// Keep a diagnostic, dropping the oldest once `max` are held.
    pub fn record_diagnostic(&mut self, diagnostic: SyncDiagnostic, max: usize) {
        if max == 0 {
            self.diagnostics_dropped += 1;
            return;
        }
        while self.diagnostics.len() >= max {
            self.diagnostics.pop_front();
            self.diagnostics_dropped += 1;
        }
        self.diagnostics.push_back(diagnostic);
    }

    /// Mark the job as succeeded
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Running` state
    pub fn complete(mut self, stats: SyncJobStats, now: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Succeeded)?;
        let summary = stats.summary();
        self.status = SyncStatus::Succeeded;
        self.completed_at = Some(now);
        self.stats = stats;
        self.progress.advance(100, &summary);
        self.summary = Some(summary);
        Ok(self)
    }

    /// Mark the job as failed
    ///
    /// Progress keeps its last value.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already in a terminal state
    pub fn fail(mut self, error_message: String, stats: SyncJobStats, now: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        let summary = format!("{}: {}", error_message, stats.summary());
        self.status = SyncStatus::Failed;
        self.completed_at = Some(now);
        self.stats = stats;
        self.progress.message = summary.clone();
        self.summary = Some(summary);
        self.error_message = Some(error_message);
        Ok(self)
    }

    /// Duration in seconds, once the job has ended
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start).max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (SyncStatus::Pending, SyncStatus::Running)
                | (SyncStatus::Pending, SyncStatus::Failed)
                | (SyncStatus::Running, SyncStatus::Succeeded)
                | (SyncStatus::Running, SyncStatus::Failed)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
