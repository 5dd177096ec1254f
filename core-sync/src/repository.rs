//! # Sync Job Repository
//!
//! Storage for sync job runs.
//!
//! ## Overview
//!
//! Job runs are ephemeral: one per orchestrator invocation, kept for polling
//! and recent history. The bundled implementation keeps them in memory
//! behind a `tokio::sync::RwLock` and retains only the most recent finished
//! runs per (user, client); active runs are never pruned.

use crate::{Result, SyncError, SyncJob, SyncJobId};
use async_trait::async_trait;
use bridge_traits::ClientId;
use core_library::UserId;
use std::collections::HashMap;
use tokio::sync::RwLock;

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync job persistence
#[async_trait]
pub trait SyncJobRepository: Send + Sync {
    /// Insert a new sync job
    ///
    /// # Errors
    ///
    /// Returns an error if a job with the same id exists
    async fn insert(&self, job: &SyncJob) -> Result<()>;

    /// Update an existing sync job
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job doesn't exist
    async fn update(&self, job: &SyncJob) -> Result<()>;

    async fn find_by_id(&self, id: &SyncJobId) -> Result<Option<SyncJob>>;

    /// Sync job history for a user and client (most recent first)
    ///
    /// # Arguments
    ///
    /// * `user_id` - The user whose runs to list
    /// * `client_id` - The client the runs synced
    /// * `limit` - Maximum number of jobs to return
    async fn get_history(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        limit: u32,
    ) -> Result<Vec<SyncJob>>;
}

// ============================================================================
// In-memory Implementation
// ============================================================================

/// Finished runs kept per (user, client) by default.
pub const DEFAULT_JOB_RETENTION: usize = 20;

/// In-memory implementation of SyncJobRepository
pub struct InMemorySyncJobRepository {
    jobs: RwLock<HashMap<SyncJobId, SyncJob>>,
    retention: usize,
}

impl Default for InMemorySyncJobRepository {
    fn default() -> Self {
        Self::with_retention(DEFAULT_JOB_RETENTION)
    }
}

impl InMemorySyncJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` finished runs per (user, client).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    fn prune(&self, jobs: &mut HashMap<SyncJobId, SyncJob>, user_id: &UserId, client_id: &ClientId) {
        let mut finished: Vec<(i64, SyncJobId)> = jobs
            .values()
            .filter(|job| {
                job.status.is_terminal() && job.user_id == *user_id && job.client_id == *client_id
            })
            .map(|job| (job.created_at, job.id))
            .collect();
        if finished.len() <= self.retention {
            return;
        }

        finished.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, id) in finished.into_iter().skip(self.retention) {
            jobs.remove(&id);
        }
    }
}

#[async_trait]
impl SyncJobRepository for InMemorySyncJobRepository {
    async fn insert(&self, job: &SyncJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(SyncError::InvalidJobId(format!(
                "Job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        self.prune(&mut jobs, &job.user_id, &job.client_id);
        Ok(())
    }

    async fn update(&self, job: &SyncJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(SyncError::JobNotFound {
                job_id: job.id.to_string(),
            }),
        }
    }

    async fn find_by_id(&self, id: &SyncJobId) -> Result<Option<SyncJob>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn get_history(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        limit: u32,
    ) -> Result<Vec<SyncJob>> {
        let jobs = self.jobs.read().await;
        let mut history: Vec<SyncJob> = jobs
            .values()
            .filter(|job| job.user_id == *user_id && job.client_id == *client_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit as usize);
        Ok(history)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SyncJobStats, SyncStatus};

    fn job(user: UserId, client: &str, created_at: i64) -> SyncJob {
        SyncJob::new(user, ClientId::new(client), created_at)
    }

    #[tokio::test]
    async fn test_insert_and_find_by_id() {
        let repo = InMemorySyncJobRepository::new();
        let job = job(UserId::new(), "jf", 1);

        repo.insert(&job).await.unwrap();
        assert_eq!(repo.find_by_id(&job.id).await.unwrap(), Some(job.clone()));
        assert!(repo.insert(&job).await.is_err());
    }

    #[tokio::test]
    async fn test_update_job() {
        let repo = InMemorySyncJobRepository::new();
        let job = job(UserId::new(), "jf", 1);
        repo.insert(&job).await.unwrap();

        let running = job.start(2).unwrap();
        repo.update(&running).await.unwrap();

        let stored = repo.find_by_id(&running.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Running);

        let unknown = SyncJob::new(UserId::new(), ClientId::new("x"), 0);
        assert!(matches!(
            repo.update(&unknown).await,
            Err(SyncError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_history_filters_and_orders() {
        let repo = InMemorySyncJobRepository::new();
        let user = UserId::new();

        for created_at in [10, 30, 20] {
            repo.insert(&job(user, "jf", created_at)).await.unwrap();
        }
        repo.insert(&job(user, "plex", 40)).await.unwrap();
        repo.insert(&job(UserId::new(), "jf", 50)).await.unwrap();

        let history = repo
            .get_history(&user, &ClientId::new("jf"), 2)
            .await
            .unwrap();
        let created: Vec<_> = history.iter().map(|j| j.created_at).collect();
        assert_eq!(created, vec![30, 20]);
    }

    fn finished(user: UserId, client: &str, created_at: i64) -> SyncJob {
        job(user, client, created_at)
            .start(created_at)
            .unwrap()
            .complete(SyncJobStats::default(), created_at + 1)
            .unwrap()
    }

    #[tokio::test]
    async fn test_retention_prunes_oldest_finished_runs() {
        let repo = InMemorySyncJobRepository::with_retention(2);
        let user = UserId::new();

        let active = job(user, "jf", 0).start(0).unwrap();
        repo.insert(&active).await.unwrap();
        for created_at in 1..=4 {
            repo.insert(&finished(user, "jf", created_at)).await.unwrap();
        }
        repo.insert(&finished(user, "plex", 5)).await.unwrap();
        repo.insert(&finished(UserId::new(), "jf", 6)).await.unwrap();

        let history = repo
            .get_history(&user, &ClientId::new("jf"), 10)
            .await
            .unwrap();
        let created: Vec<_> = history.iter().map(|j| j.created_at).collect();
        assert_eq!(created, vec![4, 3, 0]);
        assert!(repo.find_by_id(&active.id).await.unwrap().is_some());
        assert_eq!(repo.job_count().await, 5);
    }

    #[tokio::test]
    async fn test_long_lived_store_stays_bounded() {
        let repo = InMemorySyncJobRepository::new();
        let user = UserId::new();

        for created_at in 0..100 {
            repo.insert(&finished(user, "jf", created_at)).await.unwrap();
        }

        assert_eq!(repo.job_count().await, DEFAULT_JOB_RETENTION);
        let newest = repo.get_history(&user, &ClientId::new("jf"), 1).await.unwrap();
        assert_eq!(newest[0].created_at, 99);
    }
}
