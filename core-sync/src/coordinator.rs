//! # Sync Coordinator
//!
//! Runs synchronization jobs for one (user, client) pair at a time.
//!
//! ## Overview
//!
//! The `SyncCoordinator` is the central orchestrator. For each run it:
//! - Walks the client's supported capabilities in sync order
//! - Fetches each capability page by page with a per-request timeout
//! - Converts native items through the `ConverterRegistry`
//! - Resolves every item to a canonical record via `IdentityResolver`
//! - Merges user state for history and favorites
//! - Replaces list membership for collections and playlists
//! - Reports progress on the job and the `EventBus`
//!
//! ## Failure Handling
//!
//! - Item-level errors (conversion, missing parent, identity conflict,
//!   persistence) skip the item. Several consecutive persistence failures
//!   fail the run.
//! - Fetch errors abort only the current capability.
//! - A run with no reachable capability ends `Failed`; otherwise it ends
//!   `Succeeded` with a summary of what was skipped.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncCoordinator;
//! use std::sync::Arc;
//!
//! # async fn example(coordinator: Arc<SyncCoordinator>) -> Result<(), Box<dyn std::error::Error>> {
//! let job_id = coordinator.start_sync(user_id, client_id).await?;
//!
//! let progress = coordinator.progress(&job_id).await?;
//! println!("{}% - {}", progress.percent, progress.message);
//!
//! coordinator.cancel_sync(&job_id).await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    clients::ClientRegistry,
    converters::capability_kind,
    factory::ConverterRegistry,
    identity::{IdentityResolver, Resolution, ResolvedItem},
    job::{
        CapabilityFailure, JobProgress, SkipReason, SyncDiagnostic, SyncJob, SyncJobId,
        SyncJobStats, SyncStatus,
    },
    merge::merge_user_state,
    repository::{InMemorySyncJobRepository, SyncJobRepository},
    Result, SyncError,
};
use bridge_traits::{
    Capability, ClientError, ClientId, ClientResult, Clock, MediaClient, NativeItem, NativePage,
    QueryOptions,
};
use core_library::repositories::{
    CatalogRepository, ListItemRepository, SqliteCatalogRepository, SqliteListItemRepository,
    SqliteUserStateRepository, UserStateRepository,
};
use core_library::{CrossRefSource, ItemId, LibraryError, RemoteUserData, UserId};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Attempts at an optimistic user-state write before the item is skipped
const MAX_MERGE_ATTEMPTS: usize = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Sync coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Items requested per page
    pub page_size: u32,

    /// Timeout for a single remote request
    pub request_timeout: Duration,

    /// Report progress every this many items within a capability
    pub progress_item_interval: u64,

    /// Consecutive persistence failures that fail the run
    pub max_consecutive_persistence_failures: u32,

    /// Cross-reference sources used for matching, in checking order
    pub trusted_sources: Vec<CrossRefSource>,

    /// Create placeholders for unknown parents instead of skipping the child
    pub create_missing_parents: bool,

    /// Diagnostics kept on a job
    pub max_diagnostics: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            request_timeout: Duration::from_secs(30),
            progress_item_interval: 25,
            max_consecutive_persistence_failures: 5,
            trusted_sources: CrossRefSource::ALL.to_vec(),
            create_missing_parents: true,
            max_diagnostics: 100,
        }
    }
}

impl SyncConfig {
    /// Derive from validated runtime settings.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the settings are invalid.
    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let trusted_sources = settings
            .trusted_cross_ref_sources
            .iter()
            .map(|name| {
                CrossRefSource::parse(name).ok_or_else(|| {
                    SyncError::Config(format!("Unknown cross-reference source: {}", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            page_size: settings.page_size,
            request_timeout: settings.request_timeout(),
            progress_item_interval: settings.progress_item_interval,
            max_consecutive_persistence_failures: settings.max_consecutive_persistence_failures,
            trusted_sources,
            create_missing_parents: settings.create_missing_parents,
            max_diagnostics: settings.max_diagnostics,
        })
    }
}

/// Repositories a coordinator writes through
#[derive(Clone)]
pub struct SyncRepositories {
    pub catalog: Arc<dyn CatalogRepository>,
    pub user_states: Arc<dyn UserStateRepository>,
    pub lists: Arc<dyn ListItemRepository>,
    pub jobs: Arc<dyn SyncJobRepository>,
}

impl SyncRepositories {
    /// SQLite repositories on `pool` with an in-memory job store
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            catalog: Arc::new(SqliteCatalogRepository::new(pool.clone())),
            user_states: Arc::new(SqliteUserStateRepository::new(pool.clone())),
            lists: Arc::new(SqliteListItemRepository::new(pool)),
            jobs: Arc::new(InMemorySyncJobRepository::new()),
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Active sync job tracking
#[derive(Clone)]
struct ActiveSync {
    job_id: SyncJobId,
    cancellation_token: CancellationToken,
}

/// Splits 0-100 across capabilities by estimated item count
struct ProgressPlan {
    weights: HashMap<Capability, u64>,
    total: u64,
    completed: u64,
}

impl ProgressPlan {
    fn new(estimates: &[(Capability, Option<u64>)]) -> Self {
        let known: Vec<u64> = estimates.iter().filter_map(|(_, e)| *e).collect();
        let fallback = if known.is_empty() {
            1
        } else {
            (known.iter().sum::<u64>() / known.len() as u64).max(1)
        };

        let weights: HashMap<Capability, u64> = estimates
            .iter()
            .map(|(capability, estimate)| (*capability, estimate.unwrap_or(fallback).max(1)))
            .collect();
        let total = weights.values().sum::<u64>().max(1);

        Self {
            weights,
            total,
            completed: 0,
        }
    }

    fn weight(&self, capability: Capability) -> u64 {
        self.weights.get(&capability).copied().unwrap_or(1)
    }

    /// Percent while `processed` items of `capability` are done. Stays below
    /// 100 until the run completes.
    fn percent(&self, capability: Capability, processed: u64) -> u8 {
        let current = processed.min(self.weight(capability));
        let percent = (self.completed + current) * 100 / self.total;
        percent.min(99) as u8
    }

    fn finish(&mut self, capability: Capability) {
        self.completed = (self.completed + self.weight(capability)).min(self.total);
    }
}

struct RunState {
    job: SyncJob,
    stats: SyncJobStats,
    plan: ProgressPlan,
    consecutive_persistence_failures: u32,
    capabilities_reached: u64,
}

enum CapabilityOutcome {
    Synced,
    Unsupported,
    Failed(String),
}

// ============================================================================
// Coordinator
// ============================================================================

/// Sync coordinator for orchestrating synchronization
pub struct SyncCoordinator {
    /// Configuration
    config: SyncConfig,

    /// Registered media server adapters
    clients: Arc<ClientRegistry>,

    /// Native item converters
    converters: Arc<ConverterRegistry>,

    /// Find-or-create for canonical items
    resolver: Arc<IdentityResolver>,

    user_states: Arc<dyn UserStateRepository>,
    lists: Arc<dyn ListItemRepository>,
    job_repository: Arc<dyn SyncJobRepository>,

    /// Event bus for emitting sync events
    event_bus: Arc<EventBus>,

    clock: Arc<dyn Clock>,

    /// Active sync jobs by (user, client)
    active_syncs: Arc<Mutex<HashMap<(UserId, ClientId), ActiveSync>>>,
}

impl SyncCoordinator {
    /// Create a coordinator on SQLite repositories
    ///
    /// # Arguments
    ///
    /// * `config` - Sync configuration
    /// * `pool` - Catalog database pool
    /// * `clients` - Registered adapters
    /// * `converters` - Converter registry, validated at startup
    /// * `event_bus` - Event bus for progress and library events
    /// * `clock` - Time source
    pub fn new(
        config: SyncConfig,
        pool: SqlitePool,
        clients: Arc<ClientRegistry>,
        converters: Arc<ConverterRegistry>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_repositories(
            config,
            SyncRepositories::sqlite(pool),
            clients,
            converters,
            event_bus,
            clock,
        )
    }

    /// Create a coordinator on caller-supplied repositories
    pub fn with_repositories(
        config: SyncConfig,
        repositories: SyncRepositories,
        clients: Arc<ClientRegistry>,
        converters: Arc<ConverterRegistry>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = Arc::new(IdentityResolver::new(
            repositories.catalog,
            config.trusted_sources.clone(),
            config.create_missing_parents,
        ));

        Self {
            config,
            clients,
            converters,
            resolver,
            user_states: repositories.user_states,
            lists: repositories.lists,
            job_repository: repositories.jobs,
            event_bus,
            clock,
            active_syncs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start a synchronization in the background
    ///
    /// Creates a `Pending` job and returns its ID immediately.
    ///
    /// # Errors
    ///
    /// - `ClientNotRegistered` if no adapter has this client id
    /// - `SyncInProgress` if a run for this (user, client) is still active
    #[instrument(skip(self), fields(user_id = %user_id, client_id = %client_id))]
    pub async fn start_sync(&self, user_id: UserId, client_id: ClientId) -> Result<SyncJobId> {
        let client = self.client(&client_id).await?;
        let (job, cancellation_token) = self.prepare(user_id, client_id.clone()).await?;
        let job_id = job.id;

        let coordinator = self.clone_for_task();
        tokio::spawn(async move {
            let finished = coordinator
                .execute(job, client, cancellation_token)
                .await;
            debug!(job_id = %finished.id, status = %finished.status, "Background sync finished");
        });

        info!("Started sync job {}", job_id);
        Ok(job_id)
    }

    /// Run a synchronization inline and return the finished job
    ///
    /// # Errors
    ///
    /// Same as [`start_sync`](Self::start_sync). The run itself never returns
    /// an error; failures end up on the job.
    #[instrument(skip(self), fields(user_id = %user_id, client_id = %client_id))]
    pub async fn run_sync(&self, user_id: UserId, client_id: ClientId) -> Result<SyncJob> {
        let client = self.client(&client_id).await?;
        let (job, cancellation_token) = self.prepare(user_id, client_id).await?;
        Ok(self.execute(job, client, cancellation_token).await)
    }

    /// Current progress of a job
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown job.
    pub async fn progress(&self, job_id: &SyncJobId) -> Result<JobProgress> {
        Ok(JobProgress::from(&self.get_status(job_id).await?))
    }

    /// Full job record
    pub async fn get_status(&self, job_id: &SyncJobId) -> Result<SyncJob> {
        self.job_repository
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Request cancellation of an active job
    ///
    /// The run stops before its next fetch and ends `Failed` with a
    /// "cancelled" summary. Rows already written stay.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if no active run has this ID.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel_sync(&self, job_id: &SyncJobId) -> Result<()> {
        let active_syncs = self.active_syncs.lock().await;
        let active = active_syncs
            .values()
            .find(|active| active.job_id == *job_id)
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        active.cancellation_token.cancel();
        info!("Cancellation requested for sync job {}", job_id);
        Ok(())
    }

    /// Check if a sync is currently active for a (user, client) pair
    pub async fn is_sync_active(&self, user_id: &UserId, client_id: &ClientId) -> bool {
        let active_syncs = self.active_syncs.lock().await;
        active_syncs.contains_key(&(*user_id, client_id.clone()))
    }

    /// Past runs for a (user, client) pair, newest first
    pub async fn list_history(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        limit: usize,
    ) -> Result<Vec<SyncJob>> {
        self.job_repository
            .get_history(user_id, client_id, limit.try_into().unwrap_or(u32::MAX))
            .await
    }

    async fn client(&self, client_id: &ClientId) -> Result<Arc<dyn MediaClient>> {
        self.clients
            .get(client_id)
            .await
            .ok_or_else(|| SyncError::ClientNotRegistered(client_id.to_string()))
    }

    /// Clone for background task (avoids Arc<Arc<...>>)
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            clients: Arc::clone(&self.clients),
            converters: Arc::clone(&self.converters),
            resolver: Arc::clone(&self.resolver),
            user_states: Arc::clone(&self.user_states),
            lists: Arc::clone(&self.lists),
            job_repository: Arc::clone(&self.job_repository),
            event_bus: Arc::clone(&self.event_bus),
            clock: Arc::clone(&self.clock),
            active_syncs: Arc::clone(&self.active_syncs),
        }
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }

    /// Register the run as active and persist its pending job
    async fn prepare(
        &self,
        user_id: UserId,
        client_id: ClientId,
    ) -> Result<(SyncJob, CancellationToken)> {
        let mut active_syncs = self.active_syncs.lock().await;
        let key = (user_id, client_id.clone());
        if active_syncs.contains_key(&key) {
            return Err(SyncError::SyncInProgress {
                user_id: user_id.to_string(),
                client_id: client_id.to_string(),
            });
        }

        let job = SyncJob::new(user_id, client_id.clone(), self.clock.unix_timestamp());
        self.job_repository.insert(&job).await?;

        let cancellation_token = CancellationToken::new();
        active_syncs.insert(
            key,
            ActiveSync {
                job_id: job.id,
                cancellation_token: cancellation_token.clone(),
            },
        );

        self.emit(CoreEvent::Sync(SyncEvent::Started {
            job_id: job.id.to_string(),
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
        }));

        Ok((job, cancellation_token))
    }

    /// Drive a prepared job to a terminal state
    #[instrument(skip_all, fields(job_id = %job.id, client_id = %job.client_id))]
    async fn execute(
        &self,
        job: SyncJob,
        client: Arc<dyn MediaClient>,
        cancellation_token: CancellationToken,
    ) -> SyncJob {
        let key = (job.user_id, job.client_id.clone());
        let pending = job.clone();

        let finished = match job.start(self.clock.unix_timestamp()) {
            Ok(job) => {
                let mut run = self.begin_run(job, client.as_ref()).await;
                let result = self
                    .sync_capabilities(&mut run, client.as_ref(), &cancellation_token)
                    .await;
                self.finish(run, result).await
            }
            Err(e) => {
                error!("Sync job could not start: {}", e);
                let now = self.clock.unix_timestamp();
                match pending.clone().fail(e.to_string(), SyncJobStats::new(), now) {
                    Ok(failed) => {
                        self.job_repository.update(&failed).await.ok();
                        failed
                    }
                    Err(_) => pending,
                }
            }
        };

        self.active_syncs.lock().await.remove(&key);
        finished
    }

    async fn begin_run(&self, job: SyncJob, client: &dyn MediaClient) -> RunState {
        let capabilities = client.supported_capabilities();
        let mut estimates = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            let estimate = match tokio::time::timeout(
                self.config.request_timeout,
                client.estimate_count(capability),
            )
            .await
            {
                Ok(Ok(estimate)) => estimate,
                _ => None,
            };
            estimates.push((capability, estimate));
        }

        if let Err(e) = self.job_repository.update(&job).await {
            warn!("Failed to persist running job: {}", e);
        }

        RunState {
            job,
            stats: SyncJobStats::new(),
            plan: ProgressPlan::new(&estimates),
            consecutive_persistence_failures: 0,
            capabilities_reached: 0,
        }
    }

    async fn finish(&self, run: RunState, result: Result<()>) -> SyncJob {
        let now = self.clock.unix_timestamp();
        let RunState {
            job,
            stats,
            capabilities_reached,
            ..
        } = run;
        let items_processed = job.progress.items_processed;
        let fallback = job.clone();

        let outcome = match result {
            Ok(()) if capabilities_reached == 0 => Err("no capability could be reached".to_string()),
            Ok(()) => Ok(()),
            Err(SyncError::Cancelled) => Err("cancelled".to_string()),
            Err(e) => Err(e.to_string()),
        };

        let finished = match outcome {
            Ok(()) => job.complete(stats, now),
            Err(message) => job.fail(message, stats, now),
        };
        let finished = match finished {
            Ok(job) => job,
            Err(e) => {
                error!("Invalid job transition at end of run: {}", e);
                return fallback;
            }
        };

        if let Err(e) = self.job_repository.update(&finished).await {
            error!("Failed to persist finished job: {}", e);
        }

        let summary = finished.summary.clone().unwrap_or_default();
        match finished.status {
            SyncStatus::Succeeded => {
                info!("Sync job {} completed: {}", finished.id, summary);
                self.emit(CoreEvent::Sync(SyncEvent::Completed {
                    job_id: finished.id.to_string(),
                    items_synced: finished.stats.items_synced,
                    skipped: finished.stats.skipped(),
                    summary,
                    duration_secs: finished.duration_secs().unwrap_or(0),
                }));
            }
            _ => {
                warn!("Sync job {} failed: {}", finished.id, summary);
                self.emit(CoreEvent::Sync(SyncEvent::Failed {
                    job_id: finished.id.to_string(),
                    message: summary,
                    items_processed,
                }));
            }
        }

        finished
    }

    async fn report_progress(
        &self,
        run: &mut RunState,
        capability: Capability,
        processed: u64,
        message: &str,
    ) -> Result<()> {
        let percent = run.plan.percent(capability, processed);
        run.job.stats = run.stats;
        run.job.update_progress(percent, message)?;
        self.job_repository.update(&run.job).await?;

        self.emit(CoreEvent::Sync(SyncEvent::Progress {
            job_id: run.job.id.to_string(),
            percent: run.job.progress.percent,
            items_processed: run.job.progress.items_processed,
            message: message.to_string(),
        }));
        Ok(())
    }

    async fn sync_capabilities(
        &self,
        run: &mut RunState,
        client: &dyn MediaClient,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        for capability in client.supported_capabilities() {
            if cancellation_token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let outcome = self
                .sync_capability(run, client, capability, cancellation_token)
                .await?;

            let message = match outcome {
                CapabilityOutcome::Synced => {
                    run.stats.capabilities_synced += 1;
                    run.capabilities_reached += 1;
                    format!("Synced {}", capability)
                }
                CapabilityOutcome::Unsupported => {
                    run.stats.capabilities_unsupported += 1;
                    debug!("Client reported {} as unsupported", capability);
                    format!("Skipped {} (not supported)", capability)
                }
                CapabilityOutcome::Failed(message) => {
                    run.stats.capabilities_failed += 1;
                    warn!(capability = %capability, "Capability failed: {}", message);
                    run.job.failed_capabilities.push(CapabilityFailure {
                        capability,
                        message: message.clone(),
                    });
                    format!("Failed {}: {}", capability, message)
                }
            };

            run.plan.finish(capability);
            self.report_progress(run, capability, 0, &message).await?;
        }

        Ok(())
    }

    /// Await a remote call under the request timeout, or until cancelled
    async fn guarded<F>(
        &self,
        capability: Capability,
        cancellation_token: &CancellationToken,
        request: F,
    ) -> Result<NativePage>
    where
        F: Future<Output = ClientResult<NativePage>>,
    {
        tokio::select! {
            _ = cancellation_token.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout(self.config.request_timeout, request) => match result {
                Ok(Ok(page)) => Ok(page),
                Ok(Err(source)) => Err(SyncError::Fetch { capability, source }),
                Err(_) => Err(SyncError::Fetch {
                    capability,
                    source: ClientError::Timeout(self.config.request_timeout.as_secs()),
                }),
            },
        }
    }

    fn first_page(&self, run: &RunState) -> QueryOptions {
        QueryOptions::first_page(self.config.page_size).with_user(run.job.user_id.to_string())
    }

    #[instrument(skip(self, run, client, cancellation_token), fields(capability = %capability))]
    async fn sync_capability(
        &self,
        run: &mut RunState,
        client: &dyn MediaClient,
        capability: Capability,
        cancellation_token: &CancellationToken,
    ) -> Result<CapabilityOutcome> {
        let mut options = self.first_page(run);
        let mut processed = 0u64;
        let mut reported_at = 0u64;

        loop {
            let page = match self
                .guarded(capability, cancellation_token, client.fetch(capability, &options))
                .await
            {
                Ok(page) => page,
                Err(SyncError::Fetch {
                    source: ClientError::NotSupported(_),
                    ..
                }) if processed == 0 => return Ok(CapabilityOutcome::Unsupported),
                Err(SyncError::Fetch { source, .. }) => {
                    return Ok(CapabilityOutcome::Failed(source.to_string()))
                }
                Err(e) => return Err(e),
            };

            debug!(
                offset = options.offset,
                items = page.items.len(),
                "Fetched page"
            );

            for native in &page.items {
                match self
                    .process_item(run, client, capability, native, cancellation_token)
                    .await
                {
                    Ok(()) => {}
                    Err(e @ SyncError::NoFactoryRegistered { .. }) => {
                        error!("{}", e);
                        return Ok(CapabilityOutcome::Failed(e.to_string()));
                    }
                    Err(e) => return Err(e),
                }

                processed += 1;
                if processed - reported_at >= self.config.progress_item_interval {
                    reported_at = processed;
                    let message = format!("Syncing {} ({} items)", capability, processed);
                    self.report_progress(run, capability, processed, &message)
                        .await?;
                }
            }

            if page.is_last(&options) {
                break;
            }
            options = options.next_page();
        }

        Ok(CapabilityOutcome::Synced)
    }

    /// Handle one fetched item. Item-level failures are recorded and
    /// swallowed; anything returned is fatal for the capability or run.
    async fn process_item(
        &self,
        run: &mut RunState,
        client: &dyn MediaClient,
        capability: Capability,
        native: &NativeItem,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        run.stats.items_seen += 1;
        run.job.progress.items_processed += 1;

        let result = self
            .sync_item(run, client, capability, native, cancellation_token)
            .await;

        let error = match result {
            Ok(()) => {
                run.stats.items_synced += 1;
                run.consecutive_persistence_failures = 0;
                return Ok(());
            }
            Err(error) => error,
        };

        let Some(reason) = SkipReason::for_error(&error) else {
            return Err(error);
        };

        let external_id = native.id_hint();
        warn!(
            client_id = %client.client_id(),
            external_id = external_id.as_deref().unwrap_or("<none>"),
            native_kind = %native.native_kind,
            capability = %capability,
            "Skipping item: {}",
            error
        );

        run.stats.record_skip(reason);
        run.job.record_diagnostic(
            SyncDiagnostic {
                capability,
                native_kind: native.native_kind.clone(),
                external_id,
                reason,
                message: error.to_string(),
            },
            self.config.max_diagnostics,
        );

        if reason == SkipReason::Persistence {
            run.consecutive_persistence_failures += 1;
            if run.consecutive_persistence_failures >= self.config.max_consecutive_persistence_failures
            {
                error!(
                    failures = run.consecutive_persistence_failures,
                    "Too many consecutive persistence failures"
                );
                return Err(error);
            }
        }

        Ok(())
    }

    async fn sync_item(
        &self,
        run: &mut RunState,
        client: &dyn MediaClient,
        capability: Capability,
        native: &NativeItem,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        let converted = match capability_kind(capability) {
            Some(kind) => self.converters.convert_as(client.kind(), native, kind)?,
            None => self.converters.convert(client.kind(), native)?,
        };

        let now = self.clock.unix_timestamp();
        let resolved = self
            .resolver
            .resolve(client.client_id(), &converted, now)
            .await?;
        self.record_resolution(run, client.client_id(), &converted.external_id, &resolved);

        if capability.carries_user_state() {
            let mut remote = converted.user_data.clone().unwrap_or_default();
            match capability {
                Capability::Favorites => {
                    remote.is_favorite.get_or_insert(true);
                }
                Capability::PlayHistory => {
                    remote.played.get_or_insert(true);
                }
                _ => {}
            }
            self.save_user_state(run.job.user_id, resolved.item.id, &remote)
                .await?;
            run.stats.user_states_updated += 1;
        }

        if capability.is_list() {
            self.sync_list_members(
                run,
                client,
                capability,
                &converted.external_id,
                resolved.item.id,
                cancellation_token,
            )
            .await?;
        }

        Ok(())
    }

    fn record_resolution(
        &self,
        run: &mut RunState,
        client_id: &ClientId,
        external_id: &str,
        resolved: &ResolvedItem,
    ) {
        run.stats.placeholders_created += resolved.placeholders.len() as u64;
        for placeholder in &resolved.placeholders {
            self.emit(CoreEvent::Library(LibraryEvent::ItemCreated {
                item_id: placeholder.id.to_string(),
                kind: placeholder.kind.to_string(),
                title: placeholder.title.clone(),
                placeholder: true,
            }));
        }

        match resolved.resolution {
            Resolution::Created => {
                run.stats.items_created += 1;
                self.emit(CoreEvent::Library(LibraryEvent::ItemCreated {
                    item_id: resolved.item.id.to_string(),
                    kind: resolved.item.kind.to_string(),
                    title: resolved.item.title.clone(),
                    placeholder: false,
                }));
            }
            Resolution::Matched => {
                run.stats.items_matched += 1;
                self.emit(CoreEvent::Library(LibraryEvent::ItemLinked {
                    item_id: resolved.item.id.to_string(),
                    client_id: client_id.to_string(),
                    external_item_id: external_id.to_string(),
                }));
            }
            Resolution::Linked => {}
        }
    }

    /// Merge and write with optimistic concurrency, re-reading on a lost race
    async fn save_user_state(
        &self,
        user_id: UserId,
        item_id: ItemId,
        remote: &RemoteUserData,
    ) -> Result<()> {
        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let existing = self.user_states.find(&user_id, &item_id).await?;
            let merged = merge_user_state(
                existing,
                user_id,
                item_id,
                remote,
                self.clock.unix_timestamp(),
            );
            if self.user_states.save_merged(&merged).await? {
                return Ok(());
            }
            debug!(attempt, item_id = %item_id, "Concurrent user state write, retrying");
        }

        Err(SyncError::Persistence(LibraryError::Conflict(format!(
            "user state for item {} changed concurrently {} times",
            item_id, MAX_MERGE_ATTEMPTS
        ))))
    }

    /// Fetch a list's members and replace its membership snapshot
    ///
    /// Members that cannot be converted or resolved are left out. A fetch
    /// failure leaves the stored membership unchanged.
    async fn sync_list_members(
        &self,
        run: &mut RunState,
        client: &dyn MediaClient,
        capability: Capability,
        list_external_id: &str,
        list_id: ItemId,
        cancellation_token: &CancellationToken,
    ) -> Result<()> {
        let mut members = Vec::new();
        let mut options = self.first_page(run);

        loop {
            let page = match self
                .guarded(
                    capability,
                    cancellation_token,
                    client.get_list_members(capability, list_external_id, &options),
                )
                .await
            {
                Ok(page) => page,
                Err(SyncError::Fetch {
                    source: ClientError::NotSupported(_),
                    ..
                }) => {
                    debug!(list = list_external_id, "List members not supported");
                    return Ok(());
                }
                Err(SyncError::Fetch { source, .. }) => {
                    warn!(
                        client_id = %client.client_id(),
                        list = list_external_id,
                        "Failed to fetch list members: {}",
                        source
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            for native in &page.items {
                match self.resolve_member(client, native).await {
                    Ok(item_id) => members.push(item_id),
                    Err(e @ SyncError::NoFactoryRegistered { .. }) => return Err(e),
                    Err(e) if e.is_item_level() => {
                        warn!(
                            client_id = %client.client_id(),
                            list = list_external_id,
                            external_id = native.id_hint().as_deref().unwrap_or("<none>"),
                            native_kind = %native.native_kind,
                            "Leaving member out of list: {}",
                            e
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            if page.is_last(&options) {
                break;
            }
            options = options.next_page();
        }

        let diff = self
            .lists
            .replace_members(&list_id, &members, self.clock.unix_timestamp())
            .await?;

        if !diff.is_noop() {
            run.stats.lists_updated += 1;
            self.emit(CoreEvent::Library(LibraryEvent::ListUpdated {
                list_id: list_id.to_string(),
                added: diff.added as u64,
                moved: diff.moved as u64,
                removed: diff.removed as u64,
            }));
        }
        Ok(())
    }

    async fn resolve_member(&self, client: &dyn MediaClient, native: &NativeItem) -> Result<ItemId> {
        let converted = self.converters.convert(client.kind(), native)?;
        let resolved = self
            .resolver
            .resolve(client.client_id(), &converted, self.clock.unix_timestamp())
            .await?;
        Ok(resolved.item.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::config::SyncSettings;

    #[test]
    fn test_config_from_settings() {
        let settings = SyncSettings {
            page_size: 50,
            trusted_cross_ref_sources: vec!["tmdb".to_string(), "imdb".to_string()],
            create_missing_parents: false,
            ..SyncSettings::default()
        };

        let config = SyncConfig::from_settings(&settings).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(
            config.trusted_sources,
            vec![CrossRefSource::Tmdb, CrossRefSource::Imdb]
        );
        assert!(!config.create_missing_parents);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_rejects_invalid_settings() {
        let settings = SyncSettings {
            page_size: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(
            SyncConfig::from_settings(&settings),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_progress_plan_weights_by_estimate() {
        let mut plan = ProgressPlan::new(&[
            (Capability::Movies, Some(300)),
            (Capability::Series, Some(100)),
        ]);

        assert_eq!(plan.percent(Capability::Movies, 150), 37);
        plan.finish(Capability::Movies);
        assert_eq!(plan.percent(Capability::Series, 0), 75);
        assert_eq!(plan.percent(Capability::Series, 50), 87);
        plan.finish(Capability::Series);
        assert_eq!(plan.percent(Capability::Series, 0), 99);
    }

    #[test]
    fn test_progress_plan_unknown_estimates_share_evenly() {
        let mut plan = ProgressPlan::new(&[
            (Capability::Artists, None),
            (Capability::Albums, None),
            (Capability::Tracks, None),
            (Capability::Playlists, None),
        ]);

        plan.finish(Capability::Artists);
        assert_eq!(plan.percent(Capability::Albums, 0), 25);
        // Processed beyond the estimate does not run ahead
        assert_eq!(plan.percent(Capability::Albums, 500), 50);
    }
}
