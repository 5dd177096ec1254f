//! # Core Service
//!
//! Host-facing façade over the sync engine.
//!
//! ## Overview
//!
//! `CoreService` wires the runtime pieces together: it opens the catalog
//! database, builds the converter and client registries, validates that every
//! capability a registered client supports has the converters it needs, and
//! exposes the operations a transport layer calls:
//!
//! - `start_sync` / `run_sync` / `progress` / `cancel_sync` for sync runs
//! - `set_favorite` / `set_rating` for direct user actions
//! - `subscribe_events` for progress and library notifications
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::CoreService;
//!
//! let config = CoreConfig::builder().database_path("media.db").build()?;
//! let core = CoreService::bootstrap(config, vec![jellyfin_adapter]).await?;
//!
//! let job_id = core.start_sync(user_id, ClientId::new("living-room")).await?;
//! let progress = core.progress(&job_id).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::{ClientId, Clock, MediaClient};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{
    CatalogRepository, ListItemRepository, SqliteCatalogRepository, SqliteListItemRepository,
    SqliteUserStateRepository, UserStateRepository,
};
use core_library::{ItemId, LibraryError, UserId, UserItemState};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_runtime::logging::init_logging;
use core_sync::converters::required_converters;
use core_sync::{
    ClientRegistry, ConverterRegistry, InMemorySyncJobRepository, JobProgress, SyncConfig,
    SyncCoordinator, SyncJob, SyncJobId, SyncRepositories,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info, instrument};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    config: CoreConfig,
    pool: SqlitePool,
    clients: Arc<ClientRegistry>,
    converters: Arc<ConverterRegistry>,
    coordinator: Arc<SyncCoordinator>,
    catalog: Arc<dyn CatalogRepository>,
    user_states: Arc<dyn UserStateRepository>,
    lists: Arc<dyn ListItemRepository>,
    event_bus: Arc<EventBus>,
}

impl CoreService {
    /// Validate `config`, initialize logging, open the catalog and register
    /// `clients` with the bundled converters.
    ///
    /// # Errors
    ///
    /// - `Config` if the configuration is invalid
    /// - `Library` if the database cannot be opened or migrated
    /// - `Sync(NoFactoryRegistered)` if a client supports a capability with
    ///   no converter
    pub async fn bootstrap(config: CoreConfig, clients: Vec<Arc<dyn MediaClient>>) -> Result<Self> {
        config.validate()?;

        if let Err(e) = init_logging(config.logging.clone()) {
            debug!("Logging not initialized by core: {}", e);
        }

        let database = match &config.database_path {
            Some(path) => DatabaseConfig::new(path.clone()).max_connections(config.max_db_connections),
            None => DatabaseConfig::in_memory().max_connections(1),
        };
        let pool = create_pool(database).await?;

        let registry = Arc::new(ClientRegistry::new());
        for client in clients {
            registry.register(client).await;
        }

        Self::new(config, pool, registry, ConverterRegistry::with_builtin()).await
    }

    /// Build a service on an open pool and explicit registries.
    ///
    /// # Errors
    ///
    /// Returns `Sync(NoFactoryRegistered)` for the first registered client
    /// whose supported capabilities lack a converter.
    pub async fn new(
        config: CoreConfig,
        pool: SqlitePool,
        clients: Arc<ClientRegistry>,
        converters: ConverterRegistry,
    ) -> Result<Self> {
        for client in clients.list().await {
            validate_client(&converters, client.as_ref())?;
        }

        let sync_config = SyncConfig::from_settings(&config.sync)?;
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let converters = Arc::new(converters);

        let catalog: Arc<dyn CatalogRepository> =
            Arc::new(SqliteCatalogRepository::new(pool.clone()));
        let user_states: Arc<dyn UserStateRepository> =
            Arc::new(SqliteUserStateRepository::new(pool.clone()));
        let lists: Arc<dyn ListItemRepository> =
            Arc::new(SqliteListItemRepository::new(pool.clone()));

        let repositories = SyncRepositories {
            catalog: Arc::clone(&catalog),
            user_states: Arc::clone(&user_states),
            lists: Arc::clone(&lists),
            jobs: Arc::new(InMemorySyncJobRepository::new()),
        };
        let coordinator = Arc::new(SyncCoordinator::with_repositories(
            sync_config,
            repositories,
            Arc::clone(&clients),
            Arc::clone(&converters),
            Arc::clone(&event_bus),
            Arc::clone(&config.clock),
        ));

        info!(
            clients = clients.len().await,
            converters = converters.len(),
            "Core service ready"
        );

        Ok(Self {
            config,
            pool,
            clients,
            converters,
            coordinator,
            catalog,
            user_states,
            lists,
            event_bus,
        })
    }

    /// Register another adapter after startup.
    ///
    /// # Errors
    ///
    /// Returns `Sync(NoFactoryRegistered)` without registering if a supported
    /// capability lacks a converter.
    pub async fn register_client(&self, client: Arc<dyn MediaClient>) -> Result<()> {
        validate_client(&self.converters, client.as_ref())?;
        self.clients.register(client).await;
        Ok(())
    }

    /// Start a background sync run and return its job id.
    pub async fn start_sync(&self, user_id: UserId, client_id: ClientId) -> Result<SyncJobId> {
        Ok(self.coordinator.start_sync(user_id, client_id).await?)
    }

    /// Run a sync to completion and return the finished job.
    pub async fn run_sync(&self, user_id: UserId, client_id: ClientId) -> Result<SyncJob> {
        Ok(self.coordinator.run_sync(user_id, client_id).await?)
    }

    pub async fn progress(&self, job_id: &SyncJobId) -> Result<JobProgress> {
        Ok(self.coordinator.progress(job_id).await?)
    }

    pub async fn job(&self, job_id: &SyncJobId) -> Result<SyncJob> {
        Ok(self.coordinator.get_status(job_id).await?)
    }

    pub async fn cancel_sync(&self, job_id: &SyncJobId) -> Result<()> {
        Ok(self.coordinator.cancel_sync(job_id).await?)
    }

    pub async fn sync_history(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        limit: usize,
    ) -> Result<Vec<SyncJob>> {
        Ok(self.coordinator.list_history(user_id, client_id, limit).await?)
    }

    /// Toggle a favorite from the local user.
    ///
    /// The action is stamped so that older remote reports do not undo it.
    ///
    /// # Errors
    ///
    /// Returns `Library(NotFound)` for an unknown item.
    #[instrument(skip(self), fields(user_id = %user_id, item_id = %item_id))]
    pub async fn set_favorite(
        &self,
        user_id: UserId,
        item_id: ItemId,
        is_favorite: bool,
    ) -> Result<UserItemState> {
        self.require_item(&item_id).await?;
        let state = self
            .user_states
            .set_favorite(&user_id, &item_id, is_favorite, self.now())
            .await?;
        Ok(state)
    }

    /// Set or clear a rating from the local user.
    #[instrument(skip(self), fields(user_id = %user_id, item_id = %item_id))]
    pub async fn set_rating(
        &self,
        user_id: UserId,
        item_id: ItemId,
        rating: Option<f64>,
    ) -> Result<UserItemState> {
        self.require_item(&item_id).await?;
        let state = self
            .user_states
            .set_rating(&user_id, &item_id, rating, self.now())
            .await?;
        Ok(state)
    }

    pub async fn user_state(&self, user_id: &UserId, item_id: &ItemId) -> Result<Option<UserItemState>> {
        Ok(self.user_states.find(user_id, item_id).await?)
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn clients(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.clients)
    }

    pub fn catalog(&self) -> Arc<dyn CatalogRepository> {
        Arc::clone(&self.catalog)
    }

    pub fn lists(&self) -> Arc<dyn ListItemRepository> {
        Arc::clone(&self.lists)
    }

    fn now(&self) -> i64 {
        self.config.clock.unix_timestamp()
    }

    async fn require_item(&self, item_id: &ItemId) -> Result<()> {
        match self.catalog.find_by_id(item_id).await? {
            Some(_) => Ok(()),
            None => Err(LibraryError::NotFound {
                entity_type: "CanonicalItem".to_string(),
                id: item_id.to_string(),
            }
            .into()),
        }
    }
}

/// Check that every capability `client` supports has its converters.
fn validate_client(converters: &ConverterRegistry, client: &dyn MediaClient) -> Result<()> {
    let kind = client.kind();
    for capability in client.supported_capabilities() {
        converters.validate(kind, &required_converters(kind, capability))?;
    }
    debug!(client_id = %client.client_id(), "Converters validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        ClientKind, ClientResult, FixedClock, NativeItem, NativePage, QueryOptions,
    };
    use core_sync::{SyncError, SyncStatus};
    use serde_json::json;

    struct MovieServer {
        id: ClientId,
    }

    #[async_trait]
    impl MediaClient for MovieServer {
        fn client_id(&self) -> &ClientId {
            &self.id
        }

        fn kind(&self) -> ClientKind {
            ClientKind::Jellyfin
        }

        fn supports_movies(&self) -> bool {
            true
        }

        async fn get_movies(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
            let movie = NativeItem::new(
                "Movie",
                json!({ "Id": "m1", "Name": "Alpha", "ProviderIds": { "Imdb": "tt001" } }),
            );
            Ok(NativePage::new(vec![movie], Some(1)))
        }
    }

    fn server(id: &str) -> Arc<dyn MediaClient> {
        Arc::new(MovieServer {
            id: ClientId::new(id),
        })
    }

    fn test_config() -> CoreConfig {
        CoreConfig::builder()
            .in_memory()
            .clock(Arc::new(FixedClock::at(1_700_000_000)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_and_sync() {
        let core = CoreService::bootstrap(test_config(), vec![server("jf")])
            .await
            .unwrap();
        let user = UserId::new();

        let job = core.run_sync(user, ClientId::new("jf")).await.unwrap();
        assert_eq!(job.status, SyncStatus::Succeeded);
        assert_eq!(core.catalog().count().await.unwrap(), 1);

        let progress = core.progress(&job.id).await.unwrap();
        assert_eq!(progress.percent, 100);
        assert_eq!(core.sync_history(&user, &ClientId::new("jf"), 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_favorite_marks_local_action() {
        let core = CoreService::bootstrap(test_config(), vec![server("jf")])
            .await
            .unwrap();
        let user = UserId::new();
        core.run_sync(user, ClientId::new("jf")).await.unwrap();

        let item = core
            .catalog()
            .find_by_client_external_id(&ClientId::new("jf"), "m1")
            .await
            .unwrap()
            .unwrap();

        let state = core.set_favorite(user, item.id, true).await.unwrap();
        assert!(state.is_favorite);
        assert_eq!(state.favorite_action_at, Some(1_700_000_000));

        let state = core.set_rating(user, item.id, Some(8.0)).await.unwrap();
        assert_eq!(state.user_rating, Some(8.0));
        assert_eq!(state.rating_action_at, Some(1_700_000_000));
        assert!(core.user_state(&user, &item.id).await.unwrap().unwrap().is_favorite);
    }

    #[tokio::test]
    async fn test_favorite_unknown_item_not_found() {
        let core = CoreService::bootstrap(test_config(), vec![]).await.unwrap();
        let result = core.set_favorite(UserId::new(), ItemId::new(), true).await;
        assert!(matches!(
            result,
            Err(CoreError::Library(LibraryError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_missing_converter_rejected_at_startup() {
        let pool = core_library::db::create_test_pool().await.unwrap();
        let clients = Arc::new(ClientRegistry::new());
        clients.register(server("jf")).await;

        let result = CoreService::new(test_config(), pool, clients, ConverterRegistry::new()).await;
        assert!(matches!(
            result,
            Err(CoreError::Sync(SyncError::NoFactoryRegistered { .. }))
        ));
    }

    #[tokio::test]
    async fn test_register_client_validates_converters() {
        let core = CoreService::bootstrap(test_config(), vec![]).await.unwrap();
        core.register_client(server("late")).await.unwrap();
        assert!(core.clients().get(&ClientId::new("late")).await.is_some());

        let job = core.run_sync(UserId::new(), ClientId::new("late")).await.unwrap();
        assert_eq!(job.stats.items_created, 1);
        assert!(core
            .sync_history(&UserId::new(), &ClientId::new("late"), 5)
            .await
            .unwrap()
            .is_empty());
    }
}
