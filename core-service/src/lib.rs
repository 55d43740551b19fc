//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (file system, cloud
//! sync client, folder grants, search index) into the shared Rust core. Desktop
//! apps typically enable the `desktop-shims` feature, which lets
//! [`CoreConfig`] fall back to the `bridge-desktop` adapters for any bridge the
//! host does not inject.
//!
//! ```rust,ignore
//! let config = CoreConfig::builder()
//!     .database_path(data_dir.join("catalog.db"))
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//!
//! let library = core.add_library(&root, None).await?;
//! let scan = core.scan_library(&library.id).await?;
//! println!("{} new books", scan.summary.created);
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::path::Path;
use std::sync::Arc;

use core_library::repositories::{MediaItemRepository, SqliteMediaItemRepository, UserState};
use core_library::{create_pool, DatabaseConfig, Library, MediaItem, SqliteCatalogStore};
use core_metadata::MetadataExtractor;
use core_runtime::events::{EventBus, EventStream};
use core_runtime::logging::{init_logging, strip_path};
use core_sync::{OpenStream, PlayerSession, ScanHandle, ScanJob, SyncConfig, SyncCoordinator};
use sqlx::SqlitePool;
use tracing::{info, instrument};

pub use core_runtime::config::{CoreConfig, CoreConfigBuilder, RemotePolicy, ScanTuning};
pub use core_sync::OpenState;

/// Primary façade exposed to host applications.
///
/// Cloning is cheap; clones share the catalog, the coordinator and the
/// player session.
#[derive(Clone)]
pub struct CoreService {
    config: Arc<CoreConfig>,
    event_bus: Arc<EventBus>,
    coordinator: Arc<SyncCoordinator>,
    player: Arc<PlayerSession>,
    user_state: Arc<SqliteMediaItemRepository>,
}

impl CoreService {
    /// Bootstrap the core: install logging when configured, open the catalog
    /// and wire the sync engine to the configured bridges.
    ///
    /// # Errors
    ///
    /// - `CoreError::Runtime` if logging cannot be installed
    /// - `CoreError::Library` if the catalog cannot be opened or migrated
    #[instrument(skip(config), fields(database = %strip_path(&config.database_path)))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        if let Some(logging) = config.logging.clone() {
            init_logging(logging)?;
        }

        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                core_async::fs::create_dir_all(parent).await.map_err(|e| {
                    CoreError::InitializationFailed(format!(
                        "Cannot create catalog directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let service = Self::with_pool(config, pool);
        info!("Core service ready");
        Ok(service)
    }

    /// Wire the sync engine on top of an existing catalog pool.
    ///
    /// Logging is left to the caller.
    pub fn with_pool(config: CoreConfig, pool: SqlitePool) -> Self {
        let catalog = Arc::new(SqliteCatalogStore::new(pool.clone()));
        let event_bus = Arc::new(EventBus::default());

        let mut extractor = MetadataExtractor::new().with_cover_art(config.scan.extract_cover_art);
        if let Some(index) = &config.search_index {
            extractor = extractor.with_search_index(index.clone());
        }

        let coordinator = SyncCoordinator::new(
            SyncConfig::from(&config.scan),
            catalog,
            event_bus.clone(),
            config.file_system.clone(),
            config.cloud_materializer.clone(),
            config.root_access.clone(),
            Arc::new(extractor),
        );
        let player = coordinator.player_session();

        Self {
            config: Arc::new(config),
            event_bus,
            coordinator: Arc::new(coordinator),
            player: Arc::new(player),
            user_state: Arc::new(SqliteMediaItemRepository::new(pool)),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The sync coordinator behind this service.
    pub fn coordinator(&self) -> Arc<SyncCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// The shared player session.
    pub fn player(&self) -> Arc<PlayerSession> {
        Arc::clone(&self.player)
    }

    /// Subscribe to scan, library and open events.
    ///
    /// Narrow the stream with [`EventStream::filter`].
    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    // Libraries

    pub async fn add_library(&self, root: &Path, label: Option<String>) -> Result<Library> {
        Ok(self.coordinator.add_library(root, label).await?)
    }

    pub async fn libraries(&self) -> Result<Vec<Library>> {
        Ok(self.coordinator.libraries().await?)
    }

    pub async fn remove_library(&self, library_id: &str) -> Result<bool> {
        Ok(self.coordinator.remove_library(library_id).await?)
    }

    pub async fn touch_library(&self, library_id: &str) -> Result<()> {
        Ok(self.coordinator.touch_library(library_id).await?)
    }

    pub async fn items(&self, library_id: &str) -> Result<Vec<MediaItem>> {
        Ok(self.coordinator.items(library_id).await?)
    }

    /// Record playback position, completion, stars and rating for an item.
    ///
    /// These fields survive every resync of the item.
    pub async fn update_user_state(&self, item_id: &str, state: &UserState) -> Result<()> {
        Ok(self.user_state.update_user_state(item_id, state).await?)
    }

    // Scanning

    pub async fn scan_library(&self, library_id: &str) -> Result<ScanHandle> {
        Ok(self.coordinator.scan(library_id).await?)
    }

    pub async fn cancel_scan(&self, library_id: &str) -> bool {
        self.coordinator.cancel_scan(library_id).await
    }

    pub async fn scan_status(&self, library_id: &str) -> Option<ScanJob> {
        self.coordinator.scan_status(library_id).await
    }

    pub fn is_remote_only(&self, item: &MediaItem) -> bool {
        self.coordinator.is_remote_only(item)
    }

    // Playback

    pub async fn open_item(&self, item_id: &str) -> Result<OpenStream> {
        Ok(self.player.open_item(item_id).await?)
    }

    pub async fn cancel_open(&self) -> bool {
        self.player.cancel_open().await
    }

    pub fn current_error(&self) -> Option<String> {
        self.player.current_error()
    }

    pub fn acknowledge_error(&self) {
        self.player.acknowledge_error()
    }
}
