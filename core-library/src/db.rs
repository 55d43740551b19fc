//! # Catalog Database
//!
//! Opens the SQLite file that holds libraries, media items and bookmarks.
//! The catalog is the persistent cache of every scan, so the pool applies
//! the embedded migrations before handing out a connection.
//!
//! Connections run in WAL mode with foreign keys on; removing a library
//! cascades to its items and their bookmarks.
//!
//! ```rust,ignore
//! let pool = create_pool(DatabaseConfig::new(data_dir.join("catalog.db"))).await?;
//! let catalog = SqliteCatalogStore::new(pool);
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Where the catalog lives and how many connections may read it at once.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Catalog file; `None` keeps the catalog in memory.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    /// How long a writer waits on a lock held by a concurrent scan commit.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// An in-memory catalog on one pinned connection.
    ///
    /// Every in-memory connection opens its own empty database, so the pool
    /// never grows past one.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            max_connections: 1,
            busy_timeout: Duration::from_secs(5),
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match &self.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::new().in_memory(true),
        };
        options
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }
}

/// Open the catalog and bring its schema up to date.
///
/// # Errors
///
/// - `LibraryError::Database` if the file cannot be opened or created
/// - `LibraryError::Migration` if the schema cannot be migrated
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    let location = config
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());
    info!(catalog = %location, max_connections = config.max_connections, "Opening catalog");

    let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections);
    if config.path.is_none() {
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(config.connect_options())
        .await
        .map_err(|e| {
            warn!(catalog = %location, error = %e, "Cannot open catalog");
            LibraryError::Database(e)
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        warn!(error = %e, "Catalog migration failed");
        LibraryError::Migration(e.to_string())
    })?;

    Ok(pool)
}

/// A migrated in-memory catalog for tests.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}
