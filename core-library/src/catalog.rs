//! # Catalog Store
//!
//! The single shared mutable resource of the sync engine. Reads are plain
//! queries; every engine-side write is expressed as a [`CatalogBatch`] and
//! applied by [`CatalogStore::commit`] inside one transaction.
//!
//! Commits are serialized by a store-wide lock so that a Pass 1 commit and a
//! Pass 2 batch commit never interleave, even when the pool hands out several
//! connections.
//!
//! ## Extraction updates
//!
//! An [`ExtractionUpdate`] only touches extracted columns. The user-owned
//! columns (`playback_position`, `is_starred`, ...) are not part of the
//! statement, so a resync can never overwrite them. `file_mod_time` is
//! written as `MAX(stored, observed)` so it never moves backwards.

use crate::error::{LibraryError, Result};
use crate::models::{Library, MediaItem};
use crate::repositories::{
    LibraryRepository, MediaItemRepository, SqliteLibraryRepository, SqliteMediaItemRepository,
};
use async_trait::async_trait;
use core_async::sync::Mutex;
use core_async::time::now_secs;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Metadata produced by one successful extraction
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionUpdate {
    pub item_id: String,
    /// New title; `None` keeps the stored one
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    /// Duration in seconds, always positive for a successful extraction
    pub duration: f64,
    pub cover_art: Option<Vec<u8>>,
    /// When false the stored cover is left untouched
    pub replace_cover: bool,
    pub has_chapters: bool,
    /// Modification time observed when the item was queued (unix ms)
    pub observed_mod_time: i64,
}

/// Engine-side writes applied atomically
#[derive(Debug, Clone, Default)]
pub struct CatalogBatch {
    pub creates: Vec<MediaItem>,
    pub deletes: Vec<String>,
    pub updates: Vec<ExtractionUpdate>,
}

impl CatalogBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.deletes.is_empty() && self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.deletes.len() + self.updates.len()
    }
}

/// Row counts written by a commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub created: usize,
    pub deleted: usize,
    /// Updates whose item still existed at commit time
    pub updated: usize,
}

/// Catalog operations consumed by the sync engine
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn fetch_libraries(&self) -> Result<Vec<Library>>;

    async fn find_library(&self, id: &str) -> Result<Option<Library>>;

    /// Insert a new library or update label, credential and last-opened time
    /// of an existing one.
    async fn save_library(&self, library: &Library) -> Result<()>;

    /// Delete a library with its items and bookmarks. Files are untouched.
    async fn delete_library(&self, id: &str) -> Result<bool>;

    async fn update_credential(&self, library_id: &str, credential: &[u8]) -> Result<()>;

    async fn touch_library(&self, library_id: &str) -> Result<()>;

    async fn fetch_items(&self, library_id: &str) -> Result<Vec<MediaItem>>;

    async fn find_item(&self, item_id: &str) -> Result<Option<MediaItem>>;

    /// Apply `batch` in one transaction. Either every row is written or none.
    async fn commit(&self, batch: CatalogBatch) -> Result<CommitReport>;
}

/// SQLite-backed catalog
pub struct SqliteCatalogStore {
    pool: SqlitePool,
    libraries: SqliteLibraryRepository,
    items: SqliteMediaItemRepository,
    commit_lock: Mutex<()>,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            libraries: SqliteLibraryRepository::new(pool.clone()),
            items: SqliteMediaItemRepository::new(pool.clone()),
            pool,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn fetch_libraries(&self) -> Result<Vec<Library>> {
        self.libraries.list().await
    }

    async fn find_library(&self, id: &str) -> Result<Option<Library>> {
        self.libraries.find_by_id(id).await
    }

    async fn save_library(&self, library: &Library) -> Result<()> {
        match self.libraries.find_by_id(&library.id).await? {
            Some(_) => self.libraries.update(library).await,
            None => self.libraries.insert(library).await,
        }
    }

    async fn delete_library(&self, id: &str) -> Result<bool> {
        let _guard = self.commit_lock.lock().await;
        self.libraries.delete(id).await
    }

    async fn update_credential(&self, library_id: &str, credential: &[u8]) -> Result<()> {
        self.libraries.update_credential(library_id, credential).await
    }

    async fn touch_library(&self, library_id: &str) -> Result<()> {
        self.libraries.touch(library_id, now_secs() as i64).await
    }

    async fn fetch_items(&self, library_id: &str) -> Result<Vec<MediaItem>> {
        self.items.fetch_by_library(library_id).await
    }

    async fn find_item(&self, item_id: &str) -> Result<Option<MediaItem>> {
        self.items.find_by_id(item_id).await
    }

    async fn commit(&self, batch: CatalogBatch) -> Result<CommitReport> {
        if batch.is_empty() {
            return Ok(CommitReport::default());
        }

        for item in &batch.creates {
            item.validate().map_err(|msg| LibraryError::InvalidInput {
                field: "media_item".to_string(),
                message: msg,
            })?;
        }
        for update in &batch.updates {
            if !update.duration.is_finite() || update.duration <= 0.0 {
                return Err(LibraryError::InvalidInput {
                    field: "duration".to_string(),
                    message: format!(
                        "item {} has non-positive duration {}",
                        update.item_id, update.duration
                    ),
                });
            }
        }

        let _guard = self.commit_lock.lock().await;
        let now = now_secs() as i64;
        let mut report = CommitReport::default();
        let mut tx = self.pool.begin().await?;

        for id in &batch.deletes {
            let result = sqlx::query("DELETE FROM media_items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            report.deleted += result.rows_affected() as usize;
        }

        for item in &batch.creates {
            sqlx::query(
                r#"
                INSERT INTO media_items (
                    id, library_id, file_path,
                    title, author, genre, year, duration, cover_art, has_chapters,
                    file_mod_time, metadata_loaded,
                    playback_position, last_played_at, is_completed, is_starred, is_hidden, rating,
                    created_at, updated_at
                ) VALUES (
                    ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?,
                    ?, ?,
                    ?, ?, ?, ?, ?, ?,
                    ?, ?
                )
                "#,
            )
            .bind(&item.id)
            .bind(&item.library_id)
            .bind(&item.file_path)
            .bind(&item.title)
            .bind(&item.author)
            .bind(&item.genre)
            .bind(item.year)
            .bind(item.duration)
            .bind(&item.cover_art)
            .bind(item.has_chapters)
            .bind(item.file_mod_time)
            .bind(item.metadata_loaded)
            .bind(item.playback_position)
            .bind(item.last_played_at)
            .bind(item.is_completed)
            .bind(item.is_starred)
            .bind(item.is_hidden)
            .bind(item.rating)
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await?;
            report.created += 1;
        }

        for update in &batch.updates {
            let result = sqlx::query(
                r#"
                UPDATE media_items SET
                    title = COALESCE(?, title),
                    author = ?,
                    genre = ?,
                    year = ?,
                    duration = ?,
                    cover_art = CASE WHEN ? THEN ? ELSE cover_art END,
                    has_chapters = ?,
                    file_mod_time = MAX(file_mod_time, ?),
                    metadata_loaded = 1,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&update.title)
            .bind(&update.author)
            .bind(&update.genre)
            .bind(update.year)
            .bind(update.duration)
            .bind(update.replace_cover)
            .bind(&update.cover_art)
            .bind(update.has_chapters)
            .bind(update.observed_mod_time)
            .bind(now)
            .bind(&update.item_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                warn!(item_id = %update.item_id, "Extracted item vanished before commit");
            } else {
                report.updated += 1;
            }
        }

        tx.commit().await?;

        debug!(
            created = report.created,
            deleted = report.deleted,
            updated = report.updated,
            "Catalog batch committed"
        );

        Ok(report)
    }
}
