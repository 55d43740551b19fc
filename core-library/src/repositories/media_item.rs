//! Media item repository trait and implementation
//!
//! Engine-side writes (creation, deletion, extraction results) go through
//! [`crate::catalog::CatalogStore::commit`]. This repository covers reads and
//! the user-owned fields that hosts change outside of a sync.

use crate::error::{LibraryError, Result};
use crate::models::MediaItem;
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};

/// User-owned state of a media item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub playback_position: f64,
    pub last_played_at: Option<i64>,
    pub is_completed: bool,
    pub is_starred: bool,
    pub is_hidden: bool,
    pub rating: Option<i32>,
}

impl From<&MediaItem> for UserState {
    fn from(item: &MediaItem) -> Self {
        Self {
            playback_position: item.playback_position,
            last_played_at: item.last_played_at,
            is_completed: item.is_completed,
            is_starred: item.is_starred,
            is_hidden: item.is_hidden,
            rating: item.rating,
        }
    }
}

#[async_trait]
pub trait MediaItemRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<MediaItem>>;

    async fn find_by_path(&self, library_id: &str, file_path: &str) -> Result<Option<MediaItem>>;

    /// All items of a library ordered by path
    async fn fetch_by_library(&self, library_id: &str) -> Result<Vec<MediaItem>>;

    async fn count_by_library(&self, library_id: &str) -> Result<i64>;

    /// Replace the user-owned fields of an item
    ///
    /// # Errors
    /// `NotFound` if the item does not exist, `InvalidInput` for an out of
    /// range rating or a negative position.
    async fn update_user_state(&self, id: &str, state: &UserState) -> Result<()>;
}

/// SQLite implementation of MediaItemRepository
pub struct SqliteMediaItemRepository {
    pool: SqlitePool,
}

impl SqliteMediaItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaItemRepository for SqliteMediaItemRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<MediaItem>> {
        let item = query_as::<_, MediaItem>("SELECT * FROM media_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    async fn find_by_path(&self, library_id: &str, file_path: &str) -> Result<Option<MediaItem>> {
        let item = query_as::<_, MediaItem>(
            "SELECT * FROM media_items WHERE library_id = ? AND file_path = ?",
        )
        .bind(library_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn fetch_by_library(&self, library_id: &str) -> Result<Vec<MediaItem>> {
        let items = query_as::<_, MediaItem>(
            "SELECT * FROM media_items WHERE library_id = ? ORDER BY file_path ASC",
        )
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn count_by_library(&self, library_id: &str) -> Result<i64> {
        let count: (i64,) = query_as("SELECT COUNT(*) FROM media_items WHERE library_id = ?")
            .bind(library_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn update_user_state(&self, id: &str, state: &UserState) -> Result<()> {
        if !state.playback_position.is_finite() || state.playback_position < 0.0 {
            return Err(LibraryError::InvalidInput {
                field: "playback_position".to_string(),
                message: format!("{} is not a valid position", state.playback_position),
            });
        }
        if let Some(rating) = state.rating {
            if !(0..=5).contains(&rating) {
                return Err(LibraryError::InvalidInput {
                    field: "rating".to_string(),
                    message: format!("{} is out of range 0-5", rating),
                });
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE media_items SET
                playback_position = ?, last_played_at = ?, is_completed = ?,
                is_starred = ?, is_hidden = ?, rating = ?
            WHERE id = ?
            "#,
        )
        .bind(state.playback_position)
        .bind(state.last_played_at)
        .bind(state.is_completed)
        .bind(state.is_starred)
        .bind(state.is_hidden)
        .bind(state.rating)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "MediaItem".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }
}
