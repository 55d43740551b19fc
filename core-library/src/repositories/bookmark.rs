//! Bookmark repository
//!
//! Bookmarks are owned by the user; the engine only relies on them being
//! removed together with their media item.

use crate::error::{LibraryError, Result};
use crate::models::Bookmark;
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};

#[async_trait]
pub trait BookmarkRepository: Send + Sync {
    async fn insert(&self, bookmark: &Bookmark) -> Result<()>;

    /// Bookmarks of an item ordered by position
    async fn list_for_item(&self, media_item_id: &str) -> Result<Vec<Bookmark>>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

pub struct SqliteBookmarkRepository {
    pool: SqlitePool,
}

impl SqliteBookmarkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookmarkRepository for SqliteBookmarkRepository {
    async fn insert(&self, bookmark: &Bookmark) -> Result<()> {
        if bookmark.name.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "name".to_string(),
                message: "Bookmark name cannot be empty".to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO bookmarks (id, media_item_id, position, name, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bookmark.id)
        .bind(&bookmark.media_item_id)
        .bind(bookmark.position)
        .bind(&bookmark.name)
        .bind(&bookmark.note)
        .bind(bookmark.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_item(&self, media_item_id: &str) -> Result<Vec<Bookmark>> {
        let bookmarks = query_as::<_, Bookmark>(
            "SELECT * FROM bookmarks WHERE media_item_id = ? ORDER BY position ASC",
        )
        .bind(media_item_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(bookmarks)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
