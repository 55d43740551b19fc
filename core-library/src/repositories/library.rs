//! Library repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::Library;
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};

/// Library repository interface for data access operations
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Find a library by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Library>>;

    /// Find a library by its content root
    async fn find_by_root(&self, root_path: &str) -> Result<Option<Library>>;

    /// All libraries, oldest first
    async fn list(&self) -> Result<Vec<Library>>;

    /// Insert a new library
    ///
    /// # Errors
    /// Returns `DuplicateRoot` when another library already uses the same root.
    async fn insert(&self, library: &Library) -> Result<()>;

    /// Update label, credential and last-opened time
    async fn update(&self, library: &Library) -> Result<()>;

    /// Replace the persisted access credential
    async fn update_credential(&self, id: &str, credential: &[u8]) -> Result<()>;

    /// Record that the library was opened at `at` (unix seconds)
    async fn touch(&self, id: &str, at: i64) -> Result<()>;

    /// Delete a library and, through the schema, its items and bookmarks
    ///
    /// # Returns
    /// - `Ok(true)` if the library was deleted
    /// - `Ok(false)` if it was not found
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLite implementation of LibraryRepository
pub struct SqliteLibraryRepository {
    pool: SqlitePool,
}

impl SqliteLibraryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn not_found(id: &str) -> LibraryError {
        LibraryError::NotFound {
            entity_type: "Library".to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl LibraryRepository for SqliteLibraryRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Library>> {
        let library = query_as::<_, Library>("SELECT * FROM libraries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(library)
    }

    async fn find_by_root(&self, root_path: &str) -> Result<Option<Library>> {
        let library = query_as::<_, Library>("SELECT * FROM libraries WHERE root_path = ?")
            .bind(root_path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(library)
    }

    async fn list(&self) -> Result<Vec<Library>> {
        let libraries =
            query_as::<_, Library>("SELECT * FROM libraries ORDER BY created_at ASC, label ASC")
                .fetch_all(&self.pool)
                .await?;

        Ok(libraries)
    }

    async fn insert(&self, library: &Library) -> Result<()> {
        library.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "library".to_string(),
            message: msg,
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO libraries (id, root_path, label, access_credential, created_at, last_opened_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&library.id)
        .bind(&library.root_path)
        .bind(&library.label)
        .bind(&library.access_credential)
        .bind(library.created_at)
        .bind(library.last_opened_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LibraryError::DuplicateRoot(library.root_path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, library: &Library) -> Result<()> {
        library.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "library".to_string(),
            message: msg,
        })?;

        let result = sqlx::query(
            "UPDATE libraries SET label = ?, access_credential = ?, last_opened_at = ? WHERE id = ?",
        )
        .bind(&library.label)
        .bind(&library.access_credential)
        .bind(library.last_opened_at)
        .bind(&library.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(&library.id));
        }
        Ok(())
    }

    async fn update_credential(&self, id: &str, credential: &[u8]) -> Result<()> {
        let result = sqlx::query("UPDATE libraries SET access_credential = ? WHERE id = ?")
            .bind(credential)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn touch(&self, id: &str, at: i64) -> Result<()> {
        let result = sqlx::query("UPDATE libraries SET last_opened_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM libraries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
