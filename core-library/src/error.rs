use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Library root already registered: {0}")]
    DuplicateRoot(String),
}

impl LibraryError {
    /// True when the underlying SQLite error is a UNIQUE constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            LibraryError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            LibraryError::DuplicateRoot(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
