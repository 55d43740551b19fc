use std::path::PathBuf;
use std::time::Duration;

use bridge_traits::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Library {0} not found")]
    LibraryNotFound(String),

    #[error("Media item {0} not found")]
    ItemNotFound(String),

    #[error("Access to {root} is stale and could not be renewed")]
    AccessStale { library_id: String, root: PathBuf },

    #[error("Could not enumerate {path}: {message}")]
    Enumeration { path: PathBuf, message: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Catalog error: {0}")]
    Catalog(#[from] LibraryError),

    #[error("Platform error: {0}")]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

/// Why a placeholder could not be made resident.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaterializeError {
    #[error("Download did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Download cancelled")]
    Cancelled,

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Download failed: {0}")]
    Platform(String),
}

impl From<BridgeError> for MaterializeError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Cancelled => MaterializeError::Cancelled,
            BridgeError::NotFound(path) => MaterializeError::NotFound(path),
            other => MaterializeError::Platform(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
