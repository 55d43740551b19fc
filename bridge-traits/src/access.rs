//! Content-root access grants.
//!
//! Sandboxed platforms hand out a persisted credential (a security-scoped
//! bookmark, a persisted URI permission) when the user picks a folder. The
//! credential can go stale when the folder moves or the grant expires, and has
//! to be renewed before the folder can be enumerated again.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Result of resolving a stored grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessStatus {
    /// The root is accessible at the given (possibly relocated) path.
    Ready(PathBuf),
    /// The credential no longer resolves and must be renewed.
    Stale,
}

#[async_trait]
pub trait RootAccess: Send + Sync {
    /// Resolves `credential` for the root at `root`.
    ///
    /// A missing credential is resolved as best the platform can; desktop
    /// platforms treat the path itself as the grant.
    async fn resolve_access(&self, root: &Path, credential: Option<&[u8]>) -> Result<AccessStatus>;

    /// Obtains a fresh credential for `root`.
    ///
    /// # Errors
    ///
    /// `BridgeError::AccessDenied` when the platform refuses, `NotFound` when
    /// the root is gone.
    async fn renew_access(&self, root: &Path) -> Result<Vec<u8>>;
}
