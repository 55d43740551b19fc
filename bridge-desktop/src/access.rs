//! Path-based content-root access.
//!
//! Desktop platforms have no sandbox grants: the credential is the root's
//! canonical path, and a grant is stale when that path can no longer be
//! listed.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge_traits::{
    access::{AccessStatus, RootAccess},
    error::{BridgeError, Result},
};
use core_async::task;
use tracing::{debug, warn};

use crate::filesystem::TokioFileSystem;

#[derive(Debug, Default, Clone)]
pub struct PathRootAccess;

impl PathRootAccess {
    pub fn new() -> Self {
        Self
    }

    fn decode(credential: &[u8]) -> PathBuf {
        PathBuf::from(String::from_utf8_lossy(credential).into_owned())
    }
}

#[async_trait]
impl RootAccess for PathRootAccess {
    async fn resolve_access(&self, root: &Path, credential: Option<&[u8]>) -> Result<AccessStatus> {
        let target = credential
            .map(Self::decode)
            .unwrap_or_else(|| root.to_path_buf());

        let probe = target.clone();
        let listable = task::spawn_blocking(move || std::fs::read_dir(&probe).map(|_| ()))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("access probe failed: {e}")))?;

        match listable {
            Ok(()) => Ok(AccessStatus::Ready(target)),
            Err(e) => {
                debug!(root = ?target.file_name(), error = %e, "Stored root grant does not resolve");
                Ok(AccessStatus::Stale)
            }
        }
    }

    async fn renew_access(&self, root: &Path) -> Result<Vec<u8>> {
        let owned = root.to_path_buf();
        let canonical = task::spawn_blocking(move || std::fs::canonicalize(&owned))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("access renewal failed: {e}")))?
            .map_err(|e| {
                warn!(root = ?root.file_name(), error = %e, "Cannot renew root grant");
                TokioFileSystem::map_io_error(root, e)
            })?;

        Ok(canonical.to_string_lossy().into_owned().into_bytes())
    }
}
