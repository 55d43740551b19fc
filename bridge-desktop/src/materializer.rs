//! Read-through materialization for desktop sync clients.
//!
//! Desktop sync clients (APFS dataless files, the Windows Cloud Files API,
//! FUSE mounts such as rclone) hydrate a placeholder when its data is read.
//! Reading the file front to back is therefore a portable download request.

use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::FileSystemAccess,
    CloudMaterializer,
};
use core_async::sync::CancellationToken;
use core_async::task;
use tracing::{debug, info};

use crate::filesystem::TokioFileSystem;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Hydrates placeholder files by reading them sequentially on the blocking pool.
///
/// The cancellation token is checked between chunks, so a cancelled request
/// stops within one chunk read.
pub struct ReadThroughMaterializer {
    fs: TokioFileSystem,
}

impl ReadThroughMaterializer {
    pub fn new() -> Self {
        Self {
            fs: TokioFileSystem::new(),
        }
    }
}

impl Default for ReadThroughMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudMaterializer for ReadThroughMaterializer {
    async fn request_download(&self, path: &Path, cancel: CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }

        let stat = self.fs.stat(path)?;
        if !stat.is_placeholder() {
            debug!(file = ?path.file_name(), "File already resident");
            return Ok(());
        }

        info!(file = ?path.file_name(), size = stat.size, "Hydrating placeholder");
        let owned: PathBuf = path.to_path_buf();
        task::spawn_blocking(move || read_through(&owned, &cancel))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("hydration task failed: {e}")))?
    }
}

fn read_through(path: &Path, cancel: &CancellationToken) -> Result<()> {
    let mut file =
        std::fs::File::open(path).map_err(|e| TokioFileSystem::map_io_error(path, e))?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        if cancel.is_cancelled() {
            debug!(file = ?path.file_name(), "Hydration cancelled");
            return Err(BridgeError::Cancelled);
        }
        match file.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TokioFileSystem::map_io_error(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resident_file_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.m4b");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let materializer = ReadThroughMaterializer::new();
        materializer
            .request_download(&path, CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_request_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.m4b");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let err = ReadThroughMaterializer::new()
            .request_download(&path, token)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReadThroughMaterializer::new()
            .request_download(&dir.path().join("missing.mp3"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sparse_file_is_read_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.mp3");
        std::fs::File::create(&path)
            .unwrap()
            .set_len(3 * CHUNK_SIZE as u64)
            .unwrap();

        ReadThroughMaterializer::new()
            .request_download(&path, CancellationToken::new())
            .await
            .unwrap();
    }
}
