//! Cloud-sync client integration.
//!
//! Content roots mirrored by a sync client (iCloud Drive, OneDrive Files On
//! Demand, Dropbox smart sync) contain placeholder entries whose bytes are
//! fetched on request. The platform exposes that request through
//! [`CloudMaterializer`].

use std::path::Path;

use async_trait::async_trait;
use core_async::sync::CancellationToken;

use crate::error::Result;

/// Asks the platform sync layer to make a file's bytes resident.
///
/// # Contract
///
/// - `request_download` resolves once the platform reports the file as fully
///   downloaded, or fails with the platform's error.
/// - When `cancel` fires the implementation must stop the transfer (or stop
///   waiting for it) and return `BridgeError::Cancelled` promptly.
/// - Calling it for a file that is already resident returns `Ok(())`.
///
/// Progress is not reported through this trait; callers estimate it by
/// polling [`FileSystemAccess::stat`](crate::storage::FileSystemAccess::stat).
#[async_trait]
pub trait CloudMaterializer: Send + Sync {
    async fn request_download(&self, path: &Path, cancel: CancellationToken) -> Result<()>;
}
