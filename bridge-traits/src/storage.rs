//! File system abstractions.
//!
//! The engine only ever needs directory-level facts about a file: its
//! reported size, how many bytes are actually resident on disk and its
//! modification time. Content reads happen in the metadata extractor against
//! the local path once a file is known to be resident.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory-level facts about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size reported by the directory entry (logical size).
    pub size: u64,
    /// Bytes physically allocated on the local volume.
    ///
    /// Cloud-placeholder files report their full logical `size` but zero
    /// allocated bytes until the sync client downloads them.
    pub allocated_bytes: u64,
    /// Last modification time in milliseconds since the Unix epoch.
    pub modified_at_millis: i64,
    pub is_directory: bool,
}

impl FileStat {
    /// True when the entry has content but none of it is resident locally.
    pub fn is_placeholder(&self) -> bool {
        !self.is_directory && self.size > 0 && self.allocated_bytes == 0
    }

    /// Fraction of the logical size that is resident, clamped to `[0, 1]`.
    ///
    /// Filesystems round allocation up to whole blocks, so a fully downloaded
    /// file can report more allocated bytes than its size.
    pub fn resident_fraction(&self) -> f64 {
        if self.size == 0 {
            return 1.0;
        }
        (self.allocated_bytes as f64 / self.size as f64).clamp(0.0, 1.0)
    }
}

/// File system access trait
///
/// `stat` is a metadata-only call and is expected to return quickly even for
/// placeholder files; it must never trigger a download.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// fn needs_download(fs: &dyn FileSystemAccess, path: &Path) -> bool {
///     fs.stat(path).map(|s| s.is_placeholder()).unwrap_or(false)
/// }
/// ```
pub trait FileSystemAccess: Send + Sync {
    /// Returns directory-level facts for `path`.
    ///
    /// # Errors
    ///
    /// `BridgeError::NotFound` when the path does not exist.
    fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Directory for persistent application data (the catalog database).
    fn data_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}
