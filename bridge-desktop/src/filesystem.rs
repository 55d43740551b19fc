//! File System Access Implementation for desktop volumes

use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileStat, FileSystemAccess},
};
use core_async::time::system_time_to_millis;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Desktop file system implementation
///
/// Allocation is read from the volume rather than inferred:
/// - Unix: `st_blocks * 512`, which is zero for dataless/sparse placeholders
/// - Windows: zero when the entry carries a cloud recall or offline attribute
pub struct TokioFileSystem {
    data_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the platform data directory
    pub fn new() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join("audioshelf");

        Self { data_dir }
    }

    /// Create a new file system accessor with a custom data directory
    pub fn with_data_directory(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub(crate) fn map_io_error(path: &Path, e: std::io::Error) -> BridgeError {
        match e.kind() {
            ErrorKind::NotFound => BridgeError::NotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => BridgeError::AccessDenied(path.to_path_buf()),
            _ => BridgeError::Io(e),
        }
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemAccess for TokioFileSystem {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = std::fs::metadata(path).map_err(|e| Self::map_io_error(path, e))?;

        let modified_at_millis = metadata
            .modified()
            .map(system_time_to_millis)
            .unwrap_or_default();

        Ok(FileStat {
            size: metadata.len(),
            allocated_bytes: allocated_bytes(&metadata),
            modified_at_millis,
            is_directory: metadata.is_dir(),
        })
    }

    fn data_directory(&self) -> Result<PathBuf> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .map_err(|e| Self::map_io_error(&self.data_dir, e))?;
            debug!(path = ?self.data_dir, "Created data directory");
        }
        Ok(self.data_dir.clone())
    }
}

#[cfg(unix)]
fn allocated_bytes(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;

    // st_blocks is always counted in 512-byte units
    metadata.blocks().saturating_mul(512)
}

#[cfg(windows)]
fn allocated_bytes(metadata: &std::fs::Metadata) -> u64 {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_OFFLINE: u32 = 0x0000_1000;
    const FILE_ATTRIBUTE_RECALL_ON_OPEN: u32 = 0x0004_0000;
    const FILE_ATTRIBUTE_RECALL_ON_DATA_ACCESS: u32 = 0x0040_0000;

    let remote = FILE_ATTRIBUTE_OFFLINE
        | FILE_ATTRIBUTE_RECALL_ON_OPEN
        | FILE_ATTRIBUTE_RECALL_ON_DATA_ACCESS;
    if metadata.file_attributes() & remote != 0 {
        0
    } else {
        metadata.len()
    }
}

#[cfg(not(any(unix, windows)))]
fn allocated_bytes(metadata: &std::fs::Metadata) -> u64 {
    metadata.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stat_reports_resident_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chapter01.mp3");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![7u8; 64 * 1024]).unwrap();
        file.sync_all().unwrap();

        let fs = TokioFileSystem::with_data_directory(dir.path().join("data"));
        let stat = fs.stat(&path).unwrap();

        assert_eq!(stat.size, 64 * 1024);
        assert!(stat.allocated_bytes > 0);
        assert!(!stat.is_placeholder());
        assert!(!stat.is_directory);
        assert!(stat.modified_at_millis > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sparse_file_reports_less_allocation_than_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholder.m4b");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(8 * 1024 * 1024).unwrap();

        let stat = TokioFileSystem::new().stat(&path).unwrap();
        assert_eq!(stat.size, 8 * 1024 * 1024);
        assert!(stat.allocated_bytes < stat.size);
    }

    #[test]
    fn test_missing_path_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.mp3");

        let err = TokioFileSystem::new().stat(&missing).unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(p) if p == missing));
        assert!(!TokioFileSystem::new().exists(&missing));
    }

    #[test]
    fn test_data_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("nested").join("data");
        let fs = TokioFileSystem::with_data_directory(data.clone());

        assert_eq!(fs.data_directory().unwrap(), data);
        assert!(data.is_dir());
    }
}
