//! Detection of cloud placeholders.
//!
//! A placeholder is a directory entry that reports a size but has no bytes
//! allocated locally. The answer can change at any time (the sync client may
//! evict or hydrate a file behind our back), so it is recomputed on every
//! call.

use std::path::Path;
use std::sync::Arc;

use bridge_traits::storage::FileSystemAccess;
use core_runtime::logging::strip_path;
use tracing::debug;

#[derive(Clone)]
pub struct RemoteFileDetector {
    fs: Arc<dyn FileSystemAccess>,
}

impl RemoteFileDetector {
    pub fn new(fs: Arc<dyn FileSystemAccess>) -> Self {
        Self { fs }
    }

    /// `true` when `path` exists as a placeholder without resident bytes.
    ///
    /// A path that cannot be stat'ed is reported as not remote; opening it
    /// will surface the real error.
    pub fn is_remote_only(&self, path: &Path) -> bool {
        match self.fs.stat(path) {
            Ok(stat) => stat.is_placeholder(),
            Err(e) => {
                debug!(file = %strip_path(&path), error = %e, "Stat failed while checking residency");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result};
    use bridge_traits::storage::FileStat;
    use mockall::mock;
    use std::path::PathBuf;

    mock! {
        pub Fs {}

        impl FileSystemAccess for Fs {
            fn stat(&self, path: &Path) -> Result<FileStat>;
            fn data_directory(&self) -> Result<PathBuf>;
        }
    }

    fn stat(size: u64, allocated_bytes: u64) -> FileStat {
        FileStat {
            size,
            allocated_bytes,
            modified_at_millis: 0,
            is_directory: false,
        }
    }

    #[test]
    fn placeholder_is_remote() {
        let mut fs = MockFs::new();
        fs.expect_stat().returning(|_| Ok(stat(4096, 0)));
        let detector = RemoteFileDetector::new(Arc::new(fs));
        assert!(detector.is_remote_only(Path::new("/books/a.m4b")));
    }

    #[test]
    fn resident_and_empty_files_are_local() {
        let mut fs = MockFs::new();
        fs.expect_stat()
            .returning(|p| Ok(if p.ends_with("empty.mp3") { stat(0, 0) } else { stat(4096, 4096) }));
        let detector = RemoteFileDetector::new(Arc::new(fs));
        assert!(!detector.is_remote_only(Path::new("/books/a.m4b")));
        assert!(!detector.is_remote_only(Path::new("/books/empty.mp3")));
    }

    #[test]
    fn answer_is_never_cached() {
        let mut fs = MockFs::new();
        let mut seq = mockall::Sequence::new();
        fs.expect_stat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(stat(4096, 0)));
        fs.expect_stat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(stat(4096, 4096)));

        let detector = RemoteFileDetector::new(Arc::new(fs));
        let path = Path::new("/books/a.m4b");
        assert!(detector.is_remote_only(path));
        assert!(!detector.is_remote_only(path));
    }

    #[test]
    fn missing_file_is_not_remote() {
        let mut fs = MockFs::new();
        fs.expect_stat()
            .returning(|p| Err(BridgeError::NotFound(p.to_path_buf())));
        let detector = RemoteFileDetector::new(Arc::new(fs));
        assert!(!detector.is_remote_only(Path::new("/gone.mp3")));
    }
}
