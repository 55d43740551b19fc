//! Async filesystem helpers re-exported from the underlying runtime.
//!
//! Metadata-only calls (`metadata`, `read_dir`) are what the library scanner
//! needs; content reads go through the blocking pool instead so that large
//! audio files never sit in memory.

pub use tokio::fs::{
    self, create_dir_all, metadata, read, read_dir, remove_file, rename, symlink_metadata, write,
    DirEntry, File, OpenOptions,
};
