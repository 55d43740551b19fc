//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `std::fs` metadata, with allocation read from
//!   the volume so cloud placeholders are detectable
//! - `CloudMaterializer` that hydrates placeholders by reading them through
//! - `RootAccess` where the folder path is the grant
//! - `SearchIndex` backed by an in-memory map the host fills
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{PathRootAccess, ReadThroughMaterializer, TokioFileSystem};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/tmp/audioshelf.db")
//!     .file_system(Arc::new(TokioFileSystem::new()))
//!     .cloud_materializer(Arc::new(ReadThroughMaterializer::new()))
//!     .root_access(Arc::new(PathRootAccess::new()))
//!     .build()?;
//! ```

mod access;
mod filesystem;
mod materializer;
mod search_index;

pub use access::PathRootAccess;
pub use filesystem::TokioFileSystem;
pub use materializer::ReadThroughMaterializer;
pub use search_index::MemorySearchIndex;
