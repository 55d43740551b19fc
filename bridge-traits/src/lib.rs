//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the library synchronization engine
//! and platform-specific implementations. Each trait represents a capability
//! the engine requires but that has to be implemented differently per
//! platform (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Files & content roots
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Size, allocation and mtime of a path
//! - [`RootAccess`](access::RootAccess) - Resolve and renew persisted folder grants
//!
//! ### Cloud-backed folders
//! - [`CloudMaterializer`](cloud::CloudMaterializer) - Download a placeholder's bytes
//! - [`SearchIndex`](search::SearchIndex) - Indexed attributes without reading the file
//!
//! ### Utilities
//! - [`LoggerSink`](logger::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with a descriptive error when a required capability
//! is missing:
//!
//! ```ignore
//! let file_system = config.file_system
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "FileSystemAccess".to_string(),
//!         message: "Desktop: enable the `desktop-shims` feature. \
//!                   Mobile: inject the platform adapter.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and include the path involved.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the engine shares one instance
//! across every extraction task of a batch.

pub mod access;
pub mod cloud;
pub mod error;
pub mod logger;
pub mod search;
pub mod storage;

pub use error::BridgeError;

pub use access::{AccessStatus, RootAccess};
pub use cloud::CloudMaterializer;
pub use search::{IndexedMetadata, SearchIndex};
pub use storage::{FileStat, FileSystemAccess};
pub use logger::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
