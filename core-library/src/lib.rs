//! # Catalog Module
//!
//! Owns the durable audiobook catalog and provides repository patterns for
//! data access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - `Library`, `MediaItem` and `Bookmark` records
//! - Repositories for reads and user-owned state
//! - The [`CatalogStore`] consumed by the sync engine, whose writes are
//!   transactional batches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::{create_pool, CatalogStore, DatabaseConfig, SqliteCatalogStore};
//!
//! let pool = create_pool(DatabaseConfig::new("catalog.db")).await?;
//! let catalog = SqliteCatalogStore::new(pool);
//! for library in catalog.fetch_libraries().await? {
//!     println!("{} -> {}", library.label, library.root_path);
//! }
//! ```

pub mod catalog;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use catalog::{CatalogBatch, CatalogStore, CommitReport, ExtractionUpdate, SqliteCatalogStore};
pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{Bookmark, Library, LibraryId, MediaItem, MediaItemId};
