//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for the catalog tables.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `LibraryRepository` - Content roots, labels and access credentials
//! - `MediaItemRepository` - Item reads and user-owned state
//! - `BookmarkRepository` - Named positions inside an item
//!
//! Multi-row engine writes go through [`crate::catalog::CatalogStore`].

pub mod bookmark;
pub mod library;
pub mod media_item;

pub use bookmark::{BookmarkRepository, SqliteBookmarkRepository};
pub use library::{LibraryRepository, SqliteLibraryRepository};
pub use media_item::{MediaItemRepository, SqliteMediaItemRepository, UserState};
