//! Domain models for the audiobook catalog
//!
//! This module contains the catalog records with validation and database mapping.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct LibraryId(pub Uuid);

impl LibraryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LibraryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct MediaItemId(pub Uuid);

impl MediaItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MediaItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a bookmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct BookmarkId(pub Uuid);

impl BookmarkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BookmarkId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// A user-chosen content root and the items discovered under it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Library {
    /// Unique identifier
    pub id: String,
    /// Absolute path of the content root
    pub root_path: String,
    /// Human label, defaults to the root folder name
    pub label: String,
    /// Opaque platform credential for re-opening the root
    #[serde(skip)]
    pub access_credential: Option<Vec<u8>>,
    /// When the library was added (unix seconds)
    pub created_at: i64,
    /// When the library was last opened (unix seconds)
    pub last_opened_at: Option<i64>,
}

impl Library {
    /// Create a library for `root`, deriving the label from the folder name
    /// when none is given.
    pub fn new(root: &Path, label: Option<String>, now_secs: i64) -> Self {
        let label = label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| folder_label(root));

        Self {
            id: LibraryId::new().to_string(),
            root_path: root.to_string_lossy().into_owned(),
            label,
            access_credential: None,
            created_at: now_secs,
            last_opened_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.root_path.trim().is_empty() {
            return Err("Library root path cannot be empty".to_string());
        }
        if !Path::new(&self.root_path).is_absolute() {
            return Err(format!(
                "Library root path must be absolute: {}",
                self.root_path
            ));
        }
        if self.label.trim().is_empty() {
            return Err("Library label cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.root_path)
    }
}

/// One audio file in a library
///
/// Fields fall in two groups. The extracted fields (`title` through
/// `metadata_loaded`) are written by the sync engine. The user-owned fields
/// (`playback_position` through `rating`) are only written by user actions and
/// survive every resync of the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MediaItem {
    /// Unique identifier
    pub id: String,
    /// Owning library
    pub library_id: String,
    /// Absolute path of the audio file
    pub file_path: String,

    // Extracted metadata
    /// Display title, filename-derived until extraction succeeds
    pub title: String,
    /// Artist tag, read as the book's author
    pub author: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    /// Duration in seconds
    pub duration: f64,
    /// Embedded cover image bytes
    #[serde(skip)]
    pub cover_art: Option<Vec<u8>>,
    pub has_chapters: bool,
    /// Last seen modification time (unix milliseconds)
    pub file_mod_time: i64,
    /// Whether a full extraction has succeeded for `file_mod_time`
    pub metadata_loaded: bool,

    // User state
    /// Resume position in seconds
    pub playback_position: f64,
    pub last_played_at: Option<i64>,
    pub is_completed: bool,
    pub is_starred: bool,
    pub is_hidden: bool,
    pub rating: Option<i32>,

    // Timestamps
    /// When first discovered
    pub created_at: i64,
    /// Last catalog write
    pub updated_at: i64,
}

impl MediaItem {
    /// Record for a file seen for the first time.
    ///
    /// The title is derived from the filename; `file_mod_time` stays 0 so the
    /// first successful extraction always wins the `MAX` comparison.
    pub fn new_discovered(library_id: &str, path: &Path, now_secs: i64) -> Self {
        Self {
            id: MediaItemId::new().to_string(),
            library_id: library_id.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            title: title_from_path(path),
            author: None,
            genre: None,
            year: None,
            duration: 0.0,
            cover_art: None,
            has_chapters: false,
            file_mod_time: 0,
            metadata_loaded: false,
            playback_position: 0.0,
            last_played_at: None,
            is_completed: false,
            is_starred: false,
            is_hidden: false,
            rating: None,
            created_at: now_secs,
            updated_at: now_secs,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.file_path.trim().is_empty() {
            return Err("Media item path cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Media item title cannot be empty".to_string());
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(format!("Media item duration {} is invalid", self.duration));
        }
        if let Some(rating) = self.rating {
            if !(0..=5).contains(&rating) {
                return Err(format!("Rating {} is out of range 0-5", rating));
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.file_path)
    }

    /// Whether an observed modification time requires a new extraction.
    pub fn is_stale(&self, observed_mod_time: i64) -> bool {
        !self.metadata_loaded || observed_mod_time > self.file_mod_time
    }
}

/// A named position inside a media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Bookmark {
    pub id: String,
    pub media_item_id: String,
    /// Position in seconds
    pub position: f64,
    pub name: String,
    pub note: Option<String>,
    pub created_at: i64,
}

impl Bookmark {
    pub fn new(media_item_id: &str, position: f64, name: impl Into<String>, now_secs: i64) -> Self {
        Self {
            id: BookmarkId::new().to_string(),
            media_item_id: media_item_id.to_string(),
            position,
            name: name.into(),
            note: None,
            created_at: now_secs,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Title shown for an item before its tags have been read.
pub fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn folder_label(root: &Path) -> String {
    root.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| root.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_item_uses_filename_title() {
        let item = MediaItem::new_discovered("lib", Path::new("/books/Dune/01 - Dune.m4b"), 10);
        assert_eq!(item.title, "01 - Dune");
        assert_eq!(item.file_mod_time, 0);
        assert!(!item.metadata_loaded);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn staleness_rules() {
        let mut item = MediaItem::new_discovered("lib", Path::new("/books/a.mp3"), 0);
        assert!(item.is_stale(0), "unloaded items are always stale");

        item.metadata_loaded = true;
        item.file_mod_time = 1_000;
        assert!(!item.is_stale(1_000));
        assert!(!item.is_stale(999));
        assert!(item.is_stale(1_001));
    }

    #[test]
    fn library_label_defaults_to_folder_name() {
        let library = Library::new(Path::new("/home/me/Audiobooks"), None, 0);
        assert_eq!(library.label, "Audiobooks");

        let library = Library::new(Path::new("/home/me/Audiobooks"), Some("  ".into()), 0);
        assert_eq!(library.label, "Audiobooks");

        let library = Library::new(Path::new("/home/me/Audiobooks"), Some("Mine".into()), 0);
        assert_eq!(library.label, "Mine");
    }

    #[test]
    fn library_requires_absolute_root() {
        let library = Library::new(Path::new("relative/books"), None, 0);
        assert!(library.validate().is_err());
    }

    #[test]
    fn negative_duration_is_invalid() {
        let mut item = MediaItem::new_discovered("lib", Path::new("/books/a.mp3"), 0);
        item.duration = -1.0;
        assert!(item.validate().is_err());
    }
}
