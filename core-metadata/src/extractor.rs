//! Audio Tag Extraction
//!
//! Reads duration, descriptive tags, embedded cover art and chapter presence
//! from a locally readable file using the `lofty` crate (ID3v2, Vorbis
//! Comments, MP4 ilst, RIFF INFO, APE).
//!
//! ## Overview
//!
//! - The container read runs on the blocking pool.
//! - Field values come from the ordered candidate table in [`crate::tags`],
//!   searched across every tag in the file, primary tag first.
//! - When the container cannot be decoded or reports zero duration, the
//!   platform search index is consulted (see [`crate::fallback`]).
//! - A result is only ever returned with a positive duration.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::extractor::MetadataExtractor;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let extractor = MetadataExtractor::new();
//! match extractor
//!     .extract_with_timeout(Path::new("book.m4b"), Duration::from_secs(20))
//!     .await
//! {
//!     Some(metadata) => println!("{} ({:.0}s)", metadata.title, metadata.duration_secs),
//!     None => println!("try again on the next scan"),
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::search::SearchIndex;
use bytes::Bytes;
use core_async::race::{deadline, Outcome};
use core_async::time::Duration;
use lofty::config::ParseOptions;
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::picture::PictureType;
use lofty::probe::Probe;
use lofty::tag::Tag;
use serde::{Deserialize, Serialize};
use core_runtime::logging::strip_path;
use tracing::{debug, warn};

use crate::chapters;
use crate::error::{MetadataError, Result};
use crate::fallback;
use crate::tags;

/// Where the final metadata came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataSource {
    /// Decoded from the file's own container
    Container,
    /// Supplied by the platform search index
    SearchIndex,
}

/// Metadata ready to be committed to the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    /// Tag title, or the filename stem when no tag carries one
    pub title: String,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    /// Always positive
    pub duration_secs: f64,
    /// Front cover, or the first embedded picture
    pub cover_art: Option<Bytes>,
    pub has_chapters: bool,
    pub source: MetadataSource,
}

/// What the container read produced, before any fallback
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ContainerMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub duration_secs: f64,
    pub cover_art: Option<Bytes>,
    pub has_chapters: bool,
}

/// Opens and parses `path` with lofty.
pub(crate) fn probe(path: &Path) -> Result<TaggedFile> {
    Probe::open(path)
        .map_err(|e| match e.kind() {
            lofty::error::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                MetadataError::FileNotFound(path.display().to_string())
            }
            _ => MetadataError::ExtractionFailed(format!("Failed to open file: {}", e)),
        })?
        .options(ParseOptions::new())
        .guess_file_type()
        .map_err(|e| MetadataError::ExtractionFailed(format!("Failed to probe file: {}", e)))?
        .read()
        .map_err(|e| MetadataError::CorruptedFile(format!("Failed to parse file: {}", e)))
}

/// Audio metadata extractor
pub struct MetadataExtractor {
    extract_cover_art: bool,
    search_index: Option<Arc<dyn SearchIndex>>,
}

impl MetadataExtractor {
    /// Extractor without a search-index fallback
    pub fn new() -> Self {
        Self {
            extract_cover_art: true,
            search_index: None,
        }
    }

    /// Consult `index` when the container yields no usable duration.
    pub fn with_search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search_index = Some(index);
        self
    }

    pub fn with_cover_art(mut self, enabled: bool) -> Self {
        self.extract_cover_art = enabled;
        self
    }

    pub fn has_search_index(&self) -> bool {
        self.search_index.is_some()
    }

    /// Extract metadata, bounded by `timeout`.
    ///
    /// `None` means "try again later": the read timed out, the file could not
    /// be decoded and the index had nothing usable, or the duration was zero.
    /// A timed-out read is abandoned; the blocking thread finishes on its own.
    pub async fn extract_with_timeout(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> Option<ExtractedMetadata> {
        match deadline(timeout, self.extract(path)).await {
            Outcome::Completed(Ok(metadata)) => Some(metadata),
            Outcome::Completed(Err(e)) => {
                debug!(file = %strip_path(&path), error = %e, "Extraction produced nothing usable");
                None
            }
            Outcome::TimedOut | Outcome::Cancelled => {
                warn!(
                    file = %strip_path(&path),
                    timeout_ms = timeout.as_millis() as u64,
                    "Extraction timed out"
                );
                None
            }
        }
    }

    /// Extract metadata without a time bound.
    ///
    /// # Errors
    ///
    /// Returns the container error (or [`MetadataError::NoDuration`]) when
    /// neither the container nor the search index produced a positive
    /// duration.
    pub async fn extract(&self, path: &Path) -> Result<ExtractedMetadata> {
        let container = self.read_container(path).await;

        match container {
            Ok(found) if found.duration_secs > 0.0 => Ok(finish(path, found)),
            Ok(found) => {
                debug!(file = %strip_path(&path), "Container reports zero duration");
                self.fall_back(path, Some(found), MetadataError::NoDuration(path.display().to_string()))
                    .await
            }
            Err(e) => {
                debug!(file = %strip_path(&path), error = %e, "Container read failed");
                self.fall_back(path, None, e).await
            }
        }
    }

    /// Metadata from the search index alone, without touching file bytes.
    ///
    /// Used for remote-only files when downloads are not allowed.
    pub async fn extract_from_index(&self, path: &Path) -> Result<ExtractedMetadata> {
        self.fall_back(path, None, MetadataError::NoDuration(path.display().to_string()))
            .await
    }

    async fn fall_back(
        &self,
        path: &Path,
        partial: Option<ContainerMetadata>,
        original: MetadataError,
    ) -> Result<ExtractedMetadata> {
        let Some(index) = &self.search_index else {
            return Err(original);
        };

        match fallback::from_index(index.as_ref(), path, partial.as_ref()).await {
            Ok(Some(metadata)) => Ok(metadata),
            Ok(None) => Err(original),
            Err(e) => {
                warn!(file = %strip_path(&path), error = %e, "Search index lookup failed");
                Err(original)
            }
        }
    }

    async fn read_container(&self, path: &Path) -> Result<ContainerMetadata> {
        let owned: PathBuf = path.to_path_buf();
        let with_cover = self.extract_cover_art;

        core_async::task::spawn_blocking(move || read_container_blocking(&owned, with_cover))
            .await
            .map_err(|e| MetadataError::TaskFailed(e.to_string()))?
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn read_container_blocking(path: &Path, with_cover: bool) -> Result<ContainerMetadata> {
    let tagged = probe(path)?;
    let duration_secs = tagged.properties().duration().as_secs_f64();

    let mut ordered: Vec<&Tag> = Vec::with_capacity(tagged.tags().len());
    if let Some(primary) = tagged.primary_tag() {
        ordered.push(primary);
    }
    let primary_type = tagged.primary_tag_type();
    ordered.extend(tagged.tags().iter().filter(|t| t.tag_type() != primary_type));

    let has_chapters = match chapters::scan(path, &ordered) {
        Ok(scan) => scan.present,
        Err(e) => {
            debug!(file = %strip_path(&path), error = %e, "Chapter scan failed");
            false
        }
    };

    Ok(ContainerMetadata {
        title: tags::resolve(&ordered, &tags::title()),
        author: tags::resolve(&ordered, &tags::author()),
        genre: tags::resolve(&ordered, &tags::genre()),
        year: tags::resolve_year(&ordered, &tags::year()),
        duration_secs,
        cover_art: if with_cover { cover_art(&ordered) } else { None },
        has_chapters,
    })
}

/// Front cover if any tag has one, otherwise the first non-empty picture.
fn cover_art(ordered: &[&Tag]) -> Option<Bytes> {
    let pictures = || ordered.iter().flat_map(|tag| tag.pictures().iter());
    pictures()
        .find(|p| p.pic_type() == PictureType::CoverFront && !p.data().is_empty())
        .or_else(|| pictures().find(|p| !p.data().is_empty()))
        .map(|p| Bytes::copy_from_slice(p.data()))
}

fn finish(path: &Path, found: ContainerMetadata) -> ExtractedMetadata {
    ExtractedMetadata {
        title: found.title.unwrap_or_else(|| stem_title(path)),
        author: found.author,
        genre: found.genre,
        year: found.year,
        duration_secs: found.duration_secs,
        cover_art: found.cover_art,
        has_chapters: found.has_chapters,
        source: MetadataSource::Container,
    }
}

/// Filename stem used when no tag carries a title.
pub fn stem_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| tags::normalize_text(&s.to_string_lossy()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofty::picture::{MimeType, Picture};
    use lofty::tag::TagType;

    #[test]
    fn stem_title_from_path() {
        assert_eq!(stem_title(Path::new("/a/b/The  Hobbit.m4b")), "The Hobbit");
        assert_eq!(stem_title(Path::new("/")), "Untitled");
    }

    #[test]
    fn front_cover_preferred() {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.push_picture(Picture::new_unchecked(
            PictureType::Other,
            Some(MimeType::Png),
            None,
            vec![1],
        ));
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(MimeType::Jpeg),
            None,
            vec![2, 2],
        ));

        assert_eq!(cover_art(&[&tag]), Some(Bytes::from_static(&[2, 2])));
    }

    #[test]
    fn first_picture_when_no_front_cover() {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.push_picture(Picture::new_unchecked(
            PictureType::Artist,
            Some(MimeType::Png),
            None,
            vec![7],
        ));
        assert_eq!(cover_art(&[&tag]), Some(Bytes::from_static(&[7])));
        assert_eq!(cover_art(&[]), None);
    }

    #[test]
    fn finish_falls_back_to_stem() {
        let found = ContainerMetadata {
            duration_secs: 12.0,
            ..Default::default()
        };
        let metadata = finish(Path::new("/books/Night Watch.mp3"), found);
        assert_eq!(metadata.title, "Night Watch");
        assert_eq!(metadata.source, MetadataSource::Container);
    }
}
