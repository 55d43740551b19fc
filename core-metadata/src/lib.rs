//! # Metadata Module
//!
//! Extracts per-file metadata for the audiobook catalog.
//!
//! ## Overview
//!
//! This module handles:
//! - Audio tag extraction (ID3, Vorbis, MP4, RIFF INFO) through an ordered
//!   table of candidate tag sources per field
//! - Embedded cover art
//! - Chapter detection and lazy chapter listing
//! - A degraded fallback to the platform search index when the container
//!   cannot be decoded or reports zero duration

pub mod chapters;
pub mod error;
pub mod extractor;
mod fallback;
pub mod tags;

pub use chapters::{detect, read_chapters, Chapter};
pub use error::{MetadataError, Result};
pub use extractor::{ExtractedMetadata, MetadataExtractor, MetadataSource};
