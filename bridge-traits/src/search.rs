//! Platform search index (Spotlight, Windows Search, Tracker).
//!
//! Indexers often know the duration and basic tags of a file whose bytes are
//! not resident. The metadata extractor consults this index when decoding the
//! file itself yields nothing usable.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Attributes a search index may hold for an audio file.
///
/// Indexes never carry artwork.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub duration_secs: Option<f64>,
}

impl IndexedMetadata {
    /// Duration if the index reports a positive value.
    pub fn usable_duration(&self) -> Option<f64> {
        self.duration_secs.filter(|d| d.is_finite() && *d > 0.0)
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Looks up indexed attributes for `path`.
    ///
    /// Returns `Ok(None)` when the file is not indexed.
    async fn lookup(&self, path: &Path) -> Result<Option<IndexedMetadata>>;
}
