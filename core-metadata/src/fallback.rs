//! Degraded metadata from the platform search index.
//!
//! Indexers usually hold a duration even for files whose bytes are not
//! resident, so this path never reads the file. The index never supplies cover
//! art. Fields the index lacks are taken from whatever the container read
//! managed to decode before it failed or reported zero duration.

use std::path::Path;

use bridge_traits::search::SearchIndex;
use core_runtime::logging::strip_path;
use tracing::debug;

use crate::error::Result;
use crate::extractor::{stem_title, ContainerMetadata, ExtractedMetadata, MetadataSource};
use crate::tags::normalize_text;

/// Builds metadata from the index entry for `path`.
///
/// Returns `Ok(None)` when the file is not indexed or the index has no
/// positive duration for it.
pub(crate) async fn from_index(
    index: &dyn SearchIndex,
    path: &Path,
    partial: Option<&ContainerMetadata>,
) -> Result<Option<ExtractedMetadata>> {
    let Some(indexed) = index.lookup(path).await? else {
        debug!(file = %strip_path(&path), "File is not in the search index");
        return Ok(None);
    };

    let Some(duration_secs) = indexed.usable_duration() else {
        debug!(file = %strip_path(&path), "Search index has no usable duration");
        return Ok(None);
    };

    let clean = |value: Option<String>| {
        value
            .map(|v| normalize_text(&v))
            .filter(|v| !v.is_empty())
    };
    let partial = partial.cloned().unwrap_or_default();

    Ok(Some(ExtractedMetadata {
        title: clean(indexed.title)
            .or(partial.title)
            .unwrap_or_else(|| stem_title(path)),
        author: clean(indexed.author).or(partial.author),
        genre: clean(indexed.genre).or(partial.genre),
        year: indexed.year.filter(|y| *y > 0).or(partial.year),
        duration_secs,
        cover_art: None,
        has_chapters: partial.has_chapters,
        source: MetadataSource::SearchIndex,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bridge_traits::search::IndexedMetadata;
    use bytes::Bytes;
    use mockall::mock;

    mock! {
        pub Index {}

        #[async_trait::async_trait]
        impl SearchIndex for Index {
            async fn lookup(&self, path: &Path) -> bridge_traits::error::Result<Option<IndexedMetadata>>;
        }
    }

    fn index_returning(entry: Option<IndexedMetadata>) -> MockIndex {
        let mut index = MockIndex::new();
        index
            .expect_lookup()
            .times(1)
            .returning(move |_| Ok(entry.clone()));
        index
    }

    #[core_async::test]
    async fn index_duration_replaces_zero_duration() {
        let index = index_returning(Some(IndexedMetadata {
            title: Some("Indexed Title".into()),
            duration_secs: Some(5400.0),
            ..Default::default()
        }));
        let partial = ContainerMetadata {
            author: Some("Tag Author".into()),
            duration_secs: 0.0,
            cover_art: Some(Bytes::from_static(b"jpeg")),
            ..Default::default()
        };

        let metadata = from_index(&index, Path::new("/b/x.m4b"), Some(&partial))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(metadata.duration_secs, 5400.0);
        assert_eq!(metadata.title, "Indexed Title");
        assert_eq!(metadata.author.as_deref(), Some("Tag Author"));
        assert!(metadata.cover_art.is_none(), "index never supplies cover art");
        assert_eq!(metadata.source, MetadataSource::SearchIndex);
    }

    #[core_async::test]
    async fn zero_index_duration_is_not_usable() {
        let index = index_returning(Some(IndexedMetadata {
            duration_secs: Some(0.0),
            ..Default::default()
        }));
        let result = from_index(&index, Path::new("/b/x.mp3"), None).await.unwrap();
        assert!(result.is_none());
    }

    #[core_async::test]
    async fn unindexed_file() {
        let index = index_returning(None);
        let result = from_index(&index, Path::new("/b/x.mp3"), None).await.unwrap();
        assert!(result.is_none());
    }

    #[core_async::test]
    async fn title_defaults_to_stem() {
        let index = index_returning(Some(IndexedMetadata {
            title: Some("   ".into()),
            duration_secs: Some(10.0),
            ..Default::default()
        }));
        let metadata = from_index(&index, Path::new("/b/Chapter Seven.mp3"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.title, "Chapter Seven");
    }

    #[core_async::test]
    async fn index_errors_propagate() {
        let mut index = MockIndex::new();
        index
            .expect_lookup()
            .returning(|_| Err(BridgeError::NotAvailable("indexer offline".into())));
        assert!(from_index(&index, Path::new("/b/x.mp3"), None).await.is_err());
    }
}
