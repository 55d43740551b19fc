//! In-memory search index.
//!
//! Desktop hosts that talk to an indexer (Spotlight via `mdls`, Tracker)
//! populate this index with what they learn; lookups never touch the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    search::{IndexedMetadata, SearchIndex},
};
use core_async::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    entries: RwLock<HashMap<PathBuf, IndexedMetadata>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, path: impl Into<PathBuf>, metadata: IndexedMetadata) {
        self.entries.write().await.insert(path.into(), metadata);
    }

    pub async fn remove(&self, path: &Path) -> Option<IndexedMetadata> {
        self.entries.write().await.remove(path)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn lookup(&self, path: &Path) -> Result<Option<IndexedMetadata>> {
        Ok(self.entries.read().await.get(path).cloned())
    }
}
