//! # Reconciler
//!
//! Pass 1 of a scan: compare the content root with the catalog and compute
//! the minimal set of creations, deletions and re-extractions.
//!
//! ## Overview
//!
//! - The root is walked on the blocking pool with `walkdir`. Hidden entries
//!   and opaque bundle directories are pruned; only files with a supported
//!   audio extension are kept. Nothing but directory metadata is read.
//! - A symlink to an audio file is catalogued under the link's path. Symlinked
//!   directories are not descended, so a link cycle cannot stall a scan.
//! - Records whose file is gone are deleted, unseen files get a new record,
//!   and records whose file changed (or never extracted) are queued.
//! - Creations and deletions are committed as one catalog batch before
//!   [`Reconciler::reconcile`] returns, so Pass 2 always starts from a
//!   catalog that lists exactly the files on disk.
//!
//! A subdirectory that cannot be read does not delete the records under it;
//! they are kept as they are until the directory becomes readable again.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use core_async::time::{now_secs, system_time_to_millis};
use core_library::{CatalogBatch, CatalogStore, Library, MediaItem};
use core_runtime::logging::strip_path;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SyncError};

/// Directory suffixes that are opaque packages rather than folders.
const BUNDLE_EXTENSIONS: &[&str] = &[
    "app",
    "bundle",
    "framework",
    "photoslibrary",
    "musiclibrary",
    "plugin",
    "pkg",
    "rtfd",
];

/// Counts reported as soon as Pass 1 finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub created: u64,
    pub removed: u64,
    /// Existing records whose file changed or was never extracted
    pub queued: u64,
    /// Existing records that are up to date
    pub skipped: u64,
    pub total_found: u64,
}

/// One item handed to Pass 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTarget {
    pub item_id: String,
    pub library_id: String,
    pub file_path: String,
    /// Modification time seen by this pass (unix millis). Persisted only
    /// when extraction succeeds.
    pub observed_mod_time: i64,
}

impl ExtractionTarget {
    pub fn path(&self) -> &Path {
        Path::new(&self.file_path)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub summary: ReconcileSummary,
    pub needs_extraction: Vec<ExtractionTarget>,
    /// IDs of records created by this pass
    pub created_ids: Vec<String>,
    /// IDs of records deleted by this pass
    pub removed_ids: Vec<String>,
}

#[derive(Debug, Clone)]
struct DiscoveredFile {
    path: String,
    modified_at_millis: i64,
}

#[derive(Debug, Default)]
struct Enumeration {
    files: Vec<DiscoveredFile>,
    unreadable: Vec<PathBuf>,
}

pub struct Reconciler {
    catalog: Arc<dyn CatalogStore>,
    extensions: Arc<HashSet<String>>,
}

impl Reconciler {
    /// `extensions` are matched case-insensitively, without the dot.
    pub fn new<I, S>(catalog: Arc<dyn CatalogStore>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            catalog,
            extensions: Arc::new(extensions),
        }
    }

    /// Reconcile `library` against the files currently under `root`.
    ///
    /// `root` is the path the access grant resolved to, which may differ from
    /// the stored root after a move.
    ///
    /// # Errors
    ///
    /// Fails when the root itself cannot be enumerated or the catalog is
    /// unavailable. Nothing is committed in either case.
    #[instrument(skip(self, library), fields(library_id = %library.id))]
    pub async fn reconcile(&self, root: &Path, library: &Library) -> Result<ReconcileOutcome> {
        let enumeration = self.enumerate(root).await?;
        let existing = self.catalog.fetch_items(&library.id).await?;

        let outcome = diff(library, enumeration, existing);

        let mut batch = CatalogBatch::new();
        batch.deletes = outcome.removed_ids.clone();
        batch.creates = outcome.creates;
        self.catalog.commit(batch).await?;

        let outcome = outcome.result;
        info!(
            created = outcome.summary.created,
            removed = outcome.summary.removed,
            queued = outcome.summary.queued,
            skipped = outcome.summary.skipped,
            total_found = outcome.summary.total_found,
            "Reconciliation committed"
        );
        Ok(outcome)
    }

    async fn enumerate(&self, root: &Path) -> Result<Enumeration> {
        let root = root.to_path_buf();
        let extensions = self.extensions.clone();
        core_async::task::spawn_blocking(move || enumerate_blocking(&root, &extensions))
            .await
            .map_err(|e| SyncError::TaskFailed(e.to_string()))?
    }
}

struct Diff {
    result: ReconcileOutcome,
    creates: Vec<MediaItem>,
    removed_ids: Vec<String>,
}

fn diff(library: &Library, enumeration: Enumeration, existing: Vec<MediaItem>) -> Diff {
    let now = now_secs() as i64;
    let mut by_path: HashMap<String, MediaItem> = existing
        .into_iter()
        .map(|item| (item.file_path.clone(), item))
        .collect();

    let mut summary = ReconcileSummary {
        total_found: enumeration.files.len() as u64,
        ..Default::default()
    };
    let mut needs_extraction = Vec::new();
    let mut creates = Vec::new();

    for file in enumeration.files {
        match by_path.remove(&file.path) {
            Some(item) if item.is_stale(file.modified_at_millis) => {
                summary.queued += 1;
                needs_extraction.push(target(&item, file.modified_at_millis));
            }
            Some(_) => summary.skipped += 1,
            None => {
                let item = MediaItem::new_discovered(&library.id, Path::new(&file.path), now);
                summary.created += 1;
                needs_extraction.push(target(&item, file.modified_at_millis));
                creates.push(item);
            }
        }
    }

    // Whatever is left was not seen on disk.
    let mut removed_ids = Vec::new();
    for (path, item) in by_path {
        if enumeration
            .unreadable
            .iter()
            .any(|dir| Path::new(&path).starts_with(dir))
        {
            debug!(item_id = %item.id, "Keeping record under unreadable directory");
            continue;
        }
        removed_ids.push(item.id);
    }
    summary.removed = removed_ids.len() as u64;

    let created_ids = creates.iter().map(|item| item.id.clone()).collect();
    Diff {
        result: ReconcileOutcome {
            summary,
            needs_extraction,
            created_ids,
            removed_ids: removed_ids.clone(),
        },
        creates,
        removed_ids,
    }
}

fn target(item: &MediaItem, observed_mod_time: i64) -> ExtractionTarget {
    ExtractionTarget {
        item_id: item.id.clone(),
        library_id: item.library_id.clone(),
        file_path: item.file_path.clone(),
        observed_mod_time,
    }
}

fn enumerate_blocking(root: &Path, extensions: &HashSet<String>) -> Result<Enumeration> {
    let mut enumeration = Enumeration::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                if e.depth() == 0 {
                    return Err(SyncError::Enumeration {
                        path,
                        message: e.to_string(),
                    });
                }
                warn!(file = %strip_path(&path), error = %e, "Skipping unreadable entry");
                enumeration.unreadable.push(path);
                continue;
            }
        };

        if !has_audio_extension(entry.path(), extensions) {
            continue;
        }
        // Symlinked files are catalogued; symlinked directories are never entered.
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(target) if target.is_file() => Some(target),
                _ => continue,
            }
        } else if entry.file_type().is_file() {
            entry.metadata().ok()
        } else {
            continue;
        };

        let modified_at_millis = metadata
            .and_then(|m| m.modified().ok())
            .map(system_time_to_millis)
            .unwrap_or(0);

        enumeration.files.push(DiscoveredFile {
            path: entry.path().to_string_lossy().into_owned(),
            modified_at_millis,
        });
    }

    debug!(
        root = %strip_path(&root),
        files = enumeration.files.len(),
        unreadable = enumeration.unreadable.len(),
        "Enumeration finished"
    );
    Ok(enumeration)
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir()
        && Path::new(name.as_ref())
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                BUNDLE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

fn has_audio_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or(false)
}
