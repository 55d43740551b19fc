//! # Batch Extraction Scheduler
//!
//! Pass 2 of a scan: extract metadata for the items Pass 1 queued, a fixed
//! number at a time.
//!
//! ## Overview
//!
//! Items are partitioned into batches of `batch_size`. Every item of a batch
//! runs in its own task; the scheduler awaits the whole batch, then commits
//! the successful results as one catalog transaction. Extraction tasks never
//! touch the catalog themselves.
//!
//! - A failed or timed-out item stays `metadata_loaded = false` and is
//!   retried by the next scan.
//! - A failed commit is logged and the next batch proceeds.
//! - Progress advances by the batch size after every batch, whatever the
//!   per-item outcomes.
//! - Cancellation is observed between batches only; an item that started
//!   always runs to its own timeout.
//!
//! [`ExtractionWorker`] is the production [`ItemProcessor`]: it materializes
//! placeholders (or falls back to the search index, depending on
//! [`RemotePolicy`]) and then extracts.

use std::sync::Arc;

use async_trait::async_trait;
use core_async::race::{deadline, deadline_or_cancel, Outcome};
use core_async::sync::CancellationToken;
use core_async::task::JoinSet;
use core_async::time::Duration;
use core_library::{CatalogBatch, CatalogStore, ExtractionUpdate};
use core_metadata::{ExtractedMetadata, MetadataExtractor, MetadataSource};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use core_runtime::RemotePolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::materializer::Materializer;
use crate::reconciler::ExtractionTarget;
use crate::remote::RemoteFileDetector;

/// Produces the catalog update for one queued item.
///
/// `None` leaves the item stale. Implementations must bound their own
/// running time.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, target: &ExtractionTarget) -> Option<ExtractionUpdate>;
}

/// Outcome of one Pass 2 run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRunReport {
    /// Items queued for this run
    pub total: u64,
    /// Items whose batch finished (successfully or not)
    pub completed: u64,
    /// Items whose metadata was committed
    pub extracted: u64,
    /// Items that produced nothing or whose batch failed to commit
    pub failed: u64,
    pub batches: u64,
    pub failed_commits: u64,
    /// Stopped at a batch boundary before every item was processed
    pub cancelled: bool,
}

pub struct BatchScheduler {
    catalog: Arc<dyn CatalogStore>,
    processor: Arc<dyn ItemProcessor>,
    batch_size: usize,
    inter_batch_yield: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl BatchScheduler {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        processor: Arc<dyn ItemProcessor>,
        batch_size: usize,
    ) -> Self {
        Self {
            catalog,
            processor,
            batch_size: batch_size.max(1),
            inter_batch_yield: Duration::from_millis(25),
            event_bus: None,
        }
    }

    pub fn with_inter_batch_yield(mut self, pause: Duration) -> Self {
        self.inter_batch_yield = pause;
        self
    }

    /// Publish `ItemUpdated` for every committed item.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Process `items` batch by batch.
    ///
    /// `on_progress(completed, total)` is called after every batch.
    pub async fn run<F>(
        &self,
        items: Vec<ExtractionTarget>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> BatchRunReport
    where
        F: FnMut(u64, u64) + Send,
    {
        let total = items.len() as u64;
        let mut report = BatchRunReport {
            total,
            ..Default::default()
        };

        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.inter_batch_yield.is_zero() {
                // Pause between batches, waking early on cancellation.
                let pause = std::future::pending::<()>();
                deadline_or_cancel(self.inter_batch_yield, cancel, pause).await;
            }
            if cancel.is_cancelled() {
                info!(completed = report.completed, total, "Extraction cancelled at batch boundary");
                report.cancelled = true;
                return report;
            }

            let updates = self.process_batch(batch).await;
            let produced = updates.len() as u64;
            let item_ids: Vec<String> = updates.iter().map(|u| u.item_id.clone()).collect();

            let mut catalog_batch = CatalogBatch::new();
            catalog_batch.updates = updates;

            match self.catalog.commit(catalog_batch).await {
                Ok(committed) => {
                    report.extracted += committed.updated as u64;
                    report.failed += batch.len() as u64 - committed.updated as u64;
                    self.announce(item_ids);
                }
                Err(e) => {
                    warn!(batch = index, items = produced, error = %e, "Batch commit failed, items stay stale");
                    report.failed_commits += 1;
                    report.failed += batch.len() as u64;
                }
            }

            report.batches += 1;
            report.completed = (report.completed + batch.len() as u64).min(total);
            on_progress(report.completed, total);
        }

        debug!(
            total,
            extracted = report.extracted,
            failed = report.failed,
            "Extraction run finished"
        );
        report
    }

    async fn process_batch(&self, batch: &[ExtractionTarget]) -> Vec<ExtractionUpdate> {
        let mut tasks = JoinSet::new();
        for target in batch {
            let processor = self.processor.clone();
            let target = target.clone();
            tasks.spawn(async move { processor.process(&target).await });
        }

        let mut updates = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Extraction task panicked"),
            }
        }
        updates
    }

    fn announce(&self, item_ids: Vec<String>) {
        if let Some(bus) = &self.event_bus {
            for item_id in item_ids {
                bus.emit(CoreEvent::Library(LibraryEvent::ItemUpdated { item_id }))
                    .ok();
            }
        }
    }
}

/// Materialize-then-extract processing of a single item.
pub struct ExtractionWorker {
    extractor: Arc<MetadataExtractor>,
    detector: RemoteFileDetector,
    materializer: Materializer,
    policy: RemotePolicy,
    extraction_timeout: Duration,
    materialize_timeout: Duration,
}

impl ExtractionWorker {
    pub fn new(
        extractor: Arc<MetadataExtractor>,
        detector: RemoteFileDetector,
        materializer: Materializer,
    ) -> Self {
        Self {
            extractor,
            detector,
            materializer,
            policy: RemotePolicy::default(),
            extraction_timeout: Duration::from_secs(20),
            materialize_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_policy(mut self, policy: RemotePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeouts(mut self, extraction: Duration, materialize: Duration) -> Self {
        self.extraction_timeout = extraction;
        self.materialize_timeout = materialize;
        self
    }

    async fn extract_remote(&self, target: &ExtractionTarget) -> Option<ExtractedMetadata> {
        let path = target.path();
        match self.policy {
            RemotePolicy::Materialize => {
                if let Err(e) = self
                    .materializer
                    .materialize(path, self.materialize_timeout)
                    .await
                {
                    warn!(item_id = %target.item_id, error = %e, "Could not materialize item");
                    return None;
                }
                self.extractor
                    .extract_with_timeout(path, self.extraction_timeout)
                    .await
            }
            RemotePolicy::IndexOnly => {
                match deadline(self.extraction_timeout, self.extractor.extract_from_index(path)).await
                {
                    Outcome::Completed(Ok(metadata)) => Some(metadata),
                    Outcome::Completed(Err(e)) => {
                        debug!(item_id = %target.item_id, error = %e, "No indexed metadata for placeholder");
                        None
                    }
                    Outcome::TimedOut | Outcome::Cancelled => {
                        warn!(item_id = %target.item_id, "Search index lookup timed out");
                        None
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ItemProcessor for ExtractionWorker {
    async fn process(&self, target: &ExtractionTarget) -> Option<ExtractionUpdate> {
        let metadata = if self.detector.is_remote_only(target.path()) {
            self.extract_remote(target).await
        } else {
            self.extractor
                .extract_with_timeout(target.path(), self.extraction_timeout)
                .await
        }?;

        Some(to_update(target, metadata))
    }
}

/// Catalog update for freshly extracted metadata.
///
/// Cover art is only replaced when the container itself was read; the search
/// index never carries artwork and must not erase what is stored.
pub fn to_update(target: &ExtractionTarget, metadata: ExtractedMetadata) -> ExtractionUpdate {
    ExtractionUpdate {
        item_id: target.item_id.clone(),
        title: Some(metadata.title),
        author: metadata.author,
        genre: metadata.genre,
        year: metadata.year,
        duration: metadata.duration_secs,
        cover_art: metadata.cover_art.map(|bytes| bytes.to_vec()),
        replace_cover: metadata.source == MetadataSource::Container,
        has_chapters: metadata.has_chapters,
        observed_mod_time: target.observed_mod_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{create_test_pool, Library, MediaItem, SqliteCatalogStore};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    /// Succeeds for every item except the ones listed, which time out.
    struct ScriptedProcessor {
        failing: HashSet<String>,
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ItemProcessor for ScriptedProcessor {
        async fn process(&self, target: &ExtractionTarget) -> Option<ExtractionUpdate> {
            self.seen.lock().unwrap().push(target.item_id.clone());
            if self.failing.contains(&target.item_id) {
                core_async::time::sleep(Duration::from_millis(30)).await;
                return None;
            }
            Some(ExtractionUpdate {
                item_id: target.item_id.clone(),
                title: Some(format!("Title of {}", target.file_path)),
                author: None,
                genre: None,
                year: None,
                duration: 60.0,
                cover_art: None,
                replace_cover: false,
                has_chapters: false,
                observed_mod_time: target.observed_mod_time,
            })
        }
    }

    async fn seeded(count: usize) -> (Arc<SqliteCatalogStore>, Vec<ExtractionTarget>) {
        let store = Arc::new(SqliteCatalogStore::new(create_test_pool().await.unwrap()));
        let library = Library::new(Path::new("/books"), None, 0);
        store.save_library(&library).await.unwrap();

        let items: Vec<MediaItem> = (0..count)
            .map(|i| {
                MediaItem::new_discovered(&library.id, Path::new(&format!("/books/{i:02}.mp3")), 0)
            })
            .collect();
        let mut batch = CatalogBatch::new();
        batch.creates = items.clone();
        store.commit(batch).await.unwrap();

        let targets = items
            .iter()
            .map(|item| ExtractionTarget {
                item_id: item.id.clone(),
                library_id: item.library_id.clone(),
                file_path: item.file_path.clone(),
                observed_mod_time: 1_000,
            })
            .collect();
        (store, targets)
    }

    #[core_async::test]
    async fn failed_item_does_not_block_its_batch() {
        let (store, targets) = seeded(5).await;
        let slow = targets[2].item_id.clone();
        let processor = Arc::new(ScriptedProcessor {
            failing: [slow.clone()].into_iter().collect(),
            seen: StdMutex::new(Vec::new()),
        });

        let scheduler = BatchScheduler::new(store.clone(), processor, 5);
        let mut progress = Vec::new();
        let report = scheduler
            .run(targets.clone(), &CancellationToken::new(), |c, t| progress.push((c, t)))
            .await;

        assert_eq!(progress, vec![(5, 5)]);
        assert_eq!(report.extracted, 4);
        assert_eq!(report.failed, 1);

        for target in &targets {
            let item = store.find_item(&target.item_id).await.unwrap().unwrap();
            assert_eq!(item.metadata_loaded, target.item_id != slow);
            if target.item_id != slow {
                assert_eq!(item.file_mod_time, 1_000);
            } else {
                assert_eq!(item.file_mod_time, 0, "failed item keeps its old mtime");
            }
        }
    }

    #[core_async::test]
    async fn progress_advances_per_batch() {
        let (store, targets) = seeded(12).await;
        let processor = Arc::new(ScriptedProcessor {
            failing: HashSet::new(),
            seen: StdMutex::new(Vec::new()),
        });

        let scheduler = BatchScheduler::new(store, processor, 5)
            .with_inter_batch_yield(Duration::from_millis(1));
        let mut progress = Vec::new();
        let report = scheduler
            .run(targets, &CancellationToken::new(), |c, t| progress.push((c, t)))
            .await;

        assert_eq!(progress, vec![(5, 12), (10, 12), (12, 12)]);
        assert_eq!(report.batches, 3);
        assert_eq!(report.extracted, 12);
        assert!(!report.cancelled);
    }

    #[core_async::test]
    async fn cancellation_stops_at_batch_boundary() {
        let (store, targets) = seeded(10).await;
        let processor = Arc::new(ScriptedProcessor {
            failing: HashSet::new(),
            seen: StdMutex::new(Vec::new()),
        });

        let token = CancellationToken::new();
        let scheduler = BatchScheduler::new(store, processor.clone(), 5);
        let report = scheduler
            .run(targets, &token, |_, _| token.cancel())
            .await;

        assert!(report.cancelled);
        assert_eq!(report.completed, 5);
        assert_eq!(processor.seen.lock().unwrap().len(), 5);
    }

    #[core_async::test]
    async fn cancellation_during_pause_skips_next_batch() {
        let (store, targets) = seeded(10).await;
        let processor = Arc::new(ScriptedProcessor {
            failing: HashSet::new(),
            seen: StdMutex::new(Vec::new()),
        });

        let token = CancellationToken::new();
        let canceller = token.clone();
        core_async::spawn(async move {
            core_async::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let scheduler = BatchScheduler::new(store, processor.clone(), 5)
            .with_inter_batch_yield(Duration::from_millis(500));
        let started = std::time::Instant::now();
        let report = scheduler.run(targets, &token, |_, _| {}).await;

        assert!(report.cancelled);
        assert_eq!(report.completed, 5);
        assert_eq!(report.batches, 1);
        assert_eq!(processor.seen.lock().unwrap().len(), 5);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn index_metadata_never_replaces_cover() {
        let target = ExtractionTarget {
            item_id: "item".into(),
            library_id: "lib".into(),
            file_path: "/cloud/a.m4b".into(),
            observed_mod_time: 7,
        };
        let metadata = ExtractedMetadata {
            title: "Indexed".into(),
            author: None,
            genre: None,
            year: None,
            duration_secs: 10.0,
            cover_art: None,
            has_chapters: false,
            source: MetadataSource::SearchIndex,
        };

        let update = to_update(&target, metadata);
        assert!(!update.replace_cover);
        assert_eq!(update.observed_mod_time, 7);
        assert_eq!(update.title.as_deref(), Some("Indexed"));
    }
}
