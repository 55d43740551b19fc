//! # Player Session
//!
//! Opening an item for playback, including on-demand download of cloud
//! placeholders.
//!
//! ## Overview
//!
//! [`PlayerSession::open_item`] returns an [`OpenStream`] of [`OpenState`]s.
//! For a placeholder the stream goes
//!
//! ```text
//! Materializing(0.0) → Materializing(p) … → Extracting → Playable
//!          └──────────────→ Error            └──→ Error
//! ```
//!
//! Resident items that were already extracted go straight to `Playable`;
//! resident items never extracted pass through `Extracting` first.
//!
//! A session tracks one open at a time. Opening another item abandons the
//! previous stream (no further states are delivered for it) but lets its
//! download run to completion; [`PlayerSession::cancel_open`] cancels the
//! download as well.
//!
//! Failures are kept as the session's single current error until
//! acknowledged or until the next successful open.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::FileSystemAccess;
use core_async::race::{deadline_or_cancel, Outcome};
use core_async::sync::{mpsc, watch, CancellationToken, Mutex};
use core_async::time::Duration;
use core_library::{CatalogBatch, CatalogStore, MediaItem};
use core_metadata::{Chapter, MetadataExtractor};
use core_runtime::events::{CoreEvent, EventBus, OpenEvent};
use core_runtime::logging::strip_path;
use tracing::{debug, info, instrument, warn};

use crate::error::{MaterializeError, Result, SyncError};
use crate::materializer::Materializer;
use crate::reconciler::ExtractionTarget;
use crate::scheduler::to_update;

/// One step of opening an item.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenState {
    /// Download fraction in `[0, 1]`, non-decreasing
    Materializing(f64),
    Extracting,
    Playable {
        item: MediaItem,
        chapters: Vec<Chapter>,
    },
    Error(String),
}

impl OpenState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpenState::Playable { .. } | OpenState::Error(_))
    }
}

/// States of one open request, ending with `Playable` or `Error`.
///
/// The stream also ends without a terminal state when the open is cancelled
/// or superseded.
pub struct OpenStream {
    receiver: mpsc::UnboundedReceiver<OpenState>,
}

impl OpenStream {
    pub async fn recv(&mut self) -> Option<OpenState> {
        self.receiver.recv().await
    }

    /// Drain the stream and return every state it delivered.
    pub async fn collect(mut self) -> Vec<OpenState> {
        let mut states = Vec::new();
        while let Some(state) = self.receiver.recv().await {
            states.push(state);
        }
        states
    }
}

struct ActiveOpen {
    generation: u64,
    item_id: String,
    cancel: CancellationToken,
}

pub struct PlayerSession {
    flow: Arc<OpenFlow>,
    generation: Arc<AtomicU64>,
    current_error: Arc<watch::Sender<Option<String>>>,
    active: Arc<Mutex<Option<ActiveOpen>>>,
}

impl PlayerSession {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        fs: Arc<dyn FileSystemAccess>,
        materializer: Materializer,
        extractor: Arc<MetadataExtractor>,
    ) -> Self {
        let (current_error, _) = watch::channel(None);
        Self {
            flow: Arc::new(OpenFlow {
                catalog,
                fs,
                materializer,
                extractor,
                extraction_timeout: Duration::from_secs(20),
                materialize_timeout: Duration::from_secs(300),
                event_bus: None,
            }),
            generation: Arc::new(AtomicU64::new(0)),
            current_error: Arc::new(current_error),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Must be called before the session is shared.
    pub fn with_timeouts(mut self, extraction: Duration, materialize: Duration) -> Self {
        if let Some(flow) = Arc::get_mut(&mut self.flow) {
            flow.extraction_timeout = extraction;
            flow.materialize_timeout = materialize;
        }
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        if let Some(flow) = Arc::get_mut(&mut self.flow) {
            flow.event_bus = Some(event_bus);
        }
        self
    }

    /// Start opening `item_id` and return its state stream.
    ///
    /// # Errors
    ///
    /// [`SyncError::ItemNotFound`] when the catalog has no such item. Every
    /// other failure is delivered through the stream and the current error.
    #[instrument(skip(self))]
    pub async fn open_item(&self, item_id: &str) -> Result<OpenStream> {
        let item = self
            .flow
            .catalog
            .find_item(item_id)
            .await?
            .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = self.active.lock().await.replace(ActiveOpen {
            generation,
            item_id: item.id.clone(),
            cancel: cancel.clone(),
        }) {
            debug!(previous = %previous.item_id, "Abandoning tracking of previous open");
        }

        let (tx, receiver) = mpsc::unbounded_channel();
        let reporter = Reporter {
            generation,
            current: self.generation.clone(),
            item_id: item.id.clone(),
            tx,
            error: self.current_error.clone(),
            event_bus: self.flow.event_bus.clone(),
        };

        let flow = self.flow.clone();
        let active = self.active.clone();
        core_async::spawn(async move {
            flow.run(item, &reporter, cancel).await;
            let mut slot = active.lock().await;
            if slot.as_ref().map(|a| a.generation) == Some(generation) {
                slot.take();
            }
            // The stream closes only once the slot is released.
            drop(slot);
            drop(reporter);
        });

        Ok(OpenStream { receiver })
    }

    /// Cancel the in-flight open, including its download.
    ///
    /// Returns `false` when nothing was being opened, including after the
    /// last open reached `Playable` or `Error`.
    pub async fn cancel_open(&self) -> bool {
        match self.active.lock().await.take() {
            Some(active) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                active.cancel.cancel();
                info!(item_id = %active.item_id, "Open cancelled");
                true
            }
            None => false,
        }
    }

    pub fn current_error(&self) -> Option<String> {
        self.current_error.borrow().clone()
    }

    pub fn acknowledge_error(&self) {
        self.current_error.send_replace(None);
    }

    /// Watch the current error as it is raised and cleared.
    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.current_error.subscribe()
    }
}

/// Delivers states for one open, as long as it is still the current one.
struct Reporter {
    generation: u64,
    current: Arc<AtomicU64>,
    item_id: String,
    tx: mpsc::UnboundedSender<OpenState>,
    error: Arc<watch::Sender<Option<String>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl Reporter {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn state(&self, state: OpenState) {
        if !self.is_current() {
            return;
        }
        if let Some(bus) = &self.event_bus {
            let item_id = self.item_id.clone();
            let event = match &state {
                OpenState::Materializing(progress) => OpenEvent::Materializing {
                    item_id,
                    progress: *progress,
                },
                OpenState::Extracting => OpenEvent::Extracting { item_id },
                OpenState::Playable { .. } => OpenEvent::Playable { item_id },
                OpenState::Error(message) => OpenEvent::Failed {
                    item_id,
                    message: message.clone(),
                },
            };
            bus.emit(CoreEvent::Open(event)).ok();
        }
        self.tx.send(state).ok();
    }

    fn fail(&self, reason: String) {
        if !self.is_current() {
            return;
        }
        warn!(item_id = %self.item_id, reason = %reason, "Open failed");
        self.error.send_replace(Some(reason.clone()));
        self.state(OpenState::Error(reason));
    }

    fn playable(&self, item: MediaItem, chapters: Vec<Chapter>) {
        if !self.is_current() {
            return;
        }
        self.error.send_replace(None);
        self.state(OpenState::Playable { item, chapters });
    }
}

struct OpenFlow {
    catalog: Arc<dyn CatalogStore>,
    fs: Arc<dyn FileSystemAccess>,
    materializer: Materializer,
    extractor: Arc<MetadataExtractor>,
    extraction_timeout: Duration,
    materialize_timeout: Duration,
    event_bus: Option<Arc<EventBus>>,
}

impl OpenFlow {
    async fn run(&self, item: MediaItem, reporter: &Reporter, cancel: CancellationToken) {
        let path = item.path().to_path_buf();
        let stat = match self.fs.stat(&path) {
            Ok(stat) => stat,
            Err(e) => {
                reporter.fail(format!("\"{}\" is unavailable: {}", item.title, e));
                return;
            }
        };

        if stat.is_placeholder() {
            reporter.state(OpenState::Materializing(0.0));
            let downloaded = self
                .materializer
                .materialize_with_progress(&path, self.materialize_timeout, &cancel, |p| {
                    reporter.state(OpenState::Materializing(p))
                })
                .await;
            match downloaded {
                Ok(()) => {}
                Err(MaterializeError::Cancelled) if cancel.is_cancelled() => {
                    debug!(item_id = %item.id, "Download cancelled");
                    return;
                }
                Err(e) => {
                    reporter.fail(format!("\"{}\" could not be downloaded: {}", item.title, e));
                    return;
                }
            }
        } else if item.metadata_loaded {
            let chapters = self.chapters(&path, item.has_chapters).await;
            reporter.playable(item, chapters);
            return;
        }

        reporter.state(OpenState::Extracting);
        let metadata =
            match deadline_or_cancel(self.extraction_timeout, &cancel, self.extractor.extract(&path))
                .await
            {
                Outcome::Completed(Ok(metadata)) => metadata,
                Outcome::Completed(Err(e)) => {
                    reporter.fail(format!("\"{}\" could not be read: {}", item.title, e));
                    return;
                }
                Outcome::TimedOut => {
                    reporter.fail(format!("Reading \"{}\" timed out", item.title));
                    return;
                }
                Outcome::Cancelled => return,
            };

        let observed_mod_time = self
            .fs
            .stat(&path)
            .map(|s| s.modified_at_millis)
            .unwrap_or(stat.modified_at_millis);
        let target = ExtractionTarget {
            item_id: item.id.clone(),
            library_id: item.library_id.clone(),
            file_path: item.file_path.clone(),
            observed_mod_time,
        };
        let has_chapters = metadata.has_chapters;

        let mut batch = CatalogBatch::new();
        batch.updates.push(to_update(&target, metadata));
        if let Err(e) = self.catalog.commit(batch).await {
            warn!(item_id = %item.id, error = %e, "Could not store metadata read at open");
        }

        let refreshed = self.catalog.find_item(&item.id).await;
        let item = match refreshed {
            Ok(Some(fresh)) => fresh,
            _ => item,
        };
        let chapters = self.chapters(&path, has_chapters).await;
        reporter.playable(item, chapters);
    }

    async fn chapters(&self, path: &Path, has_chapters: bool) -> Vec<Chapter> {
        if !has_chapters {
            return Vec::new();
        }
        let owned: PathBuf = path.to_path_buf();
        match core_async::task::spawn_blocking(move || core_metadata::read_chapters(&owned)).await {
            Ok(Ok(chapters)) => chapters,
            Ok(Err(e)) => {
                warn!(file = %strip_path(&path), error = %e, "Could not list chapters");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Chapter listing task failed");
                Vec::new()
            }
        }
    }
}
