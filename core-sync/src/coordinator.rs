//! # Sync Coordinator
//!
//! Orchestrates library scans and library management.
//!
//! ## Overview
//!
//! The `SyncCoordinator` is the entry point hosts use to keep the catalog in
//! step with the content roots. A scan of one library:
//!
//! 1. Cancels any Pass 2 still running for that library and waits for it to
//!    stop at its next batch boundary
//! 2. Resolves the stored access grant, renewing and persisting it when
//!    stale; a grant that stays stale fails the scan before anything is
//!    reconciled
//! 3. Runs Pass 1 ([`Reconciler`]) to completion and commits its creations
//!    and deletions
//! 4. Returns a [`ScanHandle`] with the Pass 1 summary, a progress watch and
//!    the completion of Pass 2 ([`BatchScheduler`]), which runs in the
//!    background
//!
//! Scans of different libraries run independently. Every step is published
//! on the [`EventBus`] and recorded in a [`ScanJob`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncCoordinator};
//!
//! let library = coordinator.add_library(Path::new("/Users/me/Audiobooks"), None).await?;
//! let handle = coordinator.scan(&library.id).await?;
//! println!("{} new, {} removed", handle.summary.created, handle.summary.removed);
//!
//! let mut progress = handle.progress.clone();
//! while progress.changed().await.is_ok() {
//!     let p = *progress.borrow();
//!     println!("{}/{}", p.completed, p.total);
//! }
//! let report = handle.wait().await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::{AccessStatus, CloudMaterializer, FileSystemAccess, RootAccess};
use core_async::sync::{watch, CancellationToken, Mutex, RwLock};
use core_async::task::JoinHandle;
use core_async::time::{now_secs, Duration, Instant};
use core_library::{CatalogStore, Library, LibraryError, MediaItem};
use core_metadata::MetadataExtractor;
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, ScanEvent};
use core_runtime::{RemotePolicy, ScanTuning};
use core_runtime::logging::strip_path;
use tracing::{debug, error, info, instrument, warn};

use crate::job::{ScanJob, ScanJobId, ScanProgress};
use crate::materializer::Materializer;
use crate::open::PlayerSession;
use crate::reconciler::{ReconcileOutcome, ReconcileSummary, Reconciler};
use crate::remote::RemoteFileDetector;
use crate::scheduler::{BatchRunReport, BatchScheduler, ExtractionWorker, ItemProcessor};
use crate::{Result, SyncError};

/// Sync coordinator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Items extracted concurrently and committed together
    pub batch_size: usize,

    /// Timeout for extracting one item
    pub extraction_timeout: Duration,

    /// Timeout for downloading one placeholder
    pub materialize_timeout: Duration,

    /// How often download progress is sampled
    pub progress_poll_interval: Duration,

    /// Pause between batches
    pub inter_batch_yield: Duration,

    /// Whether bulk scans download placeholders
    pub remote_policy: RemotePolicy,

    /// Audio file extensions to include
    pub audio_extensions: Vec<String>,
}

impl From<&ScanTuning> for SyncConfig {
    fn from(tuning: &ScanTuning) -> Self {
        Self {
            batch_size: tuning.batch_size,
            extraction_timeout: tuning.extraction_timeout,
            materialize_timeout: tuning.materialize_timeout,
            progress_poll_interval: tuning.progress_poll_interval,
            inter_batch_yield: tuning.inter_batch_yield,
            remote_policy: tuning.remote_policy,
            audio_extensions: tuning.audio_extensions.clone(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&ScanTuning::default())
    }
}

/// Handle returned by [`SyncCoordinator::scan`].
pub struct ScanHandle {
    pub job_id: ScanJobId,
    /// Pass 1 counts; the catalog already reflects them
    pub summary: ReconcileSummary,
    /// Pass 2 progress, updated after every batch
    pub progress: watch::Receiver<ScanProgress>,
    completion: JoinHandle<BatchRunReport>,
}

impl ScanHandle {
    /// Wait for Pass 2 to finish (or stop at a batch boundary).
    pub async fn wait(self) -> Result<BatchRunReport> {
        self.completion
            .await
            .map_err(|e| SyncError::TaskFailed(e.to_string()))
    }
}

/// Active Pass 2 tracking
struct ActiveScan {
    job_id: ScanJobId,
    cancellation_token: CancellationToken,
    /// Cancelled when the Pass 2 task ends, however it ends
    finished: CancellationToken,
    progress: watch::Receiver<ScanProgress>,
}

/// Sync coordinator for orchestrating library scans
pub struct SyncCoordinator {
    /// Configuration
    config: SyncConfig,

    /// Catalog store shared with the player session
    catalog: Arc<dyn CatalogStore>,

    /// Event bus for emitting scan and library events
    event_bus: Arc<EventBus>,

    /// Root access bridge
    root_access: Arc<dyn RootAccess>,

    file_system: Arc<dyn FileSystemAccess>,

    detector: RemoteFileDetector,

    materializer: Materializer,

    extractor: Arc<MetadataExtractor>,

    reconciler: Arc<Reconciler>,

    /// Per-item Pass 2 work
    processor: Arc<dyn ItemProcessor>,

    /// Running Pass 2 per library
    active_scans: Arc<Mutex<HashMap<String, ActiveScan>>>,

    /// Serializes scans of the same library
    scan_gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,

    /// Latest job per library
    jobs: Arc<RwLock<HashMap<String, ScanJob>>>,
}

impl SyncCoordinator {
    /// Create a new sync coordinator
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let coordinator = SyncCoordinator::new(
    ///     SyncConfig::from(&config.scan),
    ///     catalog,
    ///     event_bus,
    ///     config.file_system.clone(),
    ///     config.cloud_materializer.clone(),
    ///     config.root_access.clone(),
    ///     Arc::new(MetadataExtractor::new()),
    /// );
    /// ```
    pub fn new(
        config: SyncConfig,
        catalog: Arc<dyn CatalogStore>,
        event_bus: Arc<EventBus>,
        file_system: Arc<dyn FileSystemAccess>,
        cloud: Arc<dyn CloudMaterializer>,
        root_access: Arc<dyn RootAccess>,
        extractor: Arc<MetadataExtractor>,
    ) -> Self {
        let detector = RemoteFileDetector::new(file_system.clone());
        let materializer =
            Materializer::new(cloud, file_system.clone(), config.progress_poll_interval);
        let reconciler = Arc::new(Reconciler::new(
            catalog.clone(),
            config.audio_extensions.iter(),
        ));
        let processor: Arc<dyn ItemProcessor> = Arc::new(
            ExtractionWorker::new(extractor.clone(), detector.clone(), materializer.clone())
                .with_policy(config.remote_policy)
                .with_timeouts(config.extraction_timeout, config.materialize_timeout),
        );

        Self {
            config,
            catalog,
            event_bus,
            root_access,
            file_system,
            detector,
            materializer,
            extractor,
            reconciler,
            processor,
            active_scans: Arc::new(Mutex::new(HashMap::new())),
            scan_gates: Mutex::new(HashMap::new()),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the per-item Pass 2 work.
    pub fn with_processor(mut self, processor: Arc<dyn ItemProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// A player session sharing this coordinator's catalog and bridges.
    pub fn player_session(&self) -> PlayerSession {
        PlayerSession::new(
            self.catalog.clone(),
            self.file_system.clone(),
            self.materializer.clone(),
            self.extractor.clone(),
        )
        .with_timeouts(self.config.extraction_timeout, self.config.materialize_timeout)
        .with_event_bus(self.event_bus.clone())
    }

    // ------------------------------------------------------------------
    // Library management
    // ------------------------------------------------------------------

    /// Register a content root as a library.
    ///
    /// The label defaults to the folder name. An access credential is
    /// obtained from the platform and stored with the library.
    ///
    /// # Errors
    ///
    /// - The root is not an absolute path
    /// - The platform refuses access
    /// - The root is already a library (`LibraryError::DuplicateRoot`)
    #[instrument(skip(self), fields(root = %strip_path(&root)))]
    pub async fn add_library(&self, root: &Path, label: Option<String>) -> Result<Library> {
        let mut library = Library::new(root, label, now_secs() as i64);
        library
            .validate()
            .map_err(|message| LibraryError::InvalidInput {
                field: "root_path".to_string(),
                message,
            })?;

        let credential = self.root_access.renew_access(root).await?;
        library.access_credential = Some(credential);
        self.catalog.save_library(&library).await?;

        info!(library_id = %library.id, label = %library.label, "Library added");
        self.event_bus
            .emit(CoreEvent::Library(LibraryEvent::LibraryAdded {
                library_id: library.id.clone(),
                label: library.label.clone(),
            }))
            .ok();

        Ok(library)
    }

    pub async fn libraries(&self) -> Result<Vec<Library>> {
        Ok(self.catalog.fetch_libraries().await?)
    }

    pub async fn items(&self, library_id: &str) -> Result<Vec<MediaItem>> {
        Ok(self.catalog.fetch_items(library_id).await?)
    }

    /// Record that the library was opened in the UI.
    pub async fn touch_library(&self, library_id: &str) -> Result<()> {
        Ok(self.catalog.touch_library(library_id).await?)
    }

    /// Remove a library and all of its items from the catalog.
    ///
    /// A running scan is stopped first. Files on disk are never touched.
    /// Returns `false` when no such library exists.
    #[instrument(skip(self))]
    pub async fn remove_library(&self, library_id: &str) -> Result<bool> {
        // Wait out any Pass 1 in flight so its commit cannot land after the delete.
        let gate = self.gate(library_id).await;
        let _serialized = gate.lock().await;
        self.stop_active_scan(library_id).await;

        let removed = self.catalog.delete_library(library_id).await?;
        self.jobs.write().await.remove(library_id);
        self.scan_gates.lock().await.remove(library_id);

        if removed {
            info!("Library removed");
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::LibraryRemoved {
                    library_id: library_id.to_string(),
                }))
                .ok();
        }
        Ok(removed)
    }

    /// Whether the item's file is currently a placeholder without local bytes.
    pub fn is_remote_only(&self, item: &MediaItem) -> bool {
        self.detector.is_remote_only(item.path())
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    /// Scan a library.
    ///
    /// Returns once Pass 1 is committed. Pass 2 keeps running in the
    /// background; follow it through [`ScanHandle::progress`] or
    /// [`ScanHandle::wait`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::LibraryNotFound`]
    /// - [`SyncError::AccessStale`] when the grant cannot be renewed; nothing
    ///   is reconciled in that case
    /// - Enumeration or catalog failures during Pass 1
    #[instrument(skip(self))]
    pub async fn scan(&self, library_id: &str) -> Result<ScanHandle> {
        let gate = self.gate(library_id).await;
        let _serialized = gate.lock().await;

        self.stop_active_scan(library_id).await;

        let job = ScanJob::new(library_id);
        self.emit_scan(ScanEvent::Started {
            library_id: library_id.to_string(),
        });
        let job = job.start_reconciling()?;
        self.record(job.clone()).await;

        let outcome = match self.run_pass_one(library_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Scan failed before extraction");
                let failed = job.fail(e.to_string())?;
                self.record(failed).await;
                self.emit_scan(ScanEvent::Failed {
                    library_id: library_id.to_string(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.announce_reconciliation(library_id, &outcome);

        let ReconcileOutcome {
            summary,
            needs_extraction,
            ..
        } = outcome;
        let queued = needs_extraction.len() as u64;
        let job = job.start_extracting(summary, queued)?;
        let job_id = job.id;
        self.record(job.clone()).await;

        let (progress_tx, progress_rx) = watch::channel(ScanProgress::new(queued));
        let cancellation_token = CancellationToken::new();
        let finished = CancellationToken::new();

        self.active_scans.lock().await.insert(
            library_id.to_string(),
            ActiveScan {
                job_id,
                cancellation_token: cancellation_token.clone(),
                finished: finished.clone(),
                progress: progress_rx.clone(),
            },
        );

        let scheduler = BatchScheduler::new(
            self.catalog.clone(),
            self.processor.clone(),
            self.config.batch_size,
        )
        .with_inter_batch_yield(self.config.inter_batch_yield)
        .with_event_bus(self.event_bus.clone());

        let completion = core_async::spawn(run_pass_two(PassTwo {
            library_id: library_id.to_string(),
            job,
            scheduler,
            targets: needs_extraction,
            cancellation_token,
            finished,
            progress: progress_tx,
            event_bus: self.event_bus.clone(),
            jobs: self.jobs.clone(),
        }));

        Ok(ScanHandle {
            job_id,
            summary,
            progress: progress_rx,
            completion,
        })
    }

    /// Ask the running Pass 2 of `library_id` to stop at its next batch
    /// boundary. Returns `false` when no scan is running.
    pub async fn cancel_scan(&self, library_id: &str) -> bool {
        match self.active_scans.lock().await.get(library_id) {
            Some(active) if !active.finished.is_cancelled() => {
                info!(library_id, job_id = %active.job_id, "Cancelling scan");
                active.cancellation_token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Latest scan job of `library_id`, with live progress while extracting.
    pub async fn scan_status(&self, library_id: &str) -> Option<ScanJob> {
        let mut job = self.jobs.read().await.get(library_id).cloned()?;
        if job.status.is_active() {
            if let Some(active) = self.active_scans.lock().await.get(library_id) {
                if active.job_id == job.id {
                    job.progress = *active.progress.borrow();
                }
            }
        }
        Some(job)
    }

    async fn run_pass_one(&self, library_id: &str) -> Result<ReconcileOutcome> {
        let library = self
            .catalog
            .find_library(library_id)
            .await?
            .ok_or_else(|| SyncError::LibraryNotFound(library_id.to_string()))?;

        let root = self.resolve_root(&library).await?;
        self.reconciler.reconcile(&root, &library).await
    }

    /// Resolve the library's grant, renewing it once when stale.
    async fn resolve_root(&self, library: &Library) -> Result<PathBuf> {
        let root = library.root();
        let stale = || SyncError::AccessStale {
            library_id: library.id.clone(),
            root: root.to_path_buf(),
        };

        match self
            .root_access
            .resolve_access(root, library.access_credential.as_deref())
            .await?
        {
            AccessStatus::Ready(path) => return Ok(path),
            AccessStatus::Stale => info!("Access grant is stale, renewing"),
        }

        let credential = match self.root_access.renew_access(root).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Access renewal refused");
                return Err(stale());
            }
        };
        self.catalog
            .update_credential(&library.id, &credential)
            .await?;

        match self
            .root_access
            .resolve_access(root, Some(&credential))
            .await?
        {
            AccessStatus::Ready(path) => {
                debug!(file = %strip_path(&path), "Renewed access grant resolved");
                Ok(path)
            }
            AccessStatus::Stale => Err(stale()),
        }
    }

    /// Cancel the running Pass 2 of `library_id` and wait until it stopped.
    async fn stop_active_scan(&self, library_id: &str) {
        let previous = self.active_scans.lock().await.remove(library_id);
        if let Some(previous) = previous {
            if !previous.finished.is_cancelled() {
                info!(library_id, job_id = %previous.job_id, "Stopping previous scan");
                previous.cancellation_token.cancel();
                previous.finished.cancelled().await;
            }
        }
    }

    async fn gate(&self, library_id: &str) -> Arc<Mutex<()>> {
        self.scan_gates
            .lock()
            .await
            .entry(library_id.to_string())
            .or_default()
            .clone()
    }

    async fn record(&self, job: ScanJob) {
        self.jobs.write().await.insert(job.library_id.clone(), job);
    }

    fn emit_scan(&self, event: ScanEvent) {
        self.event_bus.emit(CoreEvent::Scan(event)).ok();
    }

    fn announce_reconciliation(&self, library_id: &str, outcome: &ReconcileOutcome) {
        let summary = outcome.summary;
        self.emit_scan(ScanEvent::Reconciled {
            library_id: library_id.to_string(),
            created: summary.created,
            removed: summary.removed,
            queued: summary.queued,
            skipped: summary.skipped,
            total_found: summary.total_found,
        });

        for item_id in &outcome.created_ids {
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::ItemAdded {
                    library_id: library_id.to_string(),
                    item_id: item_id.clone(),
                }))
                .ok();
        }
        for item_id in &outcome.removed_ids {
            self.event_bus
                .emit(CoreEvent::Library(LibraryEvent::ItemRemoved {
                    library_id: library_id.to_string(),
                    item_id: item_id.clone(),
                }))
                .ok();
        }
    }
}

struct PassTwo {
    library_id: String,
    job: ScanJob,
    scheduler: BatchScheduler,
    targets: Vec<crate::reconciler::ExtractionTarget>,
    cancellation_token: CancellationToken,
    finished: CancellationToken,
    progress: watch::Sender<ScanProgress>,
    event_bus: Arc<EventBus>,
    jobs: Arc<RwLock<HashMap<String, ScanJob>>>,
}

async fn run_pass_two(pass: PassTwo) -> BatchRunReport {
    let PassTwo {
        library_id,
        job,
        scheduler,
        targets,
        cancellation_token,
        finished,
        progress,
        event_bus,
        jobs,
    } = pass;
    let _finished = finished.drop_guard();
    let started = Instant::now();

    let report = scheduler
        .run(targets, &cancellation_token, |completed, total| {
            progress.send_replace(ScanProgress { completed, total });
            event_bus
                .emit(CoreEvent::Scan(ScanEvent::Progress {
                    library_id: library_id.clone(),
                    completed,
                    total,
                }))
                .ok();
        })
        .await;

    let event = if report.cancelled {
        ScanEvent::Cancelled {
            library_id: library_id.clone(),
            completed: report.completed,
        }
    } else {
        info!(
            library_id = %library_id,
            extracted = report.extracted,
            failed = report.failed,
            "Scan completed"
        );
        ScanEvent::Completed {
            library_id: library_id.clone(),
            extracted: report.extracted,
            failed: report.failed,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    };

    let next = if report.cancelled {
        job.cancel(Some(report.clone()))
    } else {
        job.complete(report.clone())
    };
    match next {
        Ok(job) => {
            let mut jobs = jobs.write().await;
            // A newer scan may already have replaced this job.
            if jobs.get(&library_id).map(|j| j.id) == Some(job.id) {
                jobs.insert(library_id.clone(), job);
            }
        }
        Err(e) => warn!(library_id = %library_id, error = %e, "Could not finish scan job"),
    }

    event_bus.emit(CoreEvent::Scan(event)).ok();
    report
}
