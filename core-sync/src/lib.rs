//! # Library Synchronization
//!
//! Keeps the catalog in step with the audiobook folders on disk.
//!
//! ## Overview
//!
//! A scan runs in two passes:
//!
//! - **Pass 1** (`reconciler`): walk the content root, create records for new
//!   files, delete records whose file is gone and queue changed items. The
//!   result is committed before the scan call returns.
//! - **Pass 2** (`scheduler`): extract metadata for queued items in fixed-size
//!   batches, committing once per batch. Cloud placeholders are downloaded
//!   first (`materializer`) or described from the search index, depending on
//!   the configured `RemotePolicy`.
//!
//! ## Components
//!
//! - **Sync Coordinator** (`coordinator`): Library management and scan orchestration
//! - **Scan Job State Machine** (`job`): Scan lifecycle with validated transitions
//! - **Remote Detector** (`remote`): Placeholder detection, recomputed on every call
//! - **Materializer** (`materializer`): Placeholder download with polled progress
//! - **Player Session** (`open`): Open-for-playback flow with on-demand download

pub mod coordinator;
pub mod error;
pub mod job;
pub mod materializer;
pub mod open;
pub mod reconciler;
pub mod remote;
pub mod scheduler;

pub use coordinator::{ScanHandle, SyncConfig, SyncCoordinator};
pub use error::{MaterializeError, Result, SyncError};
pub use job::{ScanJob, ScanJobId, ScanProgress, ScanStatus};
pub use materializer::Materializer;
pub use open::{OpenState, OpenStream, PlayerSession};
pub use reconciler::{ExtractionTarget, ReconcileOutcome, ReconcileSummary, Reconciler};
pub use remote::RemoteFileDetector;
pub use scheduler::{BatchRunReport, BatchScheduler, ExtractionWorker, ItemProcessor};
