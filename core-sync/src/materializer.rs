//! # Placeholder Materialization
//!
//! Downloads the bytes of a cloud placeholder and reports progress while
//! doing so.
//!
//! ## Overview
//!
//! Two producers run side by side and feed one channel:
//!
//! - the platform request ([`CloudMaterializer::request_download`]), which
//!   resolves when the sync client says the file is resident;
//! - a poller that samples allocated bytes every `poll_interval` and reports
//!   a progress fraction.
//!
//! Whichever terminal signal arrives first decides the outcome: the request
//! resolving, or the poller observing the full size resident. Progress is
//! clamped to `[0, 1]` and never goes backwards. When the timeout elapses the
//! request's cancellation token is fired so the platform stops the transfer.
//!
//! ## Usage
//!
//! ```ignore
//! let materializer = Materializer::new(cloud, fs, Duration::from_secs(1));
//! materializer
//!     .materialize_with_progress(path, Duration::from_secs(300), &cancel, |p| {
//!         println!("{:.0}%", p * 100.0)
//!     })
//!     .await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{CloudMaterializer, FileSystemAccess};
use core_async::race::{deadline_or_cancel, Outcome};
use core_async::sync::{mpsc, CancellationToken};
use core_async::task::{self, JoinHandle};
use core_async::time::{interval, Duration, MissedTickBehavior};
use core_runtime::logging::strip_path;
use tracing::{debug, info, warn};

use crate::error::MaterializeError;

enum Signal {
    Progress(f64),
    Resident,
    Finished(BridgeResult<()>),
}

/// Makes placeholder files resident.
#[derive(Clone)]
pub struct Materializer {
    cloud: Arc<dyn CloudMaterializer>,
    fs: Arc<dyn FileSystemAccess>,
    poll_interval: Duration,
}

impl Materializer {
    pub fn new(
        cloud: Arc<dyn CloudMaterializer>,
        fs: Arc<dyn FileSystemAccess>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cloud,
            fs,
            poll_interval,
        }
    }

    /// Download `path` without progress reporting.
    pub async fn materialize(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> Result<(), MaterializeError> {
        self.materialize_with_progress(path, timeout, &CancellationToken::new(), |_| {})
            .await
    }

    /// Download `path`, calling `on_progress` with each new (higher) fraction.
    ///
    /// A file that is already resident returns immediately after reporting
    /// `1.0`. Cancelling `cancel` cancels the platform request as well.
    ///
    /// # Errors
    ///
    /// - [`MaterializeError::TimedOut`] when `timeout` elapses first
    /// - [`MaterializeError::Cancelled`] when `cancel` fires or the platform
    ///   reports cancellation
    /// - [`MaterializeError::NotFound`] / [`MaterializeError::Platform`] for
    ///   platform failures
    pub async fn materialize_with_progress<F>(
        &self,
        path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<(), MaterializeError>
    where
        F: FnMut(f64) + Send,
    {
        if !self.fs.stat(path)?.is_placeholder() {
            on_progress(1.0);
            return Ok(());
        }

        info!(file = %strip_path(&path), timeout_ms = timeout.as_millis() as u64, "Materializing placeholder");

        let request_token = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.spawn_request(path.to_path_buf(), request_token.clone(), tx.clone());
        let poller = self.spawn_poller(path.to_path_buf(), tx);

        let consume = async move {
            let mut progress = 0.0_f64;
            while let Some(signal) = rx.recv().await {
                match signal {
                    Signal::Progress(fraction) => {
                        if fraction > progress {
                            progress = fraction;
                            on_progress(progress);
                        }
                    }
                    Signal::Resident | Signal::Finished(Ok(())) => {
                        if progress < 1.0 {
                            on_progress(1.0);
                        }
                        return Ok(());
                    }
                    Signal::Finished(Err(e)) => return Err(MaterializeError::from(e)),
                }
            }
            Err(MaterializeError::Platform(
                "download ended without a result".to_string(),
            ))
        };

        let result = match deadline_or_cancel(timeout, cancel, consume).await {
            Outcome::Completed(result) => result,
            Outcome::TimedOut => {
                warn!(file = %strip_path(&path), "Materialization timed out, cancelling download");
                request_token.cancel();
                Err(MaterializeError::TimedOut(timeout))
            }
            Outcome::Cancelled => {
                debug!(file = %strip_path(&path), "Materialization cancelled");
                request_token.cancel();
                Err(MaterializeError::Cancelled)
            }
        };

        poller.abort();
        result
    }

    fn spawn_request(
        &self,
        path: PathBuf,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<Signal>,
    ) {
        // Detached: after a timeout or cancellation the request is stopped
        // through its token, never by aborting the task.
        let cloud = self.cloud.clone();
        task::spawn(async move {
            let result = cloud.request_download(&path, token).await;
            tx.send(Signal::Finished(result)).ok();
        });
    }

    fn spawn_poller(&self, path: PathBuf, tx: mpsc::UnboundedSender<Signal>) -> JoinHandle<()> {
        let fs = self.fs.clone();
        let period = self.poll_interval;
        task::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stat = match fs.stat(&path) {
                    Ok(stat) => stat,
                    Err(e) => {
                        debug!(file = %strip_path(&path), error = %e, "Progress poll failed");
                        continue;
                    }
                };

                let fraction = stat.resident_fraction();
                if tx.send(Signal::Progress(fraction)).is_err() {
                    break;
                }
                if !stat.is_placeholder() && fraction >= 1.0 {
                    tx.send(Signal::Resident).ok();
                    break;
                }
            }
        })
    }
}
