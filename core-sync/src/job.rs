//! # Scan Job State Machine
//!
//! Tracks the lifecycle of one library scan with validated transitions.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Reconciling → Extracting → Completed
//!    │           │             ├─────→ Cancelled
//!    │           │             └─────→ Failed
//!    │           ├──────────→ Failed   (access grant, catalog unavailable)
//!    │           └──────────→ Cancelled
//!    └──→ Failed | Cancelled
//! ```
//!
//! Jobs live in memory only; the catalog itself is the durable record of what
//! a scan achieved.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let job = ScanJob::new(&library_id).start_reconciling()?;
//! let job = job.start_extracting(summary, queued)?;
//! let job = job.complete(report)?;
//! ```

use std::str::FromStr;

use core_async::time::now_secs;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reconciler::ReconcileSummary;
use crate::scheduler::BatchRunReport;
use crate::{Result, SyncError};

/// Unique identifier for a scan job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanJobId(Uuid);

impl ScanJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScanJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Created, access not yet resolved
    Pending,
    /// Pass 1 is walking the root
    Reconciling,
    /// Pass 2 is extracting metadata in batches
    Extracting,
    Completed,
    Cancelled,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Failed
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Reconciling => "reconciling",
            ScanStatus::Extracting => "extracting",
            ScanStatus::Completed => "completed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Failed => "failed",
        }
    }
}

impl FromStr for ScanStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ScanStatus::Pending),
            "reconciling" => Ok(ScanStatus::Reconciling),
            "extracting" => Ok(ScanStatus::Extracting),
            "completed" => Ok(ScanStatus::Completed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(SyncError::InvalidStateTransition {
                from: other.to_string(),
                to: "parse".to_string(),
                reason: "Unknown scan status".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Items processed by Pass 2 so far, out of the number queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub completed: u64,
    pub total: u64,
}

impl ScanProgress {
    pub fn new(total: u64) -> Self {
        Self {
            completed: 0,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanJob {
    pub id: ScanJobId,
    pub library_id: String,
    pub status: ScanStatus,
    /// Pass 1 counts, available from `Extracting` on
    pub summary: Option<ReconcileSummary>,
    pub progress: ScanProgress,
    /// Pass 2 outcome, set when the job completes or is cancelled mid-run
    pub report: Option<BatchRunReport>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl ScanJob {
    pub fn new(library_id: &str) -> Self {
        Self {
            id: ScanJobId::new(),
            library_id: library_id.to_string(),
            status: ScanStatus::Pending,
            summary: None,
            progress: ScanProgress::default(),
            report: None,
            error_message: None,
            created_at: now_secs() as i64,
            started_at: None,
            completed_at: None,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the job is not `Pending`
    pub fn start_reconciling(mut self) -> Result<Self> {
        self.validate_transition(ScanStatus::Reconciling)?;
        self.status = ScanStatus::Reconciling;
        self.started_at = Some(now_secs() as i64);
        Ok(self)
    }

    /// # Errors
    ///
    /// Returns an error if the job is not `Reconciling`
    pub fn start_extracting(mut self, summary: ReconcileSummary, queued: u64) -> Result<Self> {
        self.validate_transition(ScanStatus::Extracting)?;
        self.status = ScanStatus::Extracting;
        self.summary = Some(summary);
        self.progress = ScanProgress::new(queued);
        Ok(self)
    }

    pub fn complete(mut self, report: BatchRunReport) -> Result<Self> {
        self.validate_transition(ScanStatus::Completed)?;
        self.status = ScanStatus::Completed;
        self.progress = ScanProgress {
            completed: report.total,
            total: report.total,
        };
        self.report = Some(report);
        self.completed_at = Some(now_secs() as i64);
        Ok(self)
    }

    pub fn cancel(mut self, report: Option<BatchRunReport>) -> Result<Self> {
        self.validate_transition(ScanStatus::Cancelled)?;
        self.status = ScanStatus::Cancelled;
        if let Some(report) = &report {
            self.progress.completed = report.completed;
        }
        self.report = report;
        self.completed_at = Some(now_secs() as i64);
        Ok(self)
    }

    pub fn fail(mut self, error_message: String) -> Result<Self> {
        self.validate_transition(ScanStatus::Failed)?;
        self.status = ScanStatus::Failed;
        self.error_message = Some(error_message);
        self.completed_at = Some(now_secs() as i64);
        Ok(self)
    }

    fn validate_transition(&self, to: ScanStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (ScanStatus::Pending, ScanStatus::Reconciling) => true,
            (ScanStatus::Pending, ScanStatus::Failed) => true,
            (ScanStatus::Pending, ScanStatus::Cancelled) => true,

            (ScanStatus::Reconciling, ScanStatus::Extracting) => true,
            (ScanStatus::Reconciling, ScanStatus::Failed) => true,
            (ScanStatus::Reconciling, ScanStatus::Cancelled) => true,

            (ScanStatus::Extracting, ScanStatus::Completed) => true,
            (ScanStatus::Extracting, ScanStatus::Cancelled) => true,
            (ScanStatus::Extracting, ScanStatus::Failed) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}
