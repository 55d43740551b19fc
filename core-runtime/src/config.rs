//! # Core Configuration Module
//!
//! Configuration for the library synchronization engine.
//!
//! ## Overview
//!
//! A builder constructs a [`CoreConfig`] holding the catalog location, the
//! platform bridges and the scan tuning. Validation is fail-fast: a missing
//! bridge or an out-of-range timeout is reported when the config is built,
//! not when the first scan runs.
//!
//! ## Required Dependencies
//!
//! - `FileSystemAccess` - size, allocation and mtime of library files
//! - `CloudMaterializer` - downloads cloud placeholders
//! - `RootAccess` - resolves and renews folder grants
//!
//! With the `desktop-shims` feature these default to the `bridge-desktop`
//! implementations when not provided.
//!
//! ## Optional Dependencies
//!
//! - `SearchIndex` - metadata fallback for files that cannot be decoded;
//!   without it the fallback is disabled
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RemotePolicy, ScanTuning};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .scan_tuning(
//!         ScanTuning::default()
//!             .with_extraction_timeout(Duration::from_secs(10))
//!             .with_remote_policy(RemotePolicy::IndexOnly),
//!     )
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use bridge_traits::{CloudMaterializer, FileSystemAccess, RootAccess, SearchIndex};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// File extensions (lowercase, without dot) recognized as audio content.
pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "m4b", "aac", "flac", "ogg", "oga", "opus", "wav", "aiff", "aif", "wma",
];

/// How bulk scans treat cloud placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemotePolicy {
    /// Download placeholders before extracting their metadata.
    #[default]
    Materialize,
    /// Never download during a scan; rely on the search index fallback.
    /// Placeholders are downloaded when opened for playback.
    IndexOnly,
}

/// Tuning knobs for reconciliation and batch extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTuning {
    /// Items extracted concurrently and committed together.
    pub batch_size: usize,
    /// Upper bound for extracting one item's metadata.
    pub extraction_timeout: Duration,
    /// Upper bound for downloading one placeholder.
    pub materialize_timeout: Duration,
    /// How often download progress is sampled.
    pub progress_poll_interval: Duration,
    /// Pause between batches so the host stays responsive.
    pub inter_batch_yield: Duration,
    pub remote_policy: RemotePolicy,
    /// Read embedded cover art during extraction.
    pub extract_cover_art: bool,
    /// Recognized audio extensions (lowercase, without dot).
    pub audio_extensions: Vec<String>,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            batch_size: 5,
            extraction_timeout: Duration::from_secs(20),
            materialize_timeout: Duration::from_secs(300),
            progress_poll_interval: Duration::from_secs(1),
            inter_batch_yield: Duration::from_millis(25),
            remote_policy: RemotePolicy::default(),
            extract_cover_art: true,
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl ScanTuning {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn with_materialize_timeout(mut self, timeout: Duration) -> Self {
        self.materialize_timeout = timeout;
        self
    }

    pub fn with_progress_poll_interval(mut self, interval: Duration) -> Self {
        self.progress_poll_interval = interval;
        self
    }

    pub fn with_inter_batch_yield(mut self, pause: Duration) -> Self {
        self.inter_batch_yield = pause;
        self
    }

    pub fn with_remote_policy(mut self, policy: RemotePolicy) -> Self {
        self.remote_policy = policy;
        self
    }

    pub fn with_cover_art(mut self, extract: bool) -> Self {
        self.extract_cover_art = extract;
        self
    }

    /// Replaces the recognized extensions. Leading dots and case are
    /// normalized.
    pub fn with_audio_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.audio_extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Validates ranges.
    ///
    /// # Errors
    ///
    /// `Error::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 64 {
            return Err(Error::Config(
                "Batch size must be between 1 and 64".to_string(),
            ));
        }

        if self.extraction_timeout.is_zero() {
            return Err(Error::Config(
                "Extraction timeout must be greater than zero".to_string(),
            ));
        }

        if self.materialize_timeout < self.extraction_timeout {
            return Err(Error::Config(
                "Materialization timeout must not be shorter than the extraction timeout"
                    .to_string(),
            ));
        }

        if self.progress_poll_interval.is_zero()
            || self.progress_poll_interval > self.materialize_timeout
        {
            return Err(Error::Config(
                "Progress poll interval must be non-zero and within the materialization timeout"
                    .to_string(),
            ));
        }

        if self.audio_extensions.iter().all(|ext| ext.is_empty()) {
            return Err(Error::Config(
                "At least one audio extension is required".to_string(),
            ));
        }

        Ok(())
    }
}

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite catalog
    pub database_path: PathBuf,

    pub file_system: Arc<dyn FileSystemAccess>,
    pub cloud_materializer: Arc<dyn CloudMaterializer>,
    pub root_access: Arc<dyn RootAccess>,

    /// Metadata fallback; `None` disables it
    pub search_index: Option<Arc<dyn SearchIndex>>,

    pub scan: ScanTuning,

    /// Installed by the service at bootstrap when present
    pub logging: Option<LoggingConfig>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("cloud_materializer", &"CloudMaterializer { ... }")
            .field("root_access", &"RootAccess { ... }")
            .field(
                "search_index",
                &self.search_index.as_ref().map(|_| "SearchIndex { ... }"),
            )
            .field("scan", &self.scan)
            .field("logging", &self.logging)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        self.scan.validate()
    }
}

#[cfg(feature = "desktop-shims")]
mod defaults {
    use super::*;
    use bridge_desktop::{PathRootAccess, ReadThroughMaterializer, TokioFileSystem};

    pub(super) fn file_system() -> Result<Arc<dyn FileSystemAccess>> {
        Ok(Arc::new(TokioFileSystem::new()))
    }

    pub(super) fn cloud_materializer() -> Result<Arc<dyn CloudMaterializer>> {
        Ok(Arc::new(ReadThroughMaterializer::new()))
    }

    pub(super) fn root_access() -> Result<Arc<dyn RootAccess>> {
        Ok(Arc::new(PathRootAccess::new()))
    }
}

#[cfg(not(feature = "desktop-shims"))]
mod defaults {
    use super::*;

    fn capability_missing(capability: &str, purpose: &str) -> Error {
        Error::CapabilityMissing {
            capability: capability.to_string(),
            message: format!(
                "{capability} implementation is required {purpose}. \
                 Desktop: enable the 'desktop-shims' feature to use the bridge-desktop default. \
                 Mobile: inject the platform adapter."
            ),
        }
    }

    pub(super) fn file_system() -> Result<Arc<dyn FileSystemAccess>> {
        Err(capability_missing(
            "FileSystemAccess",
            "to stat library files",
        ))
    }

    pub(super) fn cloud_materializer() -> Result<Arc<dyn CloudMaterializer>> {
        Err(capability_missing(
            "CloudMaterializer",
            "to download cloud placeholders",
        ))
    }

    pub(super) fn root_access() -> Result<Arc<dyn RootAccess>> {
        Err(capability_missing(
            "RootAccess",
            "to resolve library folder grants",
        ))
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    cloud_materializer: Option<Arc<dyn CloudMaterializer>>,
    root_access: Option<Arc<dyn RootAccess>>,
    search_index: Option<Arc<dyn SearchIndex>>,
    scan: Option<ScanTuning>,
    logging: Option<LoggingConfig>,
}

impl CoreConfigBuilder {
    /// Sets the catalog database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/path/to/library.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn cloud_materializer(mut self, materializer: Arc<dyn CloudMaterializer>) -> Self {
        self.cloud_materializer = Some(materializer);
        self
    }

    pub fn root_access(mut self, access: Arc<dyn RootAccess>) -> Self {
        self.root_access = Some(access);
        self
    }

    /// Enables the metadata fallback for files that cannot be decoded.
    pub fn search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search_index = Some(index);
        self
    }

    pub fn scan_tuning(mut self, tuning: ScanTuning) -> Self {
        self.scan = Some(tuning);
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when the database path is missing or tuning is out
    ///   of range
    /// - `Error::CapabilityMissing` when a required bridge is absent and no
    ///   platform default is compiled in
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => defaults::file_system()?,
        };
        let cloud_materializer = match self.cloud_materializer {
            Some(materializer) => materializer,
            None => defaults::cloud_materializer()?,
        };
        let root_access = match self.root_access {
            Some(access) => access,
            None => defaults::root_access()?,
        };

        let config = CoreConfig {
            database_path,
            file_system,
            cloud_materializer,
            root_access,
            search_index: self.search_index,
            scan: self.scan.unwrap_or_default(),
            logging: self.logging,
        };

        config.validate()?;

        Ok(config)
    }
}
