//! Shared fixtures for the scan and open integration tests.
//!
//! Audio files are synthesized PCM WAV files. Cloud placeholders are
//! simulated by [`CloudFs`], which reports zero allocated bytes for evicted
//! paths while the real bytes stay on disk for the extractor.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_desktop::{PathRootAccess, TokioFileSystem};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::storage::{FileStat, FileSystemAccess};
use bridge_traits::{AccessStatus, CloudMaterializer, RootAccess};
use core_async::sync::CancellationToken;
use core_library::{create_test_pool, SqliteCatalogStore};
use core_metadata::MetadataExtractor;
use core_runtime::events::EventBus;
use core_sync::{SyncConfig, SyncCoordinator};
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 8_000;

fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// Mono 16-bit PCM WAV of `seconds` of silence titled `title`.
pub fn wav_bytes(seconds: u32, title: Option<&str>) -> Vec<u8> {
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    fmt.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());

    let mut body = b"WAVE".to_vec();
    body.extend(chunk(b"fmt ", &fmt));
    if let Some(title) = title {
        let mut text = title.as_bytes().to_vec();
        text.push(0);
        let mut list = b"INFO".to_vec();
        list.extend(chunk(b"INAM", &text));
        body.extend(chunk(b"LIST", &list));
    }
    body.extend(chunk(b"data", &vec![0u8; (SAMPLE_RATE * 2 * seconds) as usize]));

    let mut file = b"RIFF".to_vec();
    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend(body);
    file
}

pub fn write_book(root: &Path, relative: &str, title: Option<&str>) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, wav_bytes(1, title)).unwrap();
    path
}

/// Real file system with simulated eviction.
#[derive(Default)]
pub struct CloudFs {
    inner: TokioFileSystem,
    /// Allocated bytes reported for evicted paths (0 = fully remote)
    evicted: StdMutex<HashMap<PathBuf, u64>>,
}

impl CloudFs {
    pub fn evict(&self, path: &Path) {
        self.evicted.lock().unwrap().insert(path.to_path_buf(), 0);
    }

    pub fn set_resident_bytes(&self, path: &Path, bytes: u64) {
        self.evicted.lock().unwrap().insert(path.to_path_buf(), bytes);
    }

    pub fn hydrate(&self, path: &Path) {
        self.evicted.lock().unwrap().remove(path);
    }
}

impl FileSystemAccess for CloudFs {
    fn stat(&self, path: &Path) -> BridgeResult<FileStat> {
        let mut stat = self.inner.stat(path)?;
        if let Some(resident) = self.evicted.lock().unwrap().get(path) {
            stat.allocated_bytes = *resident;
        }
        Ok(stat)
    }

    fn data_directory(&self) -> BridgeResult<PathBuf> {
        self.inner.data_directory()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudMode {
    /// Hydrate in two steps of `step` each
    Download { step: Duration },
    /// Wait for cancellation
    Hang,
    Fail,
    /// The sync client aborts the download on its own
    Aborted,
}

/// Sync client driving [`CloudFs`] residency.
pub struct FakeCloud {
    pub fs: Arc<CloudFs>,
    pub mode: StdMutex<CloudMode>,
    pub requests: AtomicUsize,
    pub cancelled: AtomicUsize,
}

impl FakeCloud {
    pub fn new(fs: Arc<CloudFs>, mode: CloudMode) -> Self {
        Self {
            fs,
            mode: StdMutex::new(mode),
            requests: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: CloudMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl CloudMaterializer for FakeCloud {
    async fn request_download(&self, path: &Path, cancel: CancellationToken) -> BridgeResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            CloudMode::Download { step } => {
                let size = self.fs.inner.stat(path)?.size;
                core_async::time::sleep(step).await;
                self.fs.set_resident_bytes(path, size / 2);
                core_async::time::sleep(step).await;
                self.fs.hydrate(path);
                Ok(())
            }
            CloudMode::Hang => {
                cancel.cancelled().await;
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::Cancelled)
            }
            CloudMode::Fail => Err(BridgeError::OperationFailed("offline".into())),
            CloudMode::Aborted => Err(BridgeError::Cancelled),
        }
    }
}

/// Root access whose grants stay stale for the first `stale_resolutions`
/// resolutions, optionally refusing renewal.
pub struct FlakyAccess {
    pub stale_resolutions: AtomicUsize,
    pub refuse_renewal: bool,
    pub renewals: AtomicUsize,
    inner: PathRootAccess,
}

impl FlakyAccess {
    pub fn new(stale_resolutions: usize, refuse_renewal: bool) -> Self {
        Self {
            stale_resolutions: AtomicUsize::new(stale_resolutions),
            refuse_renewal,
            renewals: AtomicUsize::new(0),
            inner: PathRootAccess::new(),
        }
    }
}

#[async_trait]
impl RootAccess for FlakyAccess {
    async fn resolve_access(&self, root: &Path, credential: Option<&[u8]>) -> BridgeResult<AccessStatus> {
        let remaining = self.stale_resolutions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.stale_resolutions.store(remaining - 1, Ordering::SeqCst);
            return Ok(AccessStatus::Stale);
        }
        self.inner.resolve_access(root, credential).await
    }

    async fn renew_access(&self, root: &Path) -> BridgeResult<Vec<u8>> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.refuse_renewal {
            return Err(BridgeError::AccessDenied(root.to_path_buf()));
        }
        self.inner.renew_access(root).await
    }
}

/// Desktop root access that takes `delay` to resolve every grant.
pub struct SlowAccess {
    pub delay: Duration,
    inner: PathRootAccess,
}

impl SlowAccess {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: PathRootAccess::new(),
        }
    }
}

#[async_trait]
impl RootAccess for SlowAccess {
    async fn resolve_access(&self, root: &Path, credential: Option<&[u8]>) -> BridgeResult<AccessStatus> {
        core_async::time::sleep(self.delay).await;
        self.inner.resolve_access(root, credential).await
    }

    async fn renew_access(&self, root: &Path) -> BridgeResult<Vec<u8>> {
        self.inner.renew_access(root).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SqliteCatalogStore>,
    pub fs: Arc<CloudFs>,
    pub cloud: Arc<FakeCloud>,
    pub event_bus: Arc<EventBus>,
    pub coordinator: SyncCoordinator,
}

impl Harness {
    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        batch_size: 5,
        extraction_timeout: Duration::from_secs(5),
        materialize_timeout: Duration::from_secs(5),
        progress_poll_interval: Duration::from_millis(5),
        inter_batch_yield: Duration::from_millis(1),
        ..SyncConfig::default()
    }
}

pub async fn harness(config: SyncConfig, access: Arc<dyn RootAccess>) -> Harness {
    harness_with_extractor(config, access, MetadataExtractor::new()).await
}

pub async fn harness_with_extractor(
    config: SyncConfig,
    access: Arc<dyn RootAccess>,
    extractor: MetadataExtractor,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteCatalogStore::new(create_test_pool().await.unwrap()));
    let fs = Arc::new(CloudFs::default());
    let cloud = Arc::new(FakeCloud::new(
        fs.clone(),
        CloudMode::Download {
            step: Duration::from_millis(20),
        },
    ));
    let event_bus = Arc::new(EventBus::new(1024));

    let coordinator = SyncCoordinator::new(
        config,
        store.clone(),
        event_bus.clone(),
        fs.clone(),
        cloud.clone(),
        access,
        Arc::new(extractor),
    );

    Harness {
        dir,
        store,
        fs,
        cloud,
        event_bus,
        coordinator,
    }
}
