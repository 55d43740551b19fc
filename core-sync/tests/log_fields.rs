//! Log entries mirrored to the host name files, never their full location

mod common;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_desktop::PathRootAccess;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::logger::{LogEntry, LogLevel, LoggerSink};
use common::*;
use core_library::CatalogStore;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_sync::OpenState;

#[derive(Default)]
struct RecordingSink {
    entries: StdMutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for RecordingSink {
    async fn log(&self, entry: LogEntry) -> BridgeResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Trace
    }
}

#[core_async::test]
async fn test_materialization_logs_file_name_only() {
    let sink = Arc::new(RecordingSink::default());
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Debug)
            .with_logger_sink(sink.clone()),
    )
    .unwrap();

    let h = harness(test_config(), Arc::new(PathRootAccess::new())).await;
    let remote = write_book(h.dir.path(), "shelf/remote.wav", Some("Remote"));
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();
    let item = h.store.fetch_items(&library.id).await.unwrap().remove(0);
    h.fs.evict(&remote);

    let states = h
        .coordinator
        .player_session()
        .open_item(&item.id)
        .await
        .unwrap()
        .collect()
        .await;
    assert!(matches!(states.last(), Some(OpenState::Playable { .. })));

    let materializing = |entries: &[LogEntry]| {
        entries
            .iter()
            .find(|e| e.message == "Materializing placeholder")
            .cloned()
    };
    let mut found = None;
    for _ in 0..100 {
        found = materializing(&sink.entries.lock().unwrap());
        if found.is_some() {
            break;
        }
        core_async::time::sleep(Duration::from_millis(10)).await;
    }
    let entry = found.expect("materialization was logged");
    assert_eq!(entry.fields.get("file"), Some(&"remote.wav".to_string()));

    let root = h.root().to_string_lossy().into_owned();
    let entries = sink.entries.lock().unwrap();
    for entry in entries.iter() {
        for (key, value) in &entry.fields {
            assert!(!value.contains(&root), "{key} leaks the library root: {value}");
        }
    }
}
