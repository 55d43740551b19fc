//! End-to-end scan tests against real temporary folders
//!
//! These tests verify:
//! - New files are catalogued by Pass 1 and extracted by Pass 2
//! - Reconciliation is idempotent and detects modified files
//! - Deleting a file removes exactly its record
//! - Stale access grants are renewed, or fail the scan before reconciling
//! - A new scan cancels and awaits the previous one
//! - Placeholders follow the configured remote policy

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bridge_desktop::{MemorySearchIndex, PathRootAccess};
use bridge_traits::IndexedMetadata;
use common::*;
use core_library::repositories::{MediaItemRepository, SqliteMediaItemRepository, UserState};
use core_library::{CatalogStore, ExtractionUpdate, LibraryError};
use core_metadata::MetadataExtractor;
use core_runtime::events::{CoreEvent, ScanEvent};
use core_runtime::RemotePolicy;
use core_sync::{ExtractionTarget, ItemProcessor, ScanProgress, ScanStatus, SyncError};

fn path_access() -> Arc<PathRootAccess> {
    Arc::new(PathRootAccess::new())
}

#[core_async::test]
async fn test_new_files_are_catalogued_then_extracted() {
    let h = harness(test_config(), path_access()).await;
    write_book(h.dir.path(), "Dune/part1.wav", Some("Dune, Part One"));
    write_book(h.dir.path(), "Dune/part2.wav", Some("Dune, Part Two"));
    write_book(h.dir.path(), "Hyperion.wav", None);

    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    let handle = h.coordinator.scan(&library.id).await.unwrap();

    assert_eq!(handle.summary.created, 3);
    assert_eq!(handle.summary.removed, 0);
    assert_eq!(handle.summary.total_found, 3);
    // Pass 1 is visible before Pass 2 finishes.
    assert_eq!(h.store.fetch_items(&library.id).await.unwrap().len(), 3);

    let progress = handle.progress.clone();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.extracted, 3);
    assert_eq!(*progress.borrow(), ScanProgress { completed: 3, total: 3 });

    let items = h.store.fetch_items(&library.id).await.unwrap();
    assert!(items.iter().all(|i| i.metadata_loaded && !i.title.is_empty()));
    assert!(items.iter().all(|i| i.duration > 0.0 && i.file_mod_time > 0));
    let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
    assert!(titles.contains(&"Dune, Part One"));
    assert!(titles.contains(&"Hyperion"));

    let job = h.coordinator.scan_status(&library.id).await.unwrap();
    assert_eq!(job.status, ScanStatus::Completed);
}

#[core_async::test]
async fn test_rescan_without_changes_is_idempotent() {
    let h = harness(test_config(), path_access()).await;
    write_book(h.dir.path(), "a.wav", Some("A"));
    write_book(h.dir.path(), "b.wav", Some("B"));
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();

    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();
    let second = h.coordinator.scan(&library.id).await.unwrap();

    assert_eq!(second.summary.created, 0);
    assert_eq!(second.summary.removed, 0);
    assert_eq!(second.summary.queued, 0);
    assert_eq!(second.summary.skipped, 2);
    assert_eq!(second.wait().await.unwrap().total, 0);
}

#[core_async::test]
async fn test_modified_file_is_requeued() {
    let h = harness(test_config(), path_access()).await;
    let touched = write_book(h.dir.path(), "a.wav", Some("A"));
    write_book(h.dir.path(), "b.wav", Some("B"));
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();

    let later = SystemTime::now() + Duration::from_secs(60);
    std::fs::File::options()
        .write(true)
        .open(&touched)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let handle = h.coordinator.scan(&library.id).await.unwrap();
    assert_eq!(handle.summary.queued, 1);
    assert_eq!(handle.summary.skipped, 1);
    handle.wait().await.unwrap();

    // Extraction stored the newer mtime, so the file is up to date again.
    let third = h.coordinator.scan(&library.id).await.unwrap();
    assert_eq!(third.summary.queued, 0);
}

#[core_async::test]
async fn test_deleted_file_removes_only_its_item() {
    let h = harness(test_config(), path_access()).await;
    let doomed = write_book(h.dir.path(), "gone.wav", Some("Gone"));
    write_book(h.dir.path(), "kept.wav", Some("Kept"));
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();

    let items = SqliteMediaItemRepository::new(h.store.pool().clone());
    let kept = h
        .store
        .fetch_items(&library.id)
        .await
        .unwrap()
        .into_iter()
        .find(|i| i.title == "Kept")
        .unwrap();
    let state = UserState {
        playback_position: 42.5,
        is_starred: true,
        rating: Some(4),
        ..UserState::from(&kept)
    };
    items.update_user_state(&kept.id, &state).await.unwrap();

    std::fs::remove_file(&doomed).unwrap();
    let handle = h.coordinator.scan(&library.id).await.unwrap();
    assert_eq!(handle.summary.removed, 1);
    assert_eq!(handle.summary.created, 0);

    let remaining = h.store.fetch_items(&library.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept.id);
    assert_eq!(remaining[0].playback_position, 42.5);
    assert!(remaining[0].is_starred);
    assert_eq!(remaining[0].rating, Some(4));
}

#[core_async::test]
async fn test_empty_root_removes_everything() {
    let h = harness(test_config(), path_access()).await;
    let a = write_book(h.dir.path(), "a.wav", None);
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();

    std::fs::remove_file(a).unwrap();
    let handle = h.coordinator.scan(&library.id).await.unwrap();
    assert_eq!(handle.summary.removed, 1);
    assert_eq!(handle.summary.created, 0);
    assert!(h.store.fetch_items(&library.id).await.unwrap().is_empty());
}

#[core_async::test]
async fn test_unreadable_file_stays_stale() {
    let h = harness(test_config(), path_access()).await;
    std::fs::write(h.dir.path().join("broken.mp3"), b"not audio").unwrap();
    write_book(h.dir.path(), "fine.wav", Some("Fine"));
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();

    let report = h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();
    assert_eq!(report.extracted, 1);
    assert_eq!(report.failed, 1);

    // Retried on the next scan, never poisoned.
    let again = h.coordinator.scan(&library.id).await.unwrap();
    assert_eq!(again.summary.queued, 1);
    assert_eq!(again.summary.skipped, 1);
}

#[core_async::test]
async fn test_stale_grant_is_renewed_and_persisted() {
    let access = Arc::new(FlakyAccess::new(1, false));
    let h = harness(test_config(), access.clone()).await;
    write_book(h.dir.path(), "a.wav", None);
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    let before = access.renewals.load(Ordering::SeqCst);

    let handle = h.coordinator.scan(&library.id).await.unwrap();
    assert_eq!(handle.summary.created, 1);
    assert_eq!(access.renewals.load(Ordering::SeqCst), before + 1);

    let stored = h.store.find_library(&library.id).await.unwrap().unwrap();
    assert!(stored.access_credential.is_some());
}

#[core_async::test]
async fn test_unrenewable_grant_fails_before_reconciling() {
    let h = harness(test_config(), path_access()).await;
    let gone = write_book(h.dir.path(), "a.wav", None);
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();

    // Same catalog, but the grant no longer resolves and cannot be renewed.
    let coordinator = core_sync::SyncCoordinator::new(
        test_config(),
        h.store.clone(),
        h.event_bus.clone(),
        h.fs.clone(),
        h.cloud.clone(),
        Arc::new(FlakyAccess::new(usize::MAX, true)),
        Arc::new(MetadataExtractor::new()),
    );
    let mut events = h.event_bus.subscribe();

    std::fs::remove_file(gone).unwrap();
    let err = coordinator.scan(&library.id).await.err().unwrap();
    assert!(matches!(err, SyncError::AccessStale { .. }));

    // Nothing was reconciled.
    assert_eq!(h.store.fetch_items(&library.id).await.unwrap().len(), 1);

    let job = coordinator.scan_status(&library.id).await.unwrap();
    assert_eq!(job.status, ScanStatus::Failed);

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Scan(ScanEvent::Failed { .. }) = event {
            saw_failed = true;
        }
        assert!(!matches!(event, CoreEvent::Scan(ScanEvent::Reconciled { .. })));
    }
    assert!(saw_failed);
}

#[core_async::test]
async fn test_unknown_library() {
    let h = harness(test_config(), path_access()).await;
    let err = h.coordinator.scan("missing").await.err().unwrap();
    assert!(matches!(err, SyncError::LibraryNotFound(_)));
}

/// Processor that takes its time, to keep Pass 2 running.
struct SlowProcessor;

#[async_trait]
impl ItemProcessor for SlowProcessor {
    async fn process(&self, target: &ExtractionTarget) -> Option<ExtractionUpdate> {
        core_async::time::sleep(Duration::from_millis(40)).await;
        Some(ExtractionUpdate {
            item_id: target.item_id.clone(),
            title: None,
            author: None,
            genre: None,
            year: None,
            duration: 1.0,
            cover_art: None,
            replace_cover: false,
            has_chapters: false,
            observed_mod_time: target.observed_mod_time,
        })
    }
}

#[core_async::test]
async fn test_new_scan_cancels_previous_pass_two() {
    let config = core_sync::SyncConfig {
        batch_size: 1,
        ..test_config()
    };
    let h = harness(config, path_access()).await;
    for i in 0..10 {
        write_book(h.dir.path(), &format!("{i:02}.wav"), None);
    }
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    let coordinator = h.coordinator.with_processor(Arc::new(SlowProcessor));

    let first = coordinator.scan(&library.id).await.unwrap();
    core_async::time::sleep(Duration::from_millis(60)).await;
    let second = coordinator.scan(&library.id).await.unwrap();

    let first_report = first.wait().await.unwrap();
    assert!(first_report.cancelled);
    assert!(first_report.completed < 10);

    // Whatever the first pass did not finish is queued again.
    assert_eq!(second.summary.queued, 10 - first_report.extracted);
    let second_report = second.wait().await.unwrap();
    assert!(!second_report.cancelled);

    let job = coordinator.scan_status(&library.id).await.unwrap();
    assert_eq!(job.status, ScanStatus::Completed);
}

#[core_async::test]
async fn test_cancel_scan_stops_at_batch_boundary() {
    let config = core_sync::SyncConfig {
        batch_size: 2,
        ..test_config()
    };
    let h = harness(config, path_access()).await;
    for i in 0..8 {
        write_book(h.dir.path(), &format!("{i}.wav"), None);
    }
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    let coordinator = h.coordinator.with_processor(Arc::new(SlowProcessor));

    let handle = coordinator.scan(&library.id).await.unwrap();
    core_async::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.cancel_scan(&library.id).await);

    let report = handle.wait().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.completed % 2, 0, "cancellation never splits a batch");

    let job = coordinator.scan_status(&library.id).await.unwrap();
    assert_eq!(job.status, ScanStatus::Cancelled);
    assert!(!coordinator.cancel_scan(&library.id).await);
}

#[core_async::test]
async fn test_placeholders_are_materialized_during_scan() {
    let h = harness(test_config(), path_access()).await;
    let remote = write_book(h.dir.path(), "remote.wav", Some("Remote Book"));
    h.fs.evict(&remote);
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();

    let report = h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();
    assert_eq!(report.extracted, 1);
    assert_eq!(h.cloud.requests.load(Ordering::SeqCst), 1);

    let item = &h.store.fetch_items(&library.id).await.unwrap()[0];
    assert_eq!(item.title, "Remote Book");
    assert!(!h.coordinator.is_remote_only(item));
}

#[core_async::test]
async fn test_index_only_policy_never_downloads() {
    let index = Arc::new(MemorySearchIndex::new());
    let config = core_sync::SyncConfig {
        remote_policy: RemotePolicy::IndexOnly,
        ..test_config()
    };
    let h = harness_with_extractor(
        config,
        path_access(),
        MetadataExtractor::new().with_search_index(index.clone()),
    )
    .await;

    let indexed = write_book(h.dir.path(), "indexed.wav", None);
    let unindexed = write_book(h.dir.path(), "unindexed.wav", None);
    h.fs.evict(&indexed);
    h.fs.evict(&unindexed);
    index
        .insert(
            indexed.clone(),
            IndexedMetadata {
                title: Some("From the Index".into()),
                duration_secs: Some(3600.0),
                ..Default::default()
            },
        )
        .await;

    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    let report = h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();

    assert_eq!(report.extracted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.cloud.requests.load(Ordering::SeqCst), 0);

    let items = h.store.fetch_items(&library.id).await.unwrap();
    let item = items.iter().find(|i| i.title == "From the Index").unwrap();
    assert_eq!(item.duration, 3600.0);
    assert!(item.cover_art.is_none());
    assert!(h.coordinator.is_remote_only(item));
}

#[core_async::test]
async fn test_library_management() {
    let h = harness(test_config(), path_access()).await;
    write_book(h.dir.path(), "a.wav", None);

    let library = h
        .coordinator
        .add_library(&h.root(), Some("Bedtime".into()))
        .await
        .unwrap();
    assert_eq!(library.label, "Bedtime");
    assert!(library.access_credential.is_some());

    let duplicate = h.coordinator.add_library(&h.root(), None).await;
    assert!(matches!(
        duplicate,
        Err(SyncError::Catalog(LibraryError::DuplicateRoot(_)))
    ));
    assert!(h
        .coordinator
        .add_library(std::path::Path::new("relative/books"), None)
        .await
        .is_err());

    h.coordinator.touch_library(&library.id).await.unwrap();
    let listed = h.coordinator.libraries().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].last_opened_at.is_some());

    h.coordinator.scan(&library.id).await.unwrap().wait().await.unwrap();
    assert!(h.coordinator.remove_library(&library.id).await.unwrap());
    assert!(h.coordinator.libraries().await.unwrap().is_empty());
    assert!(h.store.fetch_items(&library.id).await.unwrap().is_empty());
    assert!(h.dir.path().join("a.wav").exists(), "files are never touched");
    assert!(!h.coordinator.remove_library(&library.id).await.unwrap());
}

#[core_async::test]
async fn test_remove_library_waits_for_reconciliation_in_flight() {
    let h = harness(test_config(), Arc::new(SlowAccess::new(Duration::from_millis(80)))).await;
    write_book(h.dir.path(), "a.wav", None);
    write_book(h.dir.path(), "b.wav", None);
    let library = h.coordinator.add_library(&h.root(), None).await.unwrap();
    let store = h.store.clone();
    let coordinator = Arc::new(h.coordinator);

    let scanning = {
        let coordinator = coordinator.clone();
        let library_id = library.id.clone();
        core_async::spawn(async move { coordinator.scan(&library_id).await.map(|scan| scan.summary) })
    };
    core_async::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.remove_library(&library.id).await.unwrap());

    // The scan in flight finished Pass 1 against a library that still existed.
    let summary = scanning.await.unwrap().unwrap();
    assert_eq!(summary.created, 2);

    assert!(coordinator.libraries().await.unwrap().is_empty());
    assert!(store.fetch_items(&library.id).await.unwrap().is_empty());
    assert!(matches!(
        coordinator.scan(&library.id).await,
        Err(SyncError::LibraryNotFound(_))
    ));
}
