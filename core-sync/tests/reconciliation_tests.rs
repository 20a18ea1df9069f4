//! Reconciliation against an in-memory media source.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bridge_traits::background::ProgressReporter;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::media_source::{
    ColumnValue, IdFilter, MediaColumn, MediaQuery, MediaRow, MediaSource,
};
use core_async::sync::{CancellationToken, Notify};
use core_async::time::{sleep, Duration};
use core_library::models::{MediaRecord, SyncTaskKind};
use core_library::repositories::{MediaRepository, SqliteMediaRepository};
use core_library::create_test_pool;
use core_runtime::events::{CoreEvent, EventBus, IndexEvent};
use core_sync::{ReconciliationEngine, ResyncKind, SyncError, SyncTaskQueue};

#[derive(Default)]
struct FakeSource {
    rows: Mutex<BTreeMap<i64, MediaRow>>,
    unavailable: AtomicBool,
    /// Ids whose full-metadata query fails.
    broken: Mutex<HashSet<i64>>,
    /// When set, every query waits for a notification first.
    gate: Option<Arc<Notify>>,
}

impl FakeSource {
    fn with_ids(ids: &[i64]) -> Self {
        let source = Self::default();
        for id in ids {
            source.put(*id, 100);
        }
        source
    }

    fn gated(ids: &[i64], gate: Arc<Notify>) -> Self {
        let mut source = Self::with_ids(ids);
        source.gate = Some(gate);
        source
    }

    fn put(&self, id: i64, date_modified: i64) {
        self.rows.lock().unwrap().insert(
            id,
            MediaRow {
                id,
                path: Some(format!("/sdcard/DCIM/IMG_{}.jpg", id)),
                display_name: Some(format!("IMG_{}.jpg", id)),
                mime_type: Some("image/jpeg".to_string()),
                date_taken: Some(50),
                date_modified: Some(date_modified),
                size: Some(1000 + id),
                favourite: Some(false),
                trashed: Some(false),
            },
        );
    }

    fn edit(&self, id: i64, change: impl FnOnce(&mut MediaRow)) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            change(row);
        }
    }

    fn remove(&self, id: i64) {
        self.rows.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn query(
        &self,
        query: &MediaQuery,
        cancel: &CancellationToken,
    ) -> BridgeResult<Option<Vec<MediaRow>>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.unavailable.load(Ordering::SeqCst) || cancel.is_cancelled() {
            return Ok(None);
        }
        if query.requests(MediaColumn::Path) {
            if let IdFilter::Ids(ids) = &query.ids {
                let broken = self.broken.lock().unwrap();
                if ids.iter().any(|id| broken.contains(id)) {
                    return Err(BridgeError::OperationFailed("cursor window full".into()));
                }
            }
        }
        let rows = self.rows.lock().unwrap();
        Ok(Some(
            rows.values()
                .filter(|row| query.matches(row.id, row.trashed.unwrap_or(false)))
                .map(|row| row.project(query))
                .collect(),
        ))
    }

    async fn update(&self, id: i64, values: &[ColumnValue]) -> BridgeResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) => {
                row.apply(values);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert(&self, _values: &[ColumnValue]) -> BridgeResult<Option<i64>> {
        Ok(None)
    }

    async fn delete(&self, id: i64) -> BridgeResult<u64> {
        Ok(self.rows.lock().unwrap().remove(&id).map_or(0, |_| 1))
    }
}

struct Harness {
    engine: Arc<ReconciliationEngine>,
    media: Arc<SqliteMediaRepository>,
    tasks: Arc<SyncTaskQueue>,
    event_bus: EventBus,
}

async fn harness(source: Arc<FakeSource>, chunk_size: usize) -> Harness {
    let pool = create_test_pool().await.unwrap();
    let media = Arc::new(SqliteMediaRepository::new(pool.clone()));
    let tasks = Arc::new(SyncTaskQueue::new(pool));
    let event_bus = EventBus::new(1024);
    let engine = ReconciliationEngine::new(source, media.clone(), event_bus.clone(), chunk_size)
        .with_task_queue(tasks.clone());
    Harness {
        engine: Arc::new(engine),
        media,
        tasks,
        event_bus,
    }
}

async fn sorted_ids(media: &SqliteMediaRepository) -> Vec<i64> {
    let mut ids = media.all_ids().await.unwrap();
    ids.sort_unstable();
    ids
}

#[core_async::test]
async fn test_full_resync_fills_empty_index() {
    let h = harness(Arc::new(FakeSource::with_ids(&[1, 2, 3])), 500).await;
    let progress = ProgressReporter::detached();

    let report = h
        .engine
        .full_resync(&CancellationToken::new(), &progress)
        .await
        .unwrap();

    assert_eq!(report.added, 3);
    assert_eq!(report.removed, 0);
    assert_eq!(sorted_ids(&h.media).await, vec![1, 2, 3]);
    let last = progress.current();
    assert_eq!(last.fraction, 1.0);
    assert_eq!(last.item_count, 3);

    let stored = h.media.find_by_id(2).await.unwrap().unwrap();
    assert_eq!(stored.display_name, "IMG_2.jpg");
    assert_eq!(stored.size, 1002);
    assert_eq!(stored.parent_path, "/sdcard/DCIM");
}

#[core_async::test]
async fn test_full_resync_applies_additions_and_removals() {
    let h = harness(Arc::new(FakeSource::with_ids(&[2, 3])), 500).await;
    let mut vanished = MediaRecord::new(1, "/sdcard/DCIM/IMG_1.jpg", "image/jpeg");
    vanished.size = 1001;
    h.media
        .upsert_chunk(&[
            vanished,
            MediaRecord::new(2, "/sdcard/DCIM/IMG_2.jpg", "image/jpeg"),
        ])
        .await
        .unwrap();

    let report = h
        .engine
        .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
        .await
        .unwrap();

    assert_eq!((report.added, report.removed), (1, 1));
    assert_eq!(sorted_ids(&h.media).await, vec![2, 3]);

    let task = h.tasks.dequeue().await.unwrap().unwrap();
    assert_eq!(task.kind, SyncTaskKind::Delete);
    assert_eq!(task.item_ids, vec!["IMG_1.jpg-1001".to_string()]);
}

#[core_async::test]
async fn test_second_full_resync_writes_nothing() {
    let h = harness(Arc::new(FakeSource::with_ids(&[1, 2, 3, 4])), 3).await;
    let cancel = CancellationToken::new();
    let progress = ProgressReporter::detached();

    h.engine.full_resync(&cancel, &progress).await.unwrap();
    let again = h.engine.full_resync(&cancel, &progress).await.unwrap();

    assert_eq!(again.writes(), 0);
    assert_eq!(again.skipped, 0);
    assert_eq!(progress.current().fraction, 1.0);
    assert_eq!(h.tasks.stats().await.unwrap().pending(), 0);
}

#[core_async::test]
async fn test_progress_events_are_monotonic() {
    let ids: Vec<i64> = (1..=11).collect();
    let h = harness(Arc::new(FakeSource::with_ids(&ids)), 4).await;
    let mut rx = h.event_bus.subscribe();

    h.engine
        .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
        .await
        .unwrap();

    let mut fractions = Vec::new();
    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            CoreEvent::Index(IndexEvent::ResyncProgress { fraction, .. }) => {
                fractions.push(fraction)
            }
            CoreEvent::Index(IndexEvent::ResyncCompleted { added, .. }) => {
                assert_eq!(added, 11);
                completed = true;
            }
            _ => {}
        }
    }

    assert_eq!(fractions.len(), 3);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{:?}", fractions);
    assert_eq!(*fractions.last().unwrap(), 1.0);
    assert!(completed);
}

#[core_async::test]
async fn test_unreadable_item_is_skipped_and_picked_up_later() {
    let source = Arc::new(FakeSource::with_ids(&[1, 2, 3]));
    source.broken.lock().unwrap().insert(2);
    let h = harness(source.clone(), 500).await;

    let report = h
        .engine
        .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
        .await
        .unwrap();
    assert_eq!((report.added, report.skipped), (2, 1));
    assert_eq!(sorted_ids(&h.media).await, vec![1, 3]);

    source.broken.lock().unwrap().clear();
    let report = h
        .engine
        .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
        .await
        .unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(sorted_ids(&h.media).await, vec![1, 2, 3]);
}

#[core_async::test]
async fn test_rows_the_index_rejects_are_skipped() {
    let source = Arc::new(FakeSource::with_ids(&[1, 2, 3, 4]));
    source.edit(2, |row| row.size = Some(-1));
    source.edit(3, |row| row.path = Some("   ".into()));
    let h = harness(source.clone(), 2).await;
    let cancel = CancellationToken::new();
    let progress = ProgressReporter::detached();

    let report = h.engine.full_resync(&cancel, &progress).await.unwrap();
    assert_eq!((report.added, report.skipped), (2, 2));
    assert_eq!(sorted_ids(&h.media).await, vec![1, 4]);
    assert_eq!(progress.current().fraction, 1.0);

    let again = h.engine.full_resync(&cancel, &progress).await.unwrap();
    assert_eq!(again.writes(), 0);
    assert_eq!(again.skipped, 2);

    source.edit(2, |row| row.size = Some(2048));
    source.edit(3, |row| row.path = Some("/sdcard/DCIM/IMG_3.jpg".into()));
    let healed = h.engine.full_resync(&cancel, &progress).await.unwrap();
    assert_eq!(healed.added, 2);
    assert_eq!(sorted_ids(&h.media).await, vec![1, 2, 3, 4]);
    assert_eq!(h.engine.full_resync(&cancel, &progress).await.unwrap().writes(), 0);
}

#[core_async::test]
async fn test_new_id_reusing_a_removed_path_replaces_the_row() {
    let source = Arc::new(FakeSource::with_ids(&[1, 2]));
    let h = harness(source.clone(), 500).await;
    let cancel = CancellationToken::new();
    let progress = ProgressReporter::detached();
    h.engine.full_resync(&cancel, &progress).await.unwrap();

    // The platform re-registered IMG_1.jpg under a fresh id.
    source.put(7, 100);
    source.edit(7, |row| {
        row.path = Some("/sdcard/DCIM/IMG_1.jpg".into());
        row.display_name = Some("IMG_1.jpg".into());
    });
    source.remove(1);

    let report = h.engine.full_resync(&cancel, &progress).await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(sorted_ids(&h.media).await, vec![2, 7]);
    let stored = h.media.find_by_path("/sdcard/DCIM/IMG_1.jpg").await.unwrap().unwrap();
    assert_eq!(stored.id, 7);

    let task = h.tasks.dequeue().await.unwrap().unwrap();
    assert_eq!(task.kind, SyncTaskKind::Delete);
    assert_eq!(task.item_ids, vec!["IMG_1.jpg-1001".to_string()]);

    assert_eq!(h.engine.full_resync(&cancel, &progress).await.unwrap().writes(), 0);
}

#[core_async::test]
async fn test_unavailable_source_leaves_index_untouched() {
    let source = Arc::new(FakeSource::default());
    source.unavailable.store(true, Ordering::SeqCst);
    let h = harness(source, 500).await;
    h.media
        .upsert_chunk(&[MediaRecord::new(9, "/sdcard/a.jpg", "image/jpeg")])
        .await
        .unwrap();
    let mut rx = h.event_bus.subscribe();

    let report = h
        .engine
        .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
        .await
        .unwrap();

    assert!(!report.source_available);
    assert_eq!(report.writes(), 0);
    assert_eq!(sorted_ids(&h.media).await, vec![9]);

    let mut saw_unavailable = false;
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Index(IndexEvent::SourceUnavailable { kind }) = event {
            assert_eq!(kind, "full");
            saw_unavailable = true;
        }
    }
    assert!(saw_unavailable);
}

#[core_async::test]
async fn test_incremental_resync_detects_changes() {
    let source = Arc::new(FakeSource::with_ids(&[1, 2, 3]));
    let h = harness(source.clone(), 500).await;
    let cancel = CancellationToken::new();
    h.engine
        .full_resync(&cancel, &ProgressReporter::detached())
        .await
        .unwrap();

    source.put(2, 200);
    source.put(4, 100);
    source.remove(1);

    let report = h
        .engine
        .incremental_resync(&cancel, &ProgressReporter::detached())
        .await
        .unwrap();
    assert_eq!(report.kind, ResyncKind::Incremental);
    assert_eq!(
        (report.added, report.updated, report.removed),
        (1, 1, 1)
    );
    assert_eq!(sorted_ids(&h.media).await, vec![2, 3, 4]);
    assert_eq!(h.media.find_by_id(2).await.unwrap().unwrap().date_modified, 200);

    let kinds: Vec<(SyncTaskKind, Vec<String>)> = h
        .tasks
        .waiting()
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.kind, t.item_ids))
        .collect();
    assert!(kinds.contains(&(SyncTaskKind::Update, vec!["2".to_string()])));
    assert!(kinds.contains(&(SyncTaskKind::Delete, vec!["IMG_1.jpg-1001".to_string()])));

    let quiet = h
        .engine
        .incremental_resync(&cancel, &ProgressReporter::detached())
        .await
        .unwrap();
    assert_eq!(quiet.writes(), 0);
}

#[core_async::test]
async fn test_overlapping_run_of_same_kind_is_rejected() {
    let gate = Arc::new(Notify::new());
    let h = harness(Arc::new(FakeSource::gated(&[1, 2], gate.clone())), 500).await;

    let engine = h.engine.clone();
    let first = core_async::task::spawn(async move {
        engine
            .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
            .await
    });

    while !h.engine.is_running(ResyncKind::Full) {
        sleep(Duration::from_millis(5)).await;
    }
    let second = h
        .engine
        .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
        .await;
    assert!(matches!(second, Err(SyncError::SyncInProgress { .. })));

    // One permit per query the first run makes: ids, then one chunk.
    gate.notify_one();
    sleep(Duration::from_millis(20)).await;
    gate.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.added, 2);
    assert!(!h.engine.is_running(ResyncKind::Full));
}

#[core_async::test]
async fn test_replacement_run_waits_for_abandoned_one() {
    let gate = Arc::new(Notify::new());
    let h = harness(Arc::new(FakeSource::gated(&[1, 2], gate.clone())), 500).await;

    let engine = h.engine.clone();
    let first = core_async::task::spawn(async move {
        engine
            .resync_when_idle(ResyncKind::Full, &CancellationToken::new(), &ProgressReporter::detached())
            .await
    });
    while !h.engine.is_running(ResyncKind::Full) {
        sleep(Duration::from_millis(5)).await;
    }

    let engine = h.engine.clone();
    let second = core_async::task::spawn(async move {
        engine
            .resync_when_idle(ResyncKind::Full, &CancellationToken::new(), &ProgressReporter::detached())
            .await
    });
    sleep(Duration::from_millis(30)).await;
    assert!(!second.is_finished());

    // Dropping the first run mid-query releases the kind.
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    sleep(Duration::from_millis(50)).await;
    gate.notify_one();
    sleep(Duration::from_millis(50)).await;
    gate.notify_one();
    let report = second.await.unwrap().unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(sorted_ids(&h.media).await, vec![1, 2]);
}

#[core_async::test]
async fn test_waiting_run_gives_up_when_cancelled() {
    let gate = Arc::new(Notify::new());
    let h = harness(Arc::new(FakeSource::gated(&[1], gate.clone())), 500).await;

    let engine = h.engine.clone();
    let first = core_async::task::spawn(async move {
        engine
            .full_resync(&CancellationToken::new(), &ProgressReporter::detached())
            .await
    });
    while !h.engine.is_running(ResyncKind::Full) {
        sleep(Duration::from_millis(5)).await;
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let waiting = h
        .engine
        .resync_when_idle(ResyncKind::Full, &cancel, &ProgressReporter::detached())
        .await;
    assert!(matches!(waiting, Err(SyncError::Cancelled)));

    gate.notify_one();
    sleep(Duration::from_millis(20)).await;
    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap().added, 1);
}

#[core_async::test]
async fn test_cancelled_run_writes_nothing() {
    let h = harness(Arc::new(FakeSource::with_ids(&[1, 2, 3])), 500).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h
        .engine
        .full_resync(&cancel, &ProgressReporter::detached())
        .await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert!(sorted_ids(&h.media).await.is_empty());
}
