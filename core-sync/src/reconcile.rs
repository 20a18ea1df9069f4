//! # Reconciliation Engine
//!
//! Keeps the local media index an eventually-consistent projection of the
//! platform media source.
//!
//! ## Full resync
//! 1. Enumerate upstream ids (id-only query) and local ids
//! 2. `added = upstream - local`, `removed = local - upstream`
//! 3. Fetch full metadata for `added` chunk by chunk, upserting each chunk in
//!    one transaction and reporting progress after every commit
//! 4. Delete `removed` in one transaction and queue a remote `Delete` task
//!
//! ## Incremental resync
//! Compares `date_modified` per id and upserts anything new or changed;
//! changed ids are queued as a remote `Update` task.
//!
//! Membership is recomputed from scratch on every run, so an interrupted run
//! is simply repeated. A second run with no upstream change writes nothing.
//!
//! ## Overlap
//! At most one run per [`ResyncKind`] is in flight. A second request of the
//! same kind fails fast with [`SyncError::SyncInProgress`]; scheduled work
//! goes through [`ReconciliationEngine::resync_when_idle`] instead and waits
//! for the earlier run to release.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use bridge_traits::background::{work_fn, ProgressReporter, WorkFn};
use bridge_traits::error::BridgeError;
use bridge_traits::media_source::{MediaQuery, MediaRow, MediaSource};
use core_async::sync::{CancellationToken, Notify};
use core_async::time::{timeout, Duration};
use core_library::models::{MediaRecord, SyncTaskKind};
use core_library::repositories::MediaRepository;
use core_runtime::events::{CoreEvent, EventBus, IndexEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::progress::ChunkProgress;
use crate::remote::device_asset_id_for;
use crate::task_queue::SyncTaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResyncKind {
    Full,
    Incremental,
}

impl fmt::Display for ResyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncKind::Full => f.write_str("full"),
            ResyncKind::Incremental => f.write_str("incremental"),
        }
    }
}

/// Unique identifier for one resync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResyncJobId(Uuid);

impl ResyncJobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ResyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResyncJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What one run changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncReport {
    pub job_id: ResyncJobId,
    pub kind: ResyncKind,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    /// Ids whose metadata could not be read this run.
    pub skipped: u64,
    /// `false` when the media source returned no cursor.
    pub source_available: bool,
}

impl ResyncReport {
    fn new(job_id: ResyncJobId, kind: ResyncKind) -> Self {
        Self {
            job_id,
            kind,
            added: 0,
            updated: 0,
            removed: 0,
            skipped: 0,
            source_available: true,
        }
    }

    /// Rows written to the index.
    pub fn writes(&self) -> u64 {
        self.added + self.updated + self.removed
    }
}

/// Result of upserting a list of ids chunk by chunk.
#[derive(Debug, Default)]
struct ChunkOutcome {
    written: Vec<i64>,
    skipped: u64,
}

/// Removes the kind from the in-flight set when the run ends, dropped
/// mid-run included, and wakes anyone waiting for it.
struct InFlight<'a> {
    running: &'a Mutex<HashSet<ResyncKind>>,
    released: &'a Notify,
    kind: ResyncKind,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.kind);
        self.released.notify_waiters();
    }
}

/// Upper bound on one wait for a release, so cancellation is noticed.
const RELEASE_POLL: Duration = Duration::from_millis(250);

pub struct ReconciliationEngine {
    source: Arc<dyn MediaSource>,
    media: Arc<dyn MediaRepository>,
    tasks: Option<Arc<SyncTaskQueue>>,
    event_bus: EventBus,
    chunk_size: usize,
    running: Mutex<HashSet<ResyncKind>>,
    released: Notify,
}

impl ReconciliationEngine {
    pub fn new(
        source: Arc<dyn MediaSource>,
        media: Arc<dyn MediaRepository>,
        event_bus: EventBus,
        chunk_size: usize,
    ) -> Self {
        Self {
            source,
            media,
            tasks: None,
            event_bus,
            chunk_size: chunk_size.max(1),
            running: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }

    /// Queue remote `Delete` / `Update` tasks for changes found during resync.
    pub fn with_task_queue(mut self, tasks: Arc<SyncTaskQueue>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_running(&self, kind: ResyncKind) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&kind)
    }

    fn begin(&self, kind: ResyncKind) -> Result<InFlight<'_>> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(kind) {
            return Err(SyncError::SyncInProgress {
                kind: kind.to_string(),
            });
        }
        Ok(InFlight {
            running: &self.running,
            released: &self.released,
            kind,
        })
    }

    fn emit(&self, event: IndexEvent) {
        self.event_bus.emit(CoreEvent::Index(event)).ok();
    }

    /// Existence-only reconciliation.
    #[instrument(skip(self, cancel, progress))]
    pub async fn full_resync(
        &self,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        self.run(ResyncKind::Full, cancel, progress).await
    }

    /// Modification-stamp reconciliation for routine refreshes.
    #[instrument(skip(self, cancel, progress))]
    pub async fn incremental_resync(
        &self,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        self.run(ResyncKind::Incremental, cancel, progress).await
    }

    pub async fn resync(
        &self,
        kind: ResyncKind,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        match kind {
            ResyncKind::Full => self.full_resync(cancel, progress).await,
            ResyncKind::Incremental => self.incremental_resync(cancel, progress).await,
        }
    }

    /// [`resync`](Self::resync), waiting out a run of the same kind that is
    /// still in flight instead of failing with `SyncInProgress`.
    pub async fn resync_when_idle(
        &self,
        kind: ResyncKind,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        loop {
            let released = self.released.notified();
            if !self.is_running(kind) {
                match self.resync(kind, cancel, progress).await {
                    Err(SyncError::SyncInProgress { .. }) => {}
                    other => return other,
                }
            }
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            debug!(kind = %kind, "Waiting for the previous resync to finish");
            let _ = timeout(RELEASE_POLL, released).await;
        }
    }

    async fn run(
        &self,
        kind: ResyncKind,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        let _in_flight = self.begin(kind)?;
        let job_id = ResyncJobId::new();
        info!(job_id = %job_id, kind = %kind, "Starting media resync");
        self.emit(IndexEvent::ResyncStarted {
            job_id: job_id.to_string(),
            kind: kind.to_string(),
        });

        let result = match kind {
            ResyncKind::Full => self.run_full(job_id, cancel, progress).await,
            ResyncKind::Incremental => self.run_incremental(job_id, cancel, progress).await,
        };

        match &result {
            Ok(report) if report.source_available => {
                info!(
                    job_id = %job_id,
                    added = report.added,
                    updated = report.updated,
                    removed = report.removed,
                    skipped = report.skipped,
                    "Media resync completed"
                );
                self.emit(IndexEvent::ResyncCompleted {
                    job_id: job_id.to_string(),
                    added: report.added,
                    updated: report.updated,
                    removed: report.removed,
                    skipped: report.skipped,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Media resync failed");
                self.emit(IndexEvent::ResyncFailed {
                    job_id: job_id.to_string(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Query the source, mapping a missing cursor to `None`.
    async fn enumerate(
        &self,
        kind: ResyncKind,
        query: &MediaQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<MediaRow>>> {
        let rows = self
            .source
            .query(query, cancel)
            .await
            .map_err(source_error)?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if rows.is_none() {
            warn!(kind = %kind, "Media source returned no cursor, nothing to do");
            self.emit(IndexEvent::SourceUnavailable {
                kind: kind.to_string(),
            });
        }
        Ok(rows)
    }

    async fn run_full(
        &self,
        job_id: ResyncJobId,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        let mut report = ResyncReport::new(job_id, ResyncKind::Full);
        let Some(rows) = self
            .enumerate(ResyncKind::Full, &MediaQuery::ids_only(), cancel)
            .await?
        else {
            report.source_available = false;
            progress.report(1.0, 0);
            return Ok(report);
        };

        let upstream: HashSet<i64> = rows.iter().map(|row| row.id).collect();
        let local: HashSet<i64> = self.media.all_ids().await?.into_iter().collect();

        let mut added: Vec<i64> = upstream.difference(&local).copied().collect();
        let mut removed: Vec<i64> = local.difference(&upstream).copied().collect();
        added.sort_unstable();
        removed.sort_unstable();
        debug!(
            upstream = upstream.len(),
            local = local.len(),
            added = added.len(),
            removed = removed.len(),
            "Computed index membership difference"
        );

        // Captured first: an added row that reuses a removed row's path
        // replaces it during the upsert.
        let removed_assets = self.device_ids_for(&removed).await?;
        let outcome = self.upsert_in_chunks(job_id, &added, cancel, progress).await?;
        report.added = outcome.written.len() as u64;
        report.skipped = outcome.skipped;
        report.removed = self.remove(&removed, removed_assets).await?;
        Ok(report)
    }

    async fn run_incremental(
        &self,
        job_id: ResyncJobId,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ResyncReport> {
        let mut report = ResyncReport::new(job_id, ResyncKind::Incremental);
        let Some(rows) = self
            .enumerate(
                ResyncKind::Incremental,
                &MediaQuery::modification_stamps(),
                cancel,
            )
            .await?
        else {
            report.source_available = false;
            progress.report(1.0, 0);
            return Ok(report);
        };

        let local: HashMap<i64, i64> = self.media.modification_stamps().await?;
        let upstream: HashMap<i64, i64> = rows
            .iter()
            .map(|row| (row.id, row.date_modified.unwrap_or_default()))
            .collect();

        let mut changed: Vec<i64> = upstream
            .iter()
            .filter(|(id, stamp)| local.get(*id) != Some(*stamp))
            .map(|(id, _)| *id)
            .collect();
        let mut removed: Vec<i64> = local
            .keys()
            .filter(|id| !upstream.contains_key(*id))
            .copied()
            .collect();
        changed.sort_unstable();
        removed.sort_unstable();

        let removed_assets = self.device_ids_for(&removed).await?;
        let outcome = self
            .upsert_in_chunks(job_id, &changed, cancel, progress)
            .await?;
        let (updated, added): (Vec<i64>, Vec<i64>) = outcome
            .written
            .into_iter()
            .partition(|id| local.contains_key(id));
        report.added = added.len() as u64;
        report.updated = updated.len() as u64;
        report.skipped = outcome.skipped;

        if let Some(tasks) = &self.tasks {
            let ids: Vec<String> = updated.iter().map(i64::to_string).collect();
            tasks.enqueue(SyncTaskKind::Update, &ids, None).await?;
        }

        report.removed = self.remove(&removed, removed_assets).await?;
        Ok(report)
    }

    /// Fetch and upsert `ids` in enumeration order, one transaction per chunk.
    async fn upsert_in_chunks(
        &self,
        job_id: ResyncJobId,
        ids: &[i64],
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<ChunkOutcome> {
        let mut outcome = ChunkOutcome::default();
        let mut tracker = ChunkProgress::new(ids.len() as u64, self.chunk_size);

        for chunk in ids.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let rows = self.fetch_chunk(chunk, cancel).await?;
            // Nothing from a cancelled query may reach the index.
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let records: Vec<MediaRecord> = rows
                .iter()
                .filter(|row| chunk.contains(&row.id))
                .filter_map(record_from_row)
                .collect();
            outcome.skipped += (chunk.len() - records.len()) as u64;

            if !records.is_empty() {
                self.media.upsert_chunk(&records).await?;
                outcome.written.extend(records.iter().map(|r| r.id));
            }

            let fraction = tracker.advance(chunk.len());
            progress.report(fraction, tracker.processed());
            self.emit(IndexEvent::ResyncProgress {
                job_id: job_id.to_string(),
                processed: tracker.processed(),
                total: tracker.total(),
                fraction,
            });
        }

        progress.report(tracker.finish(), tracker.processed());
        Ok(outcome)
    }

    /// Full metadata for one chunk. A failed chunk query falls back to
    /// per-id queries so one unreadable item cannot sink its neighbours.
    async fn fetch_chunk(
        &self,
        chunk: &[i64],
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaRow>> {
        match self
            .source
            .query(&MediaQuery::full_for(chunk.to_vec()), cancel)
            .await
        {
            Ok(Some(rows)) => return Ok(rows),
            Ok(None) if cancel.is_cancelled() => return Err(SyncError::Cancelled),
            Ok(None) => debug!(len = chunk.len(), "Chunk query returned no cursor"),
            Err(BridgeError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => warn!(len = chunk.len(), error = %e, "Chunk query failed, retrying per item"),
        }

        let mut rows = Vec::with_capacity(chunk.len());
        for id in chunk {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self
                .source
                .query(&MediaQuery::full_for(vec![*id]), cancel)
                .await
            {
                Ok(Some(found)) => rows.extend(found),
                Ok(None) => debug!(media_id = id, "Skipping item with no metadata"),
                Err(e) => warn!(media_id = id, error = %e, "Skipping unreadable item"),
            }
        }
        Ok(rows)
    }

    /// Device asset ids of indexed rows, for queueing their remote removal.
    async fn device_ids_for(&self, ids: &[i64]) -> Result<Vec<String>> {
        if ids.is_empty() || self.tasks.is_none() {
            return Ok(Vec::new());
        }
        Ok(self
            .media
            .find_by_ids(ids)
            .await?
            .iter()
            .map(device_asset_id_for)
            .collect())
    }

    /// Delete vanished ids in one transaction and queue their remote removal.
    async fn remove(&self, ids: &[i64], device_ids: Vec<String>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = self.media.delete_ids(ids).await?;
        if let Some(tasks) = &self.tasks {
            tasks.enqueue(SyncTaskKind::Delete, &device_ids, None).await?;
        }
        Ok(removed)
    }

    /// Unit of background work running one resync of `kind`.
    pub fn work(self: &Arc<Self>, kind: ResyncKind) -> WorkFn {
        let engine = Arc::clone(self);
        work_fn(move |ctx| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .resync_when_idle(kind, &ctx.cancel, &ctx.progress)
                    .await
                    .map(|_| ())
                    .map_err(SyncError::into_bridge)
            }
        })
    }
}

fn source_error(e: BridgeError) -> SyncError {
    match e {
        BridgeError::Cancelled => SyncError::Cancelled,
        other => SyncError::Source(other.to_string()),
    }
}

/// Index record for a source row. Rows without a path or mime type, or
/// that the index would reject, are skipped so they cannot fail the chunk.
fn record_from_row(row: &MediaRow) -> Option<MediaRecord> {
    let path = row.path.as_deref().filter(|p| !p.is_empty())?;
    let mime_type = row.mime_type.as_deref().filter(|m| !m.is_empty())?;

    let mut record = MediaRecord::new(row.id, path, mime_type);
    if let Some(name) = row.display_name.as_deref().filter(|n| !n.is_empty()) {
        record.display_name = name.to_string();
    }
    record.date_taken = row.date_taken;
    record.date_modified = row.date_modified.unwrap_or_default();
    record.size = row.size.unwrap_or_default();
    record.favourite = row.favourite.unwrap_or_default();

    match record.validate() {
        Ok(()) => Some(record),
        Err(reason) => {
            warn!(media_id = row.id, %reason, "Skipping invalid source row");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_row_requires_path_and_mime() {
        let row = MediaRow {
            id: 3,
            path: Some("/sdcard/DCIM/a.mp4".into()),
            display_name: Some("Holiday.mp4".into()),
            mime_type: Some("video/mp4".into()),
            date_modified: Some(9),
            size: Some(100),
            favourite: Some(true),
            ..Default::default()
        };
        let record = record_from_row(&row).unwrap();
        assert_eq!(record.parent_path, "/sdcard/DCIM");
        assert_eq!(record.display_name, "Holiday.mp4");
        assert_eq!(record.date_modified, 9);
        assert!(record.favourite);

        assert!(record_from_row(&MediaRow::id_only(3)).is_none());
        let no_mime = MediaRow {
            mime_type: None,
            ..row
        };
        assert!(record_from_row(&no_mime).is_none());
    }

    #[test]
    fn test_record_from_row_skips_rows_the_index_rejects() {
        let row = MediaRow {
            id: 4,
            path: Some("/sdcard/DCIM/b.jpg".into()),
            mime_type: Some("image/jpeg".into()),
            size: Some(-1),
            ..Default::default()
        };
        assert!(record_from_row(&row).is_none());

        let blank_path = MediaRow {
            path: Some("   ".into()),
            size: Some(10),
            ..row
        };
        assert!(record_from_row(&blank_path).is_none());
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let running = Mutex::new(HashSet::new());
        running.lock().unwrap().insert(ResyncKind::Full);
        let released = Notify::new();
        {
            let _guard = InFlight {
                running: &running,
                released: &released,
                kind: ResyncKind::Full,
            };
        }
        assert!(running.lock().unwrap().is_empty());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ResyncKind::Full.to_string(), "full");
        assert_eq!(ResyncKind::Incremental.to_string(), "incremental");
    }
}
