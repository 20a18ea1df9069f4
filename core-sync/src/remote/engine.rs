//! # Remote Sync Engine
//!
//! Mirrors selected local albums into albums on the photo server.
//!
//! ## Upload flow
//! 1. Resolve the album's registration (local key -> remote album id)
//! 2. Re-derive the album's members from the local index at execution time
//! 3. Drop remembered duplicates that no longer exist locally
//! 4. Fetch the remote album and upload members whose device asset id is
//!    neither present remotely nor a known duplicate
//! 5. Add the uploaded assets to the remote album and set a thumbnail
//!
//! A failed item is counted and skipped. It stays "missing" remotely, so
//! the next scheduled run picks it up through the same difference check.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bridge_traits::background::{
    work_fn, BackgroundScheduler, ExistingWorkPolicy, ProgressReporter, TaskConstraints, TaskId,
    WorkFn,
};
use bridge_traits::network::NetworkMonitor;
use bridge_traits::remote::{
    AlbumUpdate, PhotoServer, RemoteAlbum, Session, UploadRequest, UploadedAsset,
};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use core_async::sync::{watch, CancellationToken, Mutex as AsyncMutex};
use core_async::time::Duration;
use core_library::models::{AlbumSelector, DuplicateRecord, MediaRecord, SyncTask, SyncTaskKind};
use core_library::repositories::{DuplicateRepository, MediaRepository};
use core_runtime::events::{CoreEvent, EventBus, RemoteEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::remote::retry::RetryPolicy;
use crate::remote::state::{
    device_asset_id_for, AlbumSyncState, AlbumsState, DuplicateState, SyncDifference,
};
use crate::task_queue::SyncTaskQueue;

/// Unique work name of the sync-task drain.
pub const TASK_DRAIN_WORK: &str = "remote-task-drain";

/// Unique work name of the upload task for one album.
pub fn upload_work_name(album: &AlbumSelector) -> String {
    format!("remote-upload:{}", album.key())
}

#[derive(Debug, Clone)]
pub struct RemoteSyncConfig {
    pub device_id: String,
    pub retry: RetryPolicy,
    pub unmetered_only: bool,
}

impl Default for RemoteSyncConfig {
    fn default() -> Self {
        Self {
            device_id: "gallery-core".to_string(),
            retry: RetryPolicy::default(),
            unmetered_only: true,
        }
    }
}

/// Outcome of `add_album_to_sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRegistration {
    pub album: AlbumSelector,
    pub remote_album_id: String,
    /// `true` when the remote album was created by this call.
    pub created: bool,
    /// Scheduled upload, when a scheduler is attached.
    pub task_id: Option<TaskId>,
}

/// Aggregate counters for one upload run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub uploaded: u64,
    /// Already present remotely or remembered as duplicates.
    pub skipped: u64,
    /// Uploads the server answered with an existing asset.
    pub duplicates: u64,
    pub failed: u64,
}

/// Outcome of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDrainReport {
    pub completed: u64,
    pub failed: u64,
}

/// Uploads running for one album and the latest progress any of them
/// reported.
#[derive(Debug, Clone, Copy, Default)]
struct InFlightUpload {
    holders: usize,
    uploaded: u64,
    total: u64,
}

/// Releases one hold on the album's in-flight marker when the upload ends.
/// The marker goes away with the last hold.
struct UploadSlot<'a> {
    uploads: &'a Mutex<HashMap<String, InFlightUpload>>,
    key: String,
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        let mut uploads = self
            .uploads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = uploads.get_mut(&self.key) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                uploads.remove(&self.key);
            }
        }
    }
}

pub struct RemoteSyncEngine {
    server: Arc<dyn PhotoServer>,
    media: Arc<dyn MediaRepository>,
    duplicates: Arc<dyn DuplicateRepository>,
    tasks: Arc<SyncTaskQueue>,
    fs: Arc<dyn FileSystemAccess>,
    scheduler: Option<Arc<dyn BackgroundScheduler>>,
    network: Option<Arc<dyn NetworkMonitor>>,
    config: RemoteSyncConfig,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    uploads: Mutex<HashMap<String, InFlightUpload>>,
    /// Held for a whole drain; a replacing drain waits on it.
    drain_lock: AsyncMutex<()>,
    statuses: watch::Sender<HashMap<String, AlbumSyncState>>,
    albums: watch::Sender<AlbumsState>,
}

impl RemoteSyncEngine {
    pub fn new(
        server: Arc<dyn PhotoServer>,
        media: Arc<dyn MediaRepository>,
        duplicates: Arc<dyn DuplicateRepository>,
        tasks: Arc<SyncTaskQueue>,
        fs: Arc<dyn FileSystemAccess>,
        config: RemoteSyncConfig,
        event_bus: EventBus,
    ) -> Self {
        let (statuses, _) = watch::channel(HashMap::new());
        let (albums, _) = watch::channel(AlbumsState::Loading);
        Self {
            server,
            media,
            duplicates,
            tasks,
            fs,
            scheduler: None,
            network: None,
            config,
            event_bus,
            clock: Arc::new(SystemClock),
            uploads: Mutex::new(HashMap::new()),
            drain_lock: AsyncMutex::new(()),
            statuses,
            albums,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Time source for duplicate-record stamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn emit(&self, event: RemoteEvent) {
        self.event_bus.emit(CoreEvent::Remote(event)).ok();
    }

    fn upload_constraints(&self) -> TaskConstraints {
        if self.config.unmetered_only {
            TaskConstraints::unmetered()
        } else {
            TaskConstraints::network()
        }
    }

    // ------------------------------------------------------------------
    // Observable state
    // ------------------------------------------------------------------

    pub fn subscribe_album_states(&self) -> watch::Receiver<HashMap<String, AlbumSyncState>> {
        self.statuses.subscribe()
    }

    pub fn subscribe_albums(&self) -> watch::Receiver<AlbumsState> {
        self.albums.subscribe()
    }

    pub fn albums_state(&self) -> AlbumsState {
        self.albums.borrow().clone()
    }

    fn publish_state(&self, key: &str, state: AlbumSyncState) {
        let changed = self.statuses.send_if_modified(|states| {
            if states.get(key) == Some(&state) {
                return false;
            }
            states.insert(key.to_string(), state.clone());
            true
        });
        if changed {
            self.emit(RemoteEvent::AlbumStateChanged {
                album_id: key.to_string(),
                state: state.label().to_string(),
            });
        }
    }

    fn upload_progress(&self, key: &str) -> Option<(u64, u64)> {
        self.uploads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .map(|entry| (entry.uploaded, entry.total))
    }

    fn set_upload_progress(&self, key: &str, uploaded: u64, total: u64) {
        {
            let mut uploads = self
                .uploads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let entry = uploads.entry(key.to_string()).or_default();
            entry.uploaded = uploaded;
            entry.total = total;
        }
        self.publish_state(key, AlbumSyncState::Syncing { uploaded, total });
    }

    fn claim_upload(&self, key: &str, total: u64) -> UploadSlot<'_> {
        self.uploads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.to_string())
            .or_default()
            .holders += 1;
        self.set_upload_progress(key, 0, total);
        UploadSlot {
            uploads: &self.uploads,
            key: key.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Session and album list
    // ------------------------------------------------------------------

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.server.login(email, password).await?;
        info!(user_id = %session.user_id, "Logged in to photo server");
        Ok(session)
    }

    /// Fetch the remote album list with bounded retry and prune stale
    /// duplicates for every registered album.
    #[instrument(skip(self))]
    pub async fn refresh_albums(&self) -> AlbumsState {
        self.albums.send_replace(AlbumsState::Loading);

        let state = match self
            .config
            .retry
            .run("list_albums", || self.server.list_albums())
            .await
        {
            Ok(albums) => {
                debug!(count = albums.len(), "Fetched remote albums");
                AlbumsState::Loaded(albums)
            }
            Err(SyncError::RetriesExhausted { attempts, message }) => {
                warn!(attempts, error = %message, "Remote album refresh failed");
                self.emit(RemoteEvent::AlbumsRefreshFailed {
                    attempts,
                    message: message.clone(),
                });
                AlbumsState::Error(message)
            }
            Err(e) => AlbumsState::Error(e.to_string()),
        };

        if let Err(e) = self.prune_duplicates().await {
            warn!(error = %e, "Failed to prune duplicate state");
        }

        self.albums.send_replace(state.clone());
        state
    }

    /// Drop remembered duplicates whose local item is gone. Returns the
    /// number of ids removed across all albums.
    pub async fn prune_duplicates(&self) -> Result<u64> {
        let mut total = 0;
        for record in self.duplicates.list().await? {
            let album: AlbumSelector = match record.album_id.parse() {
                Ok(album) => album,
                Err(e) => {
                    warn!(album = %record.album_id, error = %e, "Skipping unknown album key");
                    continue;
                }
            };
            let local = self.local_device_ids(&album).await?;
            let mut state = DuplicateState::from_record(&record);
            let removed = state.prune(&local);
            if removed > 0 {
                self.save_duplicates(&record.album_id, record.remote_album_id.clone(), &state)
                    .await?;
                self.emit(RemoteEvent::DuplicatesPruned {
                    album_id: record.album_id.clone(),
                    removed: removed as u64,
                });
                total += removed as u64;
            }
        }
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Differences and status
    // ------------------------------------------------------------------

    /// Compare `expected` device asset ids against a freshly fetched
    /// remote album. Never cached.
    pub async fn check_difference(
        &self,
        remote_album_id: &str,
        expected: &BTreeSet<String>,
    ) -> SyncDifference {
        match self.server.get_album(remote_album_id).await {
            Ok(album) => {
                let remote: BTreeSet<String> =
                    album.device_asset_ids().map(str::to_string).collect();
                SyncDifference::between(expected, &remote)
            }
            Err(e) => {
                warn!(remote_album_id, error = %e, "Failed to fetch remote album");
                SyncDifference::Error(e.to_string())
            }
        }
    }

    /// Current sync state of a registered album.
    ///
    /// While an upload for the album runs this is `Syncing`.
    pub async fn album_status(&self, album: &AlbumSelector) -> Result<AlbumSyncState> {
        let key = album.key();
        if let Some((uploaded, total)) = self.upload_progress(&key) {
            return Ok(AlbumSyncState::Syncing { uploaded, total });
        }

        let record = self.registration(album).await?;
        let remote_album_id = registered_remote_id(&record)?;
        self.publish_state(&key, AlbumSyncState::Loading);

        let duplicates = DuplicateState::from_record(&record);
        let expected: BTreeSet<String> = self
            .local_device_ids(album)
            .await?
            .into_iter()
            .filter(|id| !duplicates.contains(id))
            .collect();

        let difference = self.check_difference(&remote_album_id, &expected).await;
        // An upload may have started while the album was fetched.
        if let Some((uploaded, total)) = self.upload_progress(&key) {
            return Ok(AlbumSyncState::Syncing { uploaded, total });
        }
        let state = AlbumSyncState::from(&difference);
        self.publish_state(&key, state.clone());
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Registration and uploads
    // ------------------------------------------------------------------

    /// Register `album` for sync, creating its remote counterpart when it
    /// is not known yet, and schedule an upload.
    #[instrument(skip(self), fields(album = %album))]
    pub async fn add_album_to_sync(
        self: &Arc<Self>,
        album: &AlbumSelector,
        name: &str,
    ) -> Result<AlbumRegistration> {
        if name.trim().is_empty() {
            return Err(SyncError::InvalidInput("album name is empty".to_string()));
        }
        let key = album.key();
        let existing = self.duplicates.get(&key).await?;

        let (remote_album_id, created) =
            match existing.as_ref().and_then(|r| r.remote_album_id.clone()) {
                Some(id) => (id, false),
                None => {
                    let remote = self
                        .config
                        .retry
                        .run("create_album", || self.server.create_album(name, &[]))
                        .await?;
                    info!(remote_album_id = %remote.id, name, "Created remote album");
                    (remote.id, true)
                }
            };

        let duplicates = existing
            .as_ref()
            .map(DuplicateState::from_record)
            .unwrap_or(DuplicateState::DupeFree);
        self.save_duplicates(&key, Some(remote_album_id.clone()), &duplicates)
            .await?;

        let task_id = match &self.scheduler {
            Some(scheduler) => Some(
                scheduler
                    .enqueue_unique(
                        &upload_work_name(album),
                        ExistingWorkPolicy::Replace,
                        self.upload_constraints(),
                        self.upload_work(album.clone()),
                    )
                    .await?,
            ),
            None => None,
        };

        Ok(AlbumRegistration {
            album: album.clone(),
            remote_album_id,
            created,
            task_id,
        })
    }

    /// Stop syncing `album`. The remote album is deleted as well when
    /// `delete_remote` is set.
    pub async fn remove_album_from_sync(
        &self,
        album: &AlbumSelector,
        delete_remote: bool,
    ) -> Result<bool> {
        let key = album.key();
        if let Some(scheduler) = &self.scheduler {
            if let Some(task_id) = scheduler.task_for_name(&upload_work_name(album)).await {
                scheduler.cancel(&task_id).await.ok();
            }
        }

        let Some(record) = self.duplicates.get(&key).await? else {
            return Ok(false);
        };
        if delete_remote {
            if let Some(remote_id) = &record.remote_album_id {
                self.server.delete_album(remote_id).await?;
            }
        }
        self.duplicates.delete(&key).await?;
        self.statuses.send_modify(|states| {
            states.remove(&key);
        });
        Ok(true)
    }

    /// Background unit of work uploading `album`. The member set is
    /// re-derived each time the work runs.
    pub fn upload_work(self: &Arc<Self>, album: AlbumSelector) -> WorkFn {
        let engine = Arc::clone(self);
        work_fn(move |ctx| {
            let engine = Arc::clone(&engine);
            let album = album.clone();
            async move {
                engine
                    .run_upload(&album, &ctx.cancel, &ctx.progress)
                    .await
                    .map(|_| ())
                    .map_err(SyncError::into_bridge)
            }
        })
    }

    /// Background unit of work draining the sync-task queue.
    pub fn drain_work(self: &Arc<Self>) -> WorkFn {
        let engine = Arc::clone(self);
        work_fn(move |ctx| {
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .process_pending_tasks(&ctx.cancel)
                    .await
                    .map(|_| ())
                    .map_err(SyncError::into_bridge)
            }
        })
    }

    /// Upload every member of `album` missing from its remote counterpart.
    #[instrument(skip(self, cancel, progress), fields(album = %album))]
    pub async fn run_upload(
        &self,
        album: &AlbumSelector,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> Result<UploadReport> {
        self.ensure_network().await?;
        let key = album.key();
        let record = self.registration(album).await?;
        let remote_album_id = registered_remote_id(&record)?;

        let members = self.media.list_by_album(album).await?;
        let local: BTreeSet<String> = members.iter().map(device_asset_id_for).collect();
        let mut duplicates = DuplicateState::from_record(&record);
        let pruned = duplicates.prune(&local);
        if pruned > 0 {
            self.emit(RemoteEvent::DuplicatesPruned {
                album_id: key.clone(),
                removed: pruned as u64,
            });
        }

        let remote = self
            .config
            .retry
            .run("get_album", || self.server.get_album(&remote_album_id))
            .await?;
        let present: BTreeSet<&str> = remote.device_asset_ids().collect();

        let (pending, already): (Vec<MediaRecord>, Vec<MediaRecord>) =
            members.into_iter().partition(|record| {
                let id = device_asset_id_for(record);
                !present.contains(id.as_str()) && !duplicates.contains(&id)
            });

        let mut report = self
            .upload_records(&key, &remote, pending, &mut duplicates, cancel, progress)
            .await;
        report.skipped += already.len() as u64;

        self.save_duplicates(&key, Some(remote_album_id), &duplicates)
            .await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            duplicates = report.duplicates,
            failed = report.failed,
            "Album upload finished"
        );
        self.emit(RemoteEvent::UploadCompleted {
            album_id: key,
            uploaded: report.uploaded,
            skipped: report.skipped,
            failed: report.failed,
        });
        if let Err(e) = self.album_status(album).await {
            debug!(error = %e, "Could not refresh album state after upload");
        }
        Ok(report)
    }

    /// Upload `records` one by one into `remote`. Per-item failures are
    /// counted, never propagated.
    async fn upload_records(
        &self,
        key: &str,
        remote: &RemoteAlbum,
        records: Vec<MediaRecord>,
        duplicates: &mut DuplicateState,
        cancel: &CancellationToken,
        progress: &ProgressReporter,
    ) -> UploadReport {
        let mut report = UploadReport::default();
        let total = records.len() as u64;
        if total == 0 {
            progress.report(1.0, 0);
            return report;
        }

        let _slot = self.claim_upload(key, total);
        let mut asset_ids = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let device_asset_id = device_asset_id_for(record);
            match self.upload_one(record, &device_asset_id).await {
                Ok(uploaded) => {
                    if uploaded.duplicate {
                        duplicates.insert(device_asset_id);
                        report.duplicates += 1;
                    } else {
                        report.uploaded += 1;
                    }
                    let original = format!("/api/assets/{}/original", uploaded.id);
                    let thumbnail = format!("/api/assets/{}/thumbnail", uploaded.id);
                    if let Err(e) = self
                        .media
                        .set_remote_reference(record.id, Some(&original), Some(&thumbnail))
                        .await
                    {
                        warn!(media_id = record.id, error = %e, "Failed to store remote reference");
                    }
                    asset_ids.push(uploaded.id);
                }
                Err(e) => {
                    warn!(media_id = record.id, path = %record.path, error = %e, "Upload failed, skipping");
                    report.failed += 1;
                }
            }

            let done = index as u64 + 1;
            progress.report(done as f32 / total as f32, report.uploaded + report.duplicates);
            self.set_upload_progress(key, done, total);
            self.emit(RemoteEvent::UploadProgress {
                album_id: key.to_string(),
                uploaded: done,
                total,
            });
        }

        if !asset_ids.is_empty() {
            self.attach_assets(remote, &asset_ids).await;
        }
        report
    }

    async fn upload_one(
        &self,
        record: &MediaRecord,
        device_asset_id: &str,
    ) -> Result<UploadedAsset> {
        let data = self.fs.read_file(Path::new(&record.path)).await?;
        let modified = timestamp(record.date_modified);
        let request = UploadRequest {
            device_asset_id: device_asset_id.to_string(),
            device_id: self.config.device_id.clone(),
            file_name: record.display_name.clone(),
            mime_type: record.mime_type.clone(),
            data,
            file_created_at: record.date_taken.map(timestamp).unwrap_or(modified),
            file_modified_at: modified,
            is_favorite: record.favourite,
        };
        Ok(self.server.upload_asset(request).await?)
    }

    /// Add uploaded assets to the album and give it a thumbnail if it has
    /// none. Failures here leave the assets "missing" for the next run.
    async fn attach_assets(&self, remote: &RemoteAlbum, asset_ids: &[String]) {
        match self
            .config
            .retry
            .run("add_assets_to_album", || {
                self.server.add_assets_to_album(&remote.id, asset_ids)
            })
            .await
        {
            Ok(added) => debug!(remote_album_id = %remote.id, added = added.len(), "Added assets to album"),
            Err(e) => {
                warn!(remote_album_id = %remote.id, error = %e, "Failed to add assets to album");
                return;
            }
        }

        if remote.thumbnail_asset_id.is_none() {
            let update = AlbumUpdate {
                name: None,
                thumbnail_asset_id: asset_ids.first().cloned(),
            };
            if let Err(e) = self.server.update_album(&remote.id, &update).await {
                warn!(remote_album_id = %remote.id, error = %e, "Failed to set album thumbnail");
            }
        }
    }

    // ------------------------------------------------------------------
    // Sync-task queue
    // ------------------------------------------------------------------

    /// Drain the sync-task queue. Failed tasks go back to `Waiting` once
    /// the drain ends, on every exit path, so they are neither reclaimed in
    /// the same pass nor left in `Processing`.
    ///
    /// One drain runs at a time. Tasks still `Processing` when the lock is
    /// taken belong to a drain that was dropped mid-task and are requeued.
    #[instrument(skip(self, cancel))]
    pub async fn process_pending_tasks(&self, cancel: &CancellationToken) -> Result<TaskDrainReport> {
        let _drain = self.drain_lock.lock().await;
        self.tasks.recover_interrupted().await?;

        let mut report = TaskDrainReport::default();
        let mut failures = Vec::new();

        let drained = self.drain(cancel, &mut report, &mut failures).await;

        let mut flush_error = None;
        for (task_id, message) in failures {
            match self.tasks.mark_failed(task_id, &message).await {
                Ok(()) => report.failed += 1,
                Err(e) => {
                    warn!(task_id, error = %e, "Could not return failed task to the queue");
                    flush_error.get_or_insert(e);
                }
            }
        }
        drained?;
        if let Some(e) = flush_error {
            return Err(e);
        }

        if cancel.is_cancelled() {
            self.tasks.recover_interrupted().await?;
            return Err(SyncError::Cancelled);
        }
        self.tasks.cleanup_synced(Duration::from_secs(7 * 24 * 3600)).await?;
        Ok(report)
    }

    async fn drain(
        &self,
        cancel: &CancellationToken,
        report: &mut TaskDrainReport,
        failures: &mut Vec<(i64, String)>,
    ) -> Result<()> {
        while !cancel.is_cancelled() {
            let Some(task) = self.tasks.dequeue().await? else {
                break;
            };
            match self.execute_task(&task, cancel).await {
                Ok(()) => {
                    if let Err(e) = self.tasks.mark_complete(task.id).await {
                        failures.push((task.id, e.to_string()));
                        return Err(e);
                    }
                    report.completed += 1;
                }
                Err(e) => failures.push((task.id, e.to_string())),
            }
        }
        Ok(())
    }

    async fn execute_task(&self, task: &SyncTask, cancel: &CancellationToken) -> Result<()> {
        match task.kind {
            SyncTaskKind::Delete => self.delete_remote_assets(&task.item_ids).await,
            SyncTaskKind::Upload => {
                let key = task.album_id.as_deref().ok_or_else(|| {
                    SyncError::InvalidInput(format!("upload task {} has no album", task.id))
                })?;
                let album: AlbumSelector = key
                    .parse()
                    .map_err(|e| SyncError::InvalidInput(format!("{}", e)))?;
                self.upload_media_ids(&album, &task.item_ids, cancel).await
            }
            SyncTaskKind::Update => {
                let albums: Vec<AlbumSelector> = match &task.album_id {
                    Some(key) => vec![key
                        .parse()
                        .map_err(|e| SyncError::InvalidInput(format!("{}", e)))?],
                    None => self.registered_albums().await?,
                };
                for album in albums {
                    if let AlbumSyncState::Error(message) = self.album_status(&album).await? {
                        return Err(SyncError::Remote(message));
                    }
                }
                Ok(())
            }
        }
    }

    /// Remove remote assets whose device asset id is listed, across every
    /// registered album.
    async fn delete_remote_assets(&self, device_asset_ids: &[String]) -> Result<()> {
        let wanted: BTreeSet<&str> = device_asset_ids.iter().map(String::as_str).collect();
        let mut asset_ids = BTreeSet::new();

        for record in self.duplicates.list().await? {
            let Some(remote_id) = record.remote_album_id.as_deref() else {
                continue;
            };
            let remote = self
                .config
                .retry
                .run("get_album", || self.server.get_album(remote_id))
                .await?;
            asset_ids.extend(
                remote
                    .assets
                    .iter()
                    .filter(|asset| wanted.contains(asset.device_asset_id.as_str()))
                    .map(|asset| asset.id.clone()),
            );
        }

        if asset_ids.is_empty() {
            debug!(requested = device_asset_ids.len(), "No remote assets to delete");
            return Ok(());
        }
        let ids: Vec<String> = asset_ids.into_iter().collect();
        self.config
            .retry
            .run("delete_assets", || self.server.delete_assets(&ids))
            .await?;
        info!(deleted = ids.len(), "Deleted remote assets");
        Ok(())
    }

    async fn upload_media_ids(
        &self,
        album: &AlbumSelector,
        media_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_network().await?;
        let ids: Vec<i64> = media_ids.iter().filter_map(|id| id.parse().ok()).collect();
        let record = self.registration(album).await?;
        let remote_album_id = registered_remote_id(&record)?;
        let remote = self
            .config
            .retry
            .run("get_album", || self.server.get_album(&remote_album_id))
            .await?;
        let present: BTreeSet<&str> = remote.device_asset_ids().collect();

        let mut duplicates = DuplicateState::from_record(&record);
        let pending: Vec<MediaRecord> = self
            .media
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .filter(|r| {
                let id = device_asset_id_for(r);
                !present.contains(id.as_str()) && !duplicates.contains(&id)
            })
            .collect();

        let report = self
            .upload_records(
                &album.key(),
                &remote,
                pending,
                &mut duplicates,
                cancel,
                &ProgressReporter::detached(),
            )
            .await;
        self.save_duplicates(&album.key(), Some(remote_album_id), &duplicates)
            .await?;

        if report.failed > 0 {
            return Err(SyncError::Remote(format!(
                "{} of the queued uploads failed",
                report.failed
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn ensure_network(&self) -> Result<()> {
        if let Some(network) = &self.network {
            if !network.allows_upload(self.config.unmetered_only).await {
                return Err(SyncError::Remote(
                    "current network does not allow uploads".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn registration(&self, album: &AlbumSelector) -> Result<DuplicateRecord> {
        self.duplicates
            .get(&album.key())
            .await?
            .ok_or_else(|| SyncError::AlbumNotRegistered(album.key()))
    }

    /// Albums registered for sync.
    pub async fn registered_albums(&self) -> Result<Vec<AlbumSelector>> {
        Ok(self
            .duplicates
            .list()
            .await?
            .iter()
            .filter(|r| r.remote_album_id.is_some())
            .filter_map(|r| r.album_id.parse().ok())
            .collect())
    }

    async fn local_device_ids(&self, album: &AlbumSelector) -> Result<BTreeSet<String>> {
        Ok(self
            .media
            .list_by_album(album)
            .await?
            .iter()
            .map(device_asset_id_for)
            .collect())
    }

    async fn save_duplicates(
        &self,
        key: &str,
        remote_album_id: Option<String>,
        state: &DuplicateState,
    ) -> Result<()> {
        self.duplicates
            .save(&DuplicateRecord {
                album_id: key.to_string(),
                remote_album_id,
                duplicates: state.to_vec(),
                updated_at: self.clock.unix_timestamp(),
            })
            .await?;
        Ok(())
    }
}

fn registered_remote_id(record: &DuplicateRecord) -> Result<String> {
    record
        .remote_album_id
        .clone()
        .ok_or_else(|| SyncError::AlbumNotRegistered(record.album_id.clone()))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_work_name_is_stable() {
        assert_eq!(
            upload_work_name(&AlbumSelector::Folder("/DCIM/Camera".into())),
            "remote-upload:folder:/DCIM/Camera"
        );
        assert_eq!(
            upload_work_name(&AlbumSelector::Custom(4)),
            "remote-upload:custom:4"
        );
    }

    #[test]
    fn test_registered_remote_id_requires_remote_album() {
        let record = DuplicateRecord {
            album_id: "custom:1".into(),
            remote_album_id: None,
            duplicates: vec![],
            updated_at: 0,
        };
        assert!(matches!(
            registered_remote_id(&record),
            Err(SyncError::AlbumNotRegistered(_))
        ));
    }

    fn slot<'a>(uploads: &'a Mutex<HashMap<String, InFlightUpload>>, key: &str) -> UploadSlot<'a> {
        uploads
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .holders += 1;
        UploadSlot {
            uploads,
            key: key.to_string(),
        }
    }

    #[test]
    fn test_in_flight_marker_outlives_overlapping_upload() {
        let uploads = Mutex::new(HashMap::new());
        let first = slot(&uploads, "custom:1");
        let second = slot(&uploads, "custom:1");
        let other = slot(&uploads, "custom:2");

        drop(first);
        assert_eq!(uploads.lock().unwrap()["custom:1"].holders, 1);

        drop(second);
        assert!(!uploads.lock().unwrap().contains_key("custom:1"));
        assert!(uploads.lock().unwrap().contains_key("custom:2"));

        drop(other);
        assert!(uploads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(timestamp(0).timestamp(), 0);
        assert_eq!(timestamp(1_700_000_000).timestamp(), 1_700_000_000);
    }
}
