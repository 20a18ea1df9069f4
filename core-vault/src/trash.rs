//! Trash bin
//!
//! Trashed files are moved into the app's trash directory and flagged as
//! trashed in the media source; their index rows are dropped together with
//! the `trasheditementity` insert. Restoring moves the file back and clears
//! the flag, after which the next resync picks the item up again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bridge_traits::media_source::{ColumnValue, MediaSource};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use core_library::models::TrashedRecord;
use core_library::repositories::{MediaRepository, TrashRepository};
use core_runtime::events::{CoreEvent, EventBus, VaultEvent};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::report::BatchReport;
use crate::secure_folder::path_string;

pub struct TrashBin {
    media: Arc<dyn MediaRepository>,
    trash: Arc<dyn TrashRepository>,
    source: Arc<dyn MediaSource>,
    fs: Arc<dyn FileSystemAccess>,
    trash_dir: PathBuf,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl TrashBin {
    pub fn new(
        media: Arc<dyn MediaRepository>,
        trash: Arc<dyn TrashRepository>,
        source: Arc<dyn MediaSource>,
        fs: Arc<dyn FileSystemAccess>,
        trash_dir: impl Into<PathBuf>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            media,
            trash,
            source,
            fs,
            trash_dir: trash_dir.into(),
            event_bus,
            clock: Arc::new(SystemClock),
        }
    }

    /// Time source for `trashed_at` stamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn list(&self) -> Result<Vec<TrashedRecord>> {
        Ok(self.trash.list().await?)
    }

    #[instrument(skip(self, media_ids), fields(count = media_ids.len()))]
    pub async fn trash(&self, media_ids: &[i64]) -> Result<BatchReport<TrashedRecord>> {
        self.fs.create_dir_all(&self.trash_dir).await?;
        let mut report = BatchReport::default();

        for &id in media_ids {
            match self.trash_one(id).await {
                Ok(record) => report.succeeded(record),
                Err(e) => {
                    warn!(media_id = id, error = %e, "Failed to trash item");
                    report.record_failure(id, e);
                }
            }
        }

        info!(trashed = report.completed_count(), failed = report.failed_count(), "Trashed items");
        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::ItemsTrashed {
                trashed: report.completed_count(),
                failed: report.failed_count(),
            }))
            .ok();
        Ok(report)
    }

    async fn trash_one(&self, media_id: i64) -> Result<TrashedRecord> {
        let media = self
            .media
            .find_by_id(media_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("media {}", media_id)))?;

        let original = PathBuf::from(&media.path);
        let extension = original
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let trashed_path = self
            .trash_dir
            .join(format!("{}{}", Uuid::new_v4().simple(), extension));

        self.fs.rename(&original, &trashed_path).await?;

        let record = TrashedRecord {
            original_path: media.path.clone(),
            trashed_path: path_string(&trashed_path),
            media_id: Some(media_id),
            date_taken: media.date_taken,
            mime_type: media.mime_type.clone(),
            display_name: media.display_name.clone(),
            trashed_at: self.clock.unix_timestamp(),
        };

        if let Err(e) = self.trash.record_trashed(&record).await {
            if let Err(undo) = self.fs.rename(&trashed_path, &original).await {
                warn!(path = %media.path, error = %undo, "Failed to move file back after trash error");
            }
            return Err(e.into());
        }

        if let Err(e) = self
            .source
            .update(media_id, &[ColumnValue::Trashed(true)])
            .await
        {
            warn!(media_id, error = %e, "Failed to flag item as trashed in media source");
        }

        Ok(record)
    }

    #[instrument(skip(self, original_paths), fields(count = original_paths.len()))]
    pub async fn restore(&self, original_paths: &[String]) -> Result<BatchReport<String>> {
        let mut report = BatchReport::default();

        for original in original_paths {
            match self.restore_one(original).await {
                Ok(()) => report.succeeded(original.clone()),
                Err(e) => {
                    warn!(path = %original, error = %e, "Failed to restore trashed item");
                    report.record_failure(original, e);
                }
            }
        }

        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::ItemsUntrashed {
                restored: report.completed_count(),
                failed: report.failed_count(),
            }))
            .ok();
        Ok(report)
    }

    async fn restore_one(&self, original_path: &str) -> Result<()> {
        let record = self
            .trash
            .find_by_original_path(original_path)
            .await?
            .ok_or_else(|| VaultError::NotFound(original_path.to_string()))?;

        let original = Path::new(original_path);
        if let Some(parent) = original.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        self.fs
            .rename(Path::new(&record.trashed_path), original)
            .await?;

        if let Some(media_id) = record.media_id {
            if let Err(e) = self
                .source
                .update(media_id, &[ColumnValue::Trashed(false)])
                .await
            {
                warn!(media_id, error = %e, "Failed to clear trashed flag in media source");
            }
        }

        self.trash.remove(original_path).await?;
        Ok(())
    }

    /// Remove trashed files for good.
    #[instrument(skip(self, original_paths), fields(count = original_paths.len()))]
    pub async fn delete_permanently(&self, original_paths: &[String]) -> Result<BatchReport<String>> {
        let mut report = BatchReport::default();

        for original in original_paths {
            match self.delete_one(original).await {
                Ok(()) => report.succeeded(original.clone()),
                Err(e) => {
                    warn!(path = %original, error = %e, "Failed to delete trashed item");
                    report.record_failure(original, e);
                }
            }
        }

        self.event_bus
            .emit(CoreEvent::Vault(VaultEvent::TrashEmptied {
                deleted: report.completed_count(),
            }))
            .ok();
        Ok(report)
    }

    pub async fn empty(&self) -> Result<BatchReport<String>> {
        let all: Vec<String> = self
            .trash
            .list()
            .await?
            .into_iter()
            .map(|r| r.original_path)
            .collect();
        self.delete_permanently(&all).await
    }

    async fn delete_one(&self, original_path: &str) -> Result<()> {
        let record = self
            .trash
            .find_by_original_path(original_path)
            .await?
            .ok_or_else(|| VaultError::NotFound(original_path.to_string()))?;

        match self.fs.delete_file(Path::new(&record.trashed_path)).await {
            Ok(()) | Err(bridge_traits::BridgeError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(media_id) = record.media_id {
            if let Err(e) = self.source.delete(media_id).await {
                warn!(media_id, error = %e, "Failed to remove media source entry");
            }
        }

        self.trash.remove(original_path).await?;
        Ok(())
    }
}
