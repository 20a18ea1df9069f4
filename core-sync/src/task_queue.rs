//! Sync task queue
//!
//! Pending remote changes persisted in `sync_tasks`. Tasks move
//! `Waiting -> Processing -> Synced`; a failed attempt puts the task back to
//! `Waiting` with its attempt counter bumped so a later drain retries it.

use std::sync::Arc;

use bridge_traits::time::{Clock, SystemClock};
use core_async::time::Duration;
use core_library::models::{SyncTask, SyncTaskKind, SyncTaskStats, SyncTaskStatus};
use core_library::repositories::{SqliteSyncTaskRepository, SyncTaskRepository};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

pub struct SyncTaskQueue {
    repository: Arc<dyn SyncTaskRepository>,
    clock: Arc<dyn Clock>,
}

impl SyncTaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Queue whose task stamps and cleanup cutoffs read `clock`.
    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository: Arc::new(SqliteSyncTaskRepository::new(pool).with_clock(Arc::clone(&clock))),
            clock,
        }
    }

    /// Create a queue over a custom repository
    pub fn with_repository(repository: Arc<dyn SyncTaskRepository>) -> Self {
        Self {
            repository,
            clock: Arc::new(SystemClock),
        }
    }

    /// Enqueue a task. Empty item lists are not persisted.
    pub async fn enqueue(
        &self,
        kind: SyncTaskKind,
        item_ids: &[String],
        album_id: Option<&str>,
    ) -> Result<Option<i64>> {
        if item_ids.is_empty() {
            return Ok(None);
        }

        let id = self.repository.insert(kind, item_ids, album_id).await?;
        info!(
            task_id = id,
            kind = %kind,
            items = item_ids.len(),
            album = ?album_id,
            "Enqueued sync task"
        );
        Ok(Some(id))
    }

    /// Claim the oldest waiting task.
    pub async fn dequeue(&self) -> Result<Option<SyncTask>> {
        let task = self.repository.claim_next().await?;
        if let Some(task) = &task {
            debug!(
                task_id = task.id,
                kind = %task.kind,
                attempts = task.attempts,
                "Dequeued sync task"
            );
        }
        Ok(task)
    }

    pub async fn mark_complete(&self, task_id: i64) -> Result<()> {
        if !self.repository.mark_synced(task_id).await? {
            return Err(SyncError::TaskNotFound { task_id });
        }
        info!(task_id, "Sync task completed");
        Ok(())
    }

    pub async fn mark_failed(&self, task_id: i64, error: &str) -> Result<()> {
        if !self.repository.mark_failed(task_id, error).await? {
            return Err(SyncError::TaskNotFound { task_id });
        }
        let attempts = self
            .repository
            .find_by_id(task_id)
            .await?
            .map(|t| t.attempts)
            .unwrap_or_default();
        warn!(task_id, attempts, error, "Sync task failed, will retry");
        Ok(())
    }

    /// Return tasks a previous process left in `Processing` to `Waiting`.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let reset = self.repository.reset_processing().await?;
        if reset > 0 {
            info!(reset, "Recovered interrupted sync tasks");
        }
        Ok(reset)
    }

    pub async fn get(&self, task_id: i64) -> Result<Option<SyncTask>> {
        Ok(self.repository.find_by_id(task_id).await?)
    }

    pub async fn waiting(&self) -> Result<Vec<SyncTask>> {
        Ok(self.repository.list_by_status(SyncTaskStatus::Waiting).await?)
    }

    pub async fn stats(&self) -> Result<SyncTaskStats> {
        Ok(SyncTaskStats {
            waiting: self
                .repository
                .count_by_status(SyncTaskStatus::Waiting)
                .await?,
            processing: self
                .repository
                .count_by_status(SyncTaskStatus::Processing)
                .await?,
            synced: self
                .repository
                .count_by_status(SyncTaskStatus::Synced)
                .await?,
        })
    }

    /// Delete synced tasks older than `retention`.
    pub async fn cleanup_synced(&self, retention: Duration) -> Result<u64> {
        let cutoff = self.clock.unix_timestamp() - retention.as_secs() as i64;
        let deleted = self.repository.delete_synced(cutoff).await?;
        info!(deleted_count = deleted, "Cleaned up synced tasks");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::create_test_pool;

    async fn queue() -> SyncTaskQueue {
        SyncTaskQueue::new(create_test_pool().await.unwrap())
    }

    #[core_async::test]
    async fn test_empty_items_are_not_enqueued() {
        let queue = queue().await;
        assert!(queue
            .enqueue(SyncTaskKind::Delete, &[], None)
            .await
            .unwrap()
            .is_none());
        assert_eq!(queue.stats().await.unwrap().pending(), 0);
    }

    #[core_async::test]
    async fn test_lifecycle_and_stats() {
        let queue = queue().await;
        let id = queue
            .enqueue(SyncTaskKind::Upload, &["1".into()], Some("folder:/DCIM"))
            .await
            .unwrap()
            .unwrap();

        let task = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(task.id, id);
        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.waiting, stats.processing), (0, 1));

        queue.mark_failed(id, "timeout").await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().unwrap().attempts, 1);
        assert_eq!(queue.waiting().await.unwrap().len(), 1);

        queue.dequeue().await.unwrap();
        queue.mark_complete(id).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().synced, 1);
        assert!(matches!(
            queue.mark_complete(id).await,
            Err(SyncError::TaskNotFound { .. })
        ));

        assert_eq!(queue.cleanup_synced(Duration::from_secs(3600)).await.unwrap(), 0);
        // A cutoff in the future catches everything
        let removed = queue
            .repository
            .delete_synced(chrono::Utc::now().timestamp() + 10)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[core_async::test]
    async fn test_cleanup_cutoff_follows_clock() {
        let pool = create_test_pool().await.unwrap();
        let day = 24 * 3600;
        let queue = SyncTaskQueue::with_clock(
            pool.clone(),
            Arc::new(bridge_traits::time::FixedClock::at_unix(1_700_000_000)),
        );
        let id = queue
            .enqueue(SyncTaskKind::Delete, &["c.jpg-7".into()], None)
            .await
            .unwrap()
            .unwrap();
        queue.dequeue().await.unwrap();
        queue.mark_complete(id).await.unwrap();
        assert_eq!(queue.cleanup_synced(Duration::from_secs(day)).await.unwrap(), 0);

        let later = SyncTaskQueue::with_clock(
            pool,
            Arc::new(bridge_traits::time::FixedClock::at_unix(1_700_000_000 + 2 * day as i64)),
        );
        assert_eq!(later.cleanup_synced(Duration::from_secs(day)).await.unwrap(), 1);
        assert!(later.get(id).await.unwrap().is_none());
    }

    #[core_async::test]
    async fn test_recover_interrupted() {
        let queue = queue().await;
        queue
            .enqueue(SyncTaskKind::Update, &["4".into()], None)
            .await
            .unwrap();
        queue.dequeue().await.unwrap();

        assert_eq!(queue.recover_interrupted().await.unwrap(), 1);
        assert!(queue.dequeue().await.unwrap().is_some());
    }
}
