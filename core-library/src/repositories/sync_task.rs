//! Sync task repository (`sync_tasks` table)

use std::sync::Arc;

use crate::error::Result;
use crate::models::{SyncTask, SyncTaskKind, SyncTaskRow, SyncTaskStatus};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use sqlx::{query, query_as, query_scalar, SqlitePool};

/// Persistence for pending remote changes
#[async_trait]
pub trait SyncTaskRepository: Send + Sync {
    /// Insert a new `Waiting` task and return its id
    async fn insert(
        &self,
        kind: SyncTaskKind,
        item_ids: &[String],
        album_id: Option<&str>,
    ) -> Result<i64>;

    async fn find_by_id(&self, id: i64) -> Result<Option<SyncTask>>;

    /// Atomically move the oldest `Waiting` task to `Processing`
    async fn claim_next(&self) -> Result<Option<SyncTask>>;

    /// `Processing -> Synced`
    async fn mark_synced(&self, id: i64) -> Result<bool>;

    /// `Processing -> Waiting`, bumping the attempt counter
    async fn mark_failed(&self, id: i64, error: &str) -> Result<bool>;

    /// Return tasks left in `Processing` by an interrupted run to `Waiting`
    async fn reset_processing(&self) -> Result<u64>;

    async fn count_by_status(&self, status: SyncTaskStatus) -> Result<u64>;

    async fn list_by_status(&self, status: SyncTaskStatus) -> Result<Vec<SyncTask>>;

    /// Delete `Synced` tasks last touched before `older_than` (seconds)
    async fn delete_synced(&self, older_than: i64) -> Result<u64>;
}

pub struct SqliteSyncTaskRepository {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteSyncTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Time source for `last_modified` stamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }
}

#[async_trait]
impl SyncTaskRepository for SqliteSyncTaskRepository {
    async fn insert(
        &self,
        kind: SyncTaskKind,
        item_ids: &[String],
        album_id: Option<&str>,
    ) -> Result<i64> {
        let items = serde_json::to_string(item_ids)?;

        let id = query(
            r#"
            INSERT INTO sync_tasks (status, kind, item_ids, album_id, attempts, last_modified)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(SyncTaskStatus::Waiting)
        .bind(kind)
        .bind(items)
        .bind(album_id)
        .bind(self.now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<SyncTask>> {
        let row = query_as::<_, SyncTaskRow>("SELECT * FROM sync_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncTask::try_from).transpose()
    }

    async fn claim_next(&self) -> Result<Option<SyncTask>> {
        let mut tx = self.pool.begin().await?;

        let row = query_as::<_, SyncTaskRow>(
            "SELECT * FROM sync_tasks WHERE status = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(SyncTaskStatus::Waiting)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut row) = row else {
            return Ok(None);
        };

        let now = self.now();
        query("UPDATE sync_tasks SET status = ?, last_modified = ? WHERE id = ?")
            .bind(SyncTaskStatus::Processing)
            .bind(now)
            .bind(row.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        row.status = SyncTaskStatus::Processing;
        row.last_modified = now;
        SyncTask::try_from(row).map(Some)
    }

    async fn mark_synced(&self, id: i64) -> Result<bool> {
        let result = query(
            "UPDATE sync_tasks SET status = ?, last_error = NULL, last_modified = ? WHERE id = ? AND status = ?",
        )
        .bind(SyncTaskStatus::Synced)
        .bind(self.now())
        .bind(id)
        .bind(SyncTaskStatus::Processing)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<bool> {
        let result = query(
            r#"
            UPDATE sync_tasks SET
                status = ?, attempts = attempts + 1, last_error = ?, last_modified = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(SyncTaskStatus::Waiting)
        .bind(error)
        .bind(self.now())
        .bind(id)
        .bind(SyncTaskStatus::Processing)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_processing(&self) -> Result<u64> {
        let result = query("UPDATE sync_tasks SET status = ?, last_modified = ? WHERE status = ?")
            .bind(SyncTaskStatus::Waiting)
            .bind(self.now())
            .bind(SyncTaskStatus::Processing)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: SyncTaskStatus) -> Result<u64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM sync_tasks WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn list_by_status(&self, status: SyncTaskStatus) -> Result<Vec<SyncTask>> {
        let rows = query_as::<_, SyncTaskRow>(
            "SELECT * FROM sync_tasks WHERE status = ? ORDER BY id ASC",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SyncTask::try_from).collect()
    }

    async fn delete_synced(&self, older_than: i64) -> Result<u64> {
        let result = query("DELETE FROM sync_tasks WHERE status = ? AND last_modified < ?")
            .bind(SyncTaskStatus::Synced)
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
