//! Background Scheduling
//!
//! Unique, constraint-gated background work. The core hands the scheduler an
//! idempotent, retryable unit of work under a stable name; the scheduler runs
//! it at least once when its constraints hold.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use core_async::sync::{watch, CancellationToken};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Task execution constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConstraints {
    /// Require any network connection
    pub requires_network: bool,
    /// Require an unmetered connection (uploads)
    pub requires_unmetered: bool,
    /// Require device to be charging
    pub requires_charging: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self::none()
    }
}

impl TaskConstraints {
    /// No gating at all; used for local index work.
    pub fn none() -> Self {
        Self {
            requires_network: false,
            requires_unmetered: false,
            requires_charging: false,
        }
    }

    /// Any network connection.
    pub fn network() -> Self {
        Self {
            requires_network: true,
            ..Self::none()
        }
    }

    /// Unmetered network only.
    pub fn unmetered() -> Self {
        Self {
            requires_network: true,
            requires_unmetered: true,
            ..Self::none()
        }
    }
}

/// What to do when work with the same unique name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistingWorkPolicy {
    /// Cancel the existing work and start the new one.
    Replace,
    /// Leave the existing work running and drop the new request.
    Keep,
}

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting for constraints or a retry delay
    Enqueued,
    /// Currently executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Failed after exhausting retries
    Failed(String),
    /// Cancelled or replaced
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed(_) | TaskStatus::Cancelled
        )
    }
}

/// Progress published by running work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkProgress {
    /// Completion in `[0.0, 1.0]`.
    pub fraction: f32,
    pub item_count: u64,
}

/// Handle given to work for publishing progress.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<WorkProgress>>,
}

impl ProgressReporter {
    pub fn new(tx: watch::Sender<WorkProgress>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    /// A reporter nobody observes.
    pub fn detached() -> Self {
        let (tx, _rx) = watch::channel(WorkProgress::default());
        Self::new(tx)
    }

    pub fn report(&self, fraction: f32, item_count: u64) {
        let progress = WorkProgress {
            fraction: fraction.clamp(0.0, 1.0),
            item_count,
        };
        self.tx.send_replace(progress);
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> WorkProgress {
        *self.tx.borrow()
    }
}

/// Everything a unit of work receives when it runs.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub task_id: TaskId,
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
    /// Zero-based execution attempt.
    pub attempt: u32,
}

pub type WorkFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Idempotent unit of work; invoked once per attempt.
pub type WorkFn = Arc<dyn Fn(WorkContext) -> WorkFuture + Send + Sync>;

/// Builds a [`WorkFn`] from an async closure.
pub fn work_fn<F, Fut>(f: F) -> WorkFn
where
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Background work scheduler
///
/// - **Android**: WorkManager unique work
/// - **Desktop**: Tokio tasks (`bridge_desktop::TokioBackgroundScheduler`)
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{work_fn, BackgroundScheduler, ExistingWorkPolicy, TaskConstraints};
///
/// async fn schedule(scheduler: &dyn BackgroundScheduler) -> Result<()> {
///     scheduler
///         .enqueue_unique(
///             "media-resync",
///             ExistingWorkPolicy::Replace,
///             TaskConstraints::none(),
///             work_fn(|ctx| async move {
///                 ctx.progress.report(1.0, 0);
///                 Ok(())
///             }),
///         )
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Enqueue work under a unique name.
    ///
    /// With [`ExistingWorkPolicy::Keep`] and unfinished work of the same name,
    /// the existing task id is returned and `work` is dropped.
    async fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        constraints: TaskConstraints,
        work: WorkFn,
    ) -> Result<TaskId>;

    /// Stream of progress snapshots for a task.
    async fn observe_progress(&self, task_id: &TaskId) -> Result<watch::Receiver<WorkProgress>>;

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// Latest task enqueued under `name`, if any.
    async fn task_for_name(&self, name: &str) -> Option<TaskId>;

    async fn cancel(&self, task_id: &TaskId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_constraints() {
        let constraints = TaskConstraints::unmetered();
        assert!(constraints.requires_network);
        assert!(constraints.requires_unmetered);
        assert!(!constraints.requires_charging);
        assert_eq!(TaskConstraints::default(), TaskConstraints::none());
    }

    #[test]
    fn test_progress_reporter_clamps() {
        let reporter = ProgressReporter::detached();
        let rx = reporter.subscribe();
        reporter.report(1.4, 3);
        assert_eq!(rx.borrow().fraction, 1.0);
        assert_eq!(rx.borrow().item_count, 3);
    }

    #[test]
    fn test_task_status_finished() {
        assert!(TaskStatus::Succeeded.is_finished());
        assert!(TaskStatus::Failed("x".into()).is_finished());
        assert!(!TaskStatus::Running.is_finished());
    }
}
