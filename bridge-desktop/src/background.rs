//! Background Task Scheduling Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{
        BackgroundScheduler, ExistingWorkPolicy, ProgressReporter, TaskConstraints, TaskId,
        TaskStatus, WorkContext, WorkFn, WorkProgress,
    },
    error::{BridgeError, Result},
    network::NetworkMonitor,
};
use core_async::sync::{watch, CancellationToken, RwLock};
use core_async::task::JoinHandle;
use core_async::time::{backoff_delay, sleep};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry behaviour for failed work units.
#[derive(Debug, Clone)]
pub struct SchedulerRetry {
    /// Total executions allowed, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// How often unmet constraints are re-checked.
    pub constraint_poll: Duration,
}

impl Default for SchedulerRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            constraint_poll: Duration::from_secs(5),
        }
    }
}

type TaskTable = Arc<RwLock<HashMap<TaskId, TaskInfo>>>;

/// Tokio-based unique-work scheduler for desktop hosts.
///
/// Each unique name maps to at most one live task. Work runs at least once
/// after its constraints hold and is retried with exponential backoff.
pub struct TokioBackgroundScheduler {
    tasks: TaskTable,
    names: Arc<RwLock<HashMap<String, TaskId>>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    retry: SchedulerRetry,
    sequence: AtomicU64,
}

struct TaskInfo {
    status: TaskStatus,
    cancel: CancellationToken,
    progress: ProgressReporter,
    handle: Option<JoinHandle<()>>,
}

impl TokioBackgroundScheduler {
    /// Create a scheduler with no network monitoring.
    pub fn new() -> Self {
        Self::with_network_monitor(None)
    }

    /// Create a scheduler that checks network constraints against `monitor`.
    pub fn with_network_monitor(monitor: Option<Arc<dyn NetworkMonitor>>) -> Self {
        Self::with_retry(monitor, SchedulerRetry::default())
    }

    pub fn with_retry(monitor: Option<Arc<dyn NetworkMonitor>>, retry: SchedulerRetry) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            names: Arc::new(RwLock::new(HashMap::new())),
            network_monitor: monitor,
            retry,
            sequence: AtomicU64::new(1),
        }
    }

    fn next_id(&self, name: &str) -> TaskId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        TaskId::new(format!("{}#{}", name, seq))
    }

    /// Finished states are terminal; late updates from a replaced task are dropped.
    async fn set_status(tasks: &TaskTable, id: &TaskId, status: TaskStatus) {
        let mut tasks = tasks.write().await;
        if let Some(info) = tasks.get_mut(id) {
            if !info.status.is_finished() {
                info.status = status;
            }
        }
    }

    async fn constraints_satisfied(
        monitor: Option<&Arc<dyn NetworkMonitor>>,
        constraints: &TaskConstraints,
    ) -> bool {
        if !(constraints.requires_network || constraints.requires_unmetered) {
            return true;
        }

        match monitor {
            Some(monitor) => monitor.allows_upload(constraints.requires_unmetered).await,
            None => {
                warn!(
                    "Network constraints requested but no monitor provided; assuming constraint satisfied"
                );
                true
            }
        }
    }

    /// Sleeps for `delay` unless cancelled first. Returns `false` on cancel.
    async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_task(
        tasks: TaskTable,
        id: TaskId,
        work: WorkFn,
        constraints: TaskConstraints,
        cancel: CancellationToken,
        progress: ProgressReporter,
        monitor: Option<Arc<dyn NetworkMonitor>>,
        retry: SchedulerRetry,
    ) {
        let mut attempt = 0u32;

        loop {
            while !Self::constraints_satisfied(monitor.as_ref(), &constraints).await {
                debug!(task_id = %id, "Constraints not satisfied; waiting");
                if !Self::pause(&cancel, retry.constraint_poll).await {
                    Self::set_status(&tasks, &id, TaskStatus::Cancelled).await;
                    return;
                }
            }

            Self::set_status(&tasks, &id, TaskStatus::Running).await;

            let ctx = WorkContext {
                task_id: id.clone(),
                cancel: cancel.clone(),
                progress: progress.clone(),
                attempt,
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(BridgeError::Cancelled),
                result = work(ctx) => result,
            };

            match result {
                Ok(()) => {
                    debug!(task_id = %id, attempt, "Background work succeeded");
                    Self::set_status(&tasks, &id, TaskStatus::Succeeded).await;
                    return;
                }
                Err(BridgeError::Cancelled) => {
                    debug!(task_id = %id, "Background work cancelled");
                    Self::set_status(&tasks, &id, TaskStatus::Cancelled).await;
                    return;
                }
                Err(err) if attempt + 1 < retry.max_attempts => {
                    let delay = backoff_delay(retry.initial_delay, attempt);
                    warn!(
                        task_id = %id,
                        attempt = attempt + 1,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Background work failed; retrying"
                    );
                    Self::set_status(&tasks, &id, TaskStatus::Enqueued).await;
                    if !Self::pause(&cancel, delay).await {
                        Self::set_status(&tasks, &id, TaskStatus::Cancelled).await;
                        return;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!(task_id = %id, error = %err, "Background work failed permanently");
                    Self::set_status(&tasks, &id, TaskStatus::Failed(err.to_string())).await;
                    return;
                }
            }
        }
    }

    async fn cancel_info(&self, id: &TaskId) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(info) => {
                info.cancel.cancel();
                if !info.status.is_finished() {
                    info.status = TaskStatus::Cancelled;
                }
                true
            }
            None => false,
        }
    }
}

impl Default for TokioBackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundScheduler for TokioBackgroundScheduler {
    async fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        constraints: TaskConstraints,
        work: WorkFn,
    ) -> Result<TaskId> {
        let mut names = self.names.write().await;

        if let Some(existing) = names.get(name).cloned() {
            let live = {
                let tasks = self.tasks.read().await;
                tasks
                    .get(&existing)
                    .map(|info| !info.status.is_finished())
                    .unwrap_or(false)
            };

            if live {
                match policy {
                    ExistingWorkPolicy::Keep => {
                        debug!(name, task_id = %existing, "Keeping existing work");
                        return Ok(existing);
                    }
                    ExistingWorkPolicy::Replace => {
                        info!(name, task_id = %existing, "Replacing existing work");
                        self.cancel_info(&existing).await;
                    }
                }
            }
        }

        let id = self.next_id(name);
        let cancel = CancellationToken::new();
        let (tx, _rx) = watch::channel(WorkProgress::default());
        let progress = ProgressReporter::new(tx);

        self.tasks.write().await.insert(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Enqueued,
                cancel: cancel.clone(),
                progress: progress.clone(),
                handle: None,
            },
        );
        names.insert(name.to_string(), id.clone());
        drop(names);

        debug!(name, task_id = %id, ?constraints, "Enqueued unique work");

        let handle = core_async::spawn(Self::run_task(
            Arc::clone(&self.tasks),
            id.clone(),
            work,
            constraints,
            cancel,
            progress,
            self.network_monitor.clone(),
            self.retry.clone(),
        ));

        if let Some(info) = self.tasks.write().await.get_mut(&id) {
            info.handle = Some(handle);
        }

        Ok(id)
    }

    async fn observe_progress(&self, task_id: &TaskId) -> Result<watch::Receiver<WorkProgress>> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|info| info.progress.subscribe())
            .ok_or_else(|| BridgeError::NotFound(format!("Task not found: {}", task_id)))
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::NotFound(format!("Task not found: {}", task_id)))
    }

    async fn task_for_name(&self, name: &str) -> Option<TaskId> {
        self.names.read().await.get(name).cloned()
    }

    async fn cancel(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = %task_id, "Cancelling task");
        if self.cancel_info(task_id).await {
            Ok(())
        } else {
            Err(BridgeError::NotFound(format!("Task not found: {}", task_id)))
        }
    }
}

impl Drop for TokioBackgroundScheduler {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.try_read() {
            for info in tasks.values() {
                info.cancel.cancel();
                if let Some(handle) = &info.handle {
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::background::work_fn;
    use bridge_traits::network::{NetworkInfo, NetworkStatus, NetworkType};
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn fast_retry() -> SchedulerRetry {
        SchedulerRetry {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            constraint_poll: Duration::from_millis(10),
        }
    }

    async fn wait_finished(scheduler: &TokioBackgroundScheduler, id: &TaskId) -> TaskStatus {
        for _ in 0..200 {
            let status = scheduler.task_status(id).await.unwrap();
            if status.is_finished() {
                return status;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} did not finish", id);
    }

    #[core_async::test]
    async fn test_enqueue_runs_work() {
        let scheduler = TokioBackgroundScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let id = scheduler
            .enqueue_unique(
                "media-resync",
                ExistingWorkPolicy::Replace,
                TaskConstraints::none(),
                work_fn(move |ctx| {
                    let counter = Arc::clone(&counter_clone);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        ctx.progress.report(1.0, 3);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        let progress = scheduler.observe_progress(&id).await.unwrap();
        assert_eq!(wait_finished(&scheduler, &id).await, TaskStatus::Succeeded);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(progress.borrow().item_count, 3);
        assert_eq!(scheduler.task_for_name("media-resync").await, Some(id));
    }

    #[core_async::test]
    async fn test_replace_cancels_running_work() {
        let scheduler = TokioBackgroundScheduler::new();

        let first = scheduler
            .enqueue_unique(
                "remote-upload:a",
                ExistingWorkPolicy::Replace,
                TaskConstraints::none(),
                work_fn(|ctx| async move {
                    ctx.cancel.cancelled().await;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(20)).await;

        let second = scheduler
            .enqueue_unique(
                "remote-upload:a",
                ExistingWorkPolicy::Replace,
                TaskConstraints::none(),
                work_fn(|_| async { Ok(()) }),
            )
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(
            scheduler.task_status(&first).await.unwrap(),
            TaskStatus::Cancelled
        );
        assert_eq!(wait_finished(&scheduler, &second).await, TaskStatus::Succeeded);
        assert_eq!(scheduler.task_for_name("remote-upload:a").await, Some(second));
    }

    #[core_async::test]
    async fn test_keep_returns_existing_task() {
        let scheduler = TokioBackgroundScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let make_work = |runs: Arc<AtomicUsize>| {
            work_fn(move |ctx| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    ctx.cancel.cancelled().await;
                    Ok(())
                }
            })
        };

        let first = scheduler
            .enqueue_unique(
                "remote-task-drain",
                ExistingWorkPolicy::Keep,
                TaskConstraints::none(),
                make_work(Arc::clone(&runs)),
            )
            .await
            .unwrap();
        let second = scheduler
            .enqueue_unique(
                "remote-task-drain",
                ExistingWorkPolicy::Keep,
                TaskConstraints::none(),
                make_work(Arc::clone(&runs)),
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        scheduler.cancel(&first).await.unwrap();
        assert_eq!(
            scheduler.task_status(&first).await.unwrap(),
            TaskStatus::Cancelled
        );
    }

    #[core_async::test]
    async fn test_failed_work_is_retried_with_attempt_counter() {
        let scheduler = TokioBackgroundScheduler::with_retry(None, fast_retry());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let id = scheduler
            .enqueue_unique(
                "flaky",
                ExistingWorkPolicy::Replace,
                TaskConstraints::none(),
                work_fn(move |ctx| {
                    let attempts = Arc::clone(&attempts_clone);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        if ctx.attempt < 2 {
                            Err(BridgeError::OperationFailed("transient".into()))
                        } else {
                            Ok(())
                        }
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(wait_finished(&scheduler, &id).await, TaskStatus::Succeeded);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[core_async::test]
    async fn test_exhausted_retries_report_failure() {
        let scheduler = TokioBackgroundScheduler::with_retry(None, fast_retry());

        let id = scheduler
            .enqueue_unique(
                "always-fails",
                ExistingWorkPolicy::Replace,
                TaskConstraints::none(),
                work_fn(|_| async { Err(BridgeError::OperationFailed("boom".into())) }),
            )
            .await
            .unwrap();

        match wait_finished(&scheduler, &id).await {
            TaskStatus::Failed(message) => assert!(message.contains("boom")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[core_async::test]
    async fn test_network_constraints_gate_execution() {
        let unmetered = Arc::new(AtomicBool::new(false));
        let monitor =
            Arc::new(TestNetworkMonitor::new(Arc::clone(&unmetered))) as Arc<dyn NetworkMonitor>;
        let scheduler = TokioBackgroundScheduler::with_retry(Some(monitor), fast_retry());

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let id = scheduler
            .enqueue_unique(
                "remote-upload:b",
                ExistingWorkPolicy::Replace,
                TaskConstraints::unmetered(),
                work_fn(move |_| {
                    let counter = Arc::clone(&counter_clone);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(
            scheduler.task_status(&id).await.unwrap(),
            TaskStatus::Enqueued
        );

        unmetered.store(true, Ordering::SeqCst);
        assert_eq!(wait_finished(&scheduler, &id).await, TaskStatus::Succeeded);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[core_async::test]
    async fn test_unknown_task_is_not_found() {
        let scheduler = TokioBackgroundScheduler::new();
        let id = TaskId::new("missing");
        assert!(matches!(
            scheduler.task_status(&id).await,
            Err(BridgeError::NotFound(_))
        ));
        assert!(scheduler.cancel(&id).await.is_err());
    }

    struct TestNetworkMonitor {
        unmetered: Arc<AtomicBool>,
    }

    impl TestNetworkMonitor {
        fn new(unmetered: Arc<AtomicBool>) -> Self {
            Self { unmetered }
        }
    }

    #[async_trait]
    impl NetworkMonitor for TestNetworkMonitor {
        async fn get_network_info(&self) -> Result<NetworkInfo> {
            let wifi = self.unmetered.load(Ordering::SeqCst);
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                network_type: Some(if wifi {
                    NetworkType::WiFi
                } else {
                    NetworkType::Cellular
                }),
                is_metered: !wifi,
            })
        }
    }
}
