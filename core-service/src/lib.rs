//! Core service context and bootstrap helpers.
//!
//! [`CoreService`] is the one object a host keeps per process. It owns the
//! index database, the repositories, the secure folder and trash bin, and
//! the reconciliation and remote sync engines, all wired from a single
//! [`CoreConfig`]. Hosts clone the handle wherever they need it; nothing in
//! the core is global.
//!
//! Desktop hosts enable the `desktop-shims` feature to fall back to the
//! `bridge-desktop` HTTP client when no photo server or HTTP client is
//! injected.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::background::{BackgroundScheduler, ExistingWorkPolicy, TaskConstraints, TaskId};
use bridge_traits::http::HttpClient;
use bridge_traits::remote::{PhotoServer, Session};
use core_library::{
    create_pool, CustomAlbumRepository, DatabaseConfig, MediaRepository, SqliteCustomAlbumRepository,
    SqliteDuplicateRepository, SqliteMediaRepository, SqliteSecureMappingRepository,
    SqliteTagRepository, SqliteTrashRepository, TagRepository, TrashRepository,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{
    AlbumFeed, ReconciliationEngine, RemoteSyncConfig, RemoteSyncEngine, ResyncKind, RetryPolicy,
    SyncError, SyncTaskQueue,
};
use core_vault::{
    LegacyVaultMigration, SecureFolderManager, TrashBin, VaultCipher, VaultKey, VaultLayout,
};
use provider_immich::ImmichClient;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

pub use core_sync::{upload_work_name, INCREMENTAL_RESYNC_WORK, RESYNC_WORK, TASK_DRAIN_WORK};

/// Point-in-time counters for host diagnostics screens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreStatus {
    pub indexed: i64,
    pub secured: i64,
    pub trashed: i64,
    pub sync_tasks_waiting: u64,
    pub sync_tasks_processing: u64,
    pub remote_enabled: bool,
    pub background_enabled: bool,
}

/// Process-wide gallery core context.
#[derive(Clone)]
pub struct CoreService {
    config: CoreConfig,
    pool: SqlitePool,
    event_bus: EventBus,
    media: Arc<dyn MediaRepository>,
    tags: Arc<dyn TagRepository>,
    custom_albums: Arc<dyn CustomAlbumRepository>,
    trash_records: Arc<dyn TrashRepository>,
    secure_folder: Arc<SecureFolderManager>,
    legacy_vault: Arc<LegacyVaultMigration>,
    trash: Arc<TrashBin>,
    tasks: Arc<SyncTaskQueue>,
    reconciler: Arc<ReconciliationEngine>,
    remote: Option<Arc<RemoteSyncEngine>>,
    album_feed: Arc<AlbumFeed>,
}

impl CoreService {
    /// Open the index, load the vault key and build every engine.
    ///
    /// Sync tasks left in `Processing` by a previous process are returned to
    /// the queue, and plaintext left in the secure folder by older releases
    /// is encrypted in place.
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let event_bus = EventBus::default();

        let media: Arc<dyn MediaRepository> = Arc::new(SqliteMediaRepository::new(pool.clone()));
        let mappings = Arc::new(SqliteSecureMappingRepository::new(pool.clone()));
        let trash_records: Arc<dyn TrashRepository> =
            Arc::new(SqliteTrashRepository::new(pool.clone()));

        let tasks = Arc::new(SyncTaskQueue::with_clock(
            pool.clone(),
            Arc::clone(&config.clock),
        ));
        let recovered = tasks.recover_interrupted().await?;
        if recovered > 0 {
            info!(recovered, "Requeued sync tasks interrupted by a previous run");
        }

        let key = VaultKey::load_or_create(config.secure_store.as_ref()).await?;
        let cipher = VaultCipher::new(&key);
        let layout = VaultLayout::new(&config.secure_dir, &config.restore_dir);

        let secure_folder = Arc::new(
            SecureFolderManager::new(
                Arc::clone(&media),
                mappings.clone(),
                Arc::clone(&config.media_source),
                Arc::clone(&config.file_system),
                cipher.clone(),
                layout.clone(),
                event_bus.clone(),
            )
            .with_clock(Arc::clone(&config.clock)),
        );
        let legacy_vault = Arc::new(
            LegacyVaultMigration::new(
                mappings,
                Arc::clone(&config.file_system),
                cipher,
                layout,
                event_bus.clone(),
            )
            .with_clock(Arc::clone(&config.clock)),
        );
        migrate_legacy_vault(&legacy_vault).await;
        let trash = Arc::new(TrashBin::new(
            Arc::clone(&media),
            Arc::clone(&trash_records),
            Arc::clone(&config.media_source),
            Arc::clone(&config.file_system),
            &config.trash_dir,
            event_bus.clone(),
        )
        .with_clock(Arc::clone(&config.clock)));

        let reconciler = Arc::new(
            ReconciliationEngine::new(
                Arc::clone(&config.media_source),
                Arc::clone(&media),
                event_bus.clone(),
                config.chunk_size,
            )
            .with_task_queue(Arc::clone(&tasks)),
        );

        let remote = if config.features.enable_remote_sync {
            let server = photo_server(&config)?;
            Some(Arc::new(remote_engine(
                &config,
                server,
                Arc::clone(&media),
                Arc::new(SqliteDuplicateRepository::new(pool.clone())),
                Arc::clone(&tasks),
                event_bus.clone(),
            )))
        } else {
            None
        };

        info!(
            remote_sync = remote.is_some(),
            background_sync = config.features.enable_background_sync,
            chunk_size = config.chunk_size,
            "Gallery core ready"
        );

        Ok(Self {
            tags: Arc::new(SqliteTagRepository::new(pool.clone())),
            custom_albums: Arc::new(SqliteCustomAlbumRepository::new(pool.clone())),
            album_feed: Arc::new(AlbumFeed::new(Arc::clone(&media))),
            config,
            pool,
            event_bus,
            media,
            trash_records,
            secure_folder,
            legacy_vault,
            trash,
            tasks,
            reconciler,
            remote,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn media(&self) -> Arc<dyn MediaRepository> {
        Arc::clone(&self.media)
    }

    pub fn tags(&self) -> Arc<dyn TagRepository> {
        Arc::clone(&self.tags)
    }

    pub fn custom_albums(&self) -> Arc<dyn CustomAlbumRepository> {
        Arc::clone(&self.custom_albums)
    }

    pub fn secure_folder(&self) -> Arc<SecureFolderManager> {
        Arc::clone(&self.secure_folder)
    }

    /// Encrypts secure folder items stored in plaintext by older releases.
    pub fn legacy_vault(&self) -> Arc<LegacyVaultMigration> {
        Arc::clone(&self.legacy_vault)
    }

    pub fn trash(&self) -> Arc<TrashBin> {
        Arc::clone(&self.trash)
    }

    pub fn sync_tasks(&self) -> Arc<SyncTaskQueue> {
        Arc::clone(&self.tasks)
    }

    pub fn reconciler(&self) -> Arc<ReconciliationEngine> {
        Arc::clone(&self.reconciler)
    }

    pub fn album_feed(&self) -> Arc<AlbumFeed> {
        Arc::clone(&self.album_feed)
    }

    /// The remote sync engine, if remote sync is enabled.
    pub fn remote(&self) -> Result<Arc<RemoteSyncEngine>> {
        self.remote.clone().ok_or_else(|| {
            SyncError::NotConfigured("remote sync is disabled".to_string()).into()
        })
    }

    fn scheduler(&self) -> Result<&Arc<dyn BackgroundScheduler>> {
        self.config.background_scheduler.as_ref().ok_or_else(|| {
            CoreError::missing(
                "BackgroundScheduler",
                "Scheduling work needs a BackgroundScheduler in the configuration.",
            )
        })
    }

    /// Log in with the configured server credentials.
    pub async fn login_remote(&self) -> Result<Session> {
        let remote = self.remote()?;
        let (Some(email), Some(password)) = (
            self.config.remote.email.as_deref(),
            self.config.remote.password.as_deref(),
        ) else {
            return Err(SyncError::NotConfigured("no server credentials".to_string()).into());
        };
        Ok(remote.login(email, password).await?)
    }

    /// Schedule a resync under its unique work name. A resync of the same
    /// kind that is already queued or running is replaced; the new run
    /// starts once the cancelled one has let go.
    pub async fn schedule_resync(&self, kind: ResyncKind) -> Result<TaskId> {
        let name = match kind {
            ResyncKind::Full => RESYNC_WORK,
            ResyncKind::Incremental => INCREMENTAL_RESYNC_WORK,
        };
        let task_id = self
            .scheduler()?
            .enqueue_unique(
                name,
                ExistingWorkPolicy::Replace,
                TaskConstraints::none(),
                self.reconciler.work(kind),
            )
            .await?;
        info!(task_id = %task_id.as_str(), %kind, "Scheduled resync");
        Ok(task_id)
    }

    /// Schedule a drain of the sync-task queue, replacing a queued or
    /// running one.
    pub async fn schedule_task_drain(&self) -> Result<TaskId> {
        let remote = self.remote()?;
        let constraints = if self.config.remote.unmetered_only {
            TaskConstraints::unmetered()
        } else {
            TaskConstraints::network()
        };
        let task_id = self
            .scheduler()?
            .enqueue_unique(
                TASK_DRAIN_WORK,
                ExistingWorkPolicy::Replace,
                constraints,
                remote.drain_work(),
            )
            .await?;
        Ok(task_id)
    }

    /// Queue the work a freshly started process should run: an incremental
    /// resync and, with remote sync on, a task-queue drain.
    pub async fn start_background_work(&self) -> Result<Vec<TaskId>> {
        if !self.config.features.enable_background_sync {
            return Ok(Vec::new());
        }
        let mut scheduled = vec![self.schedule_resync(ResyncKind::Incremental).await?];
        if self.remote.is_some() {
            scheduled.push(self.schedule_task_drain().await?);
        }
        Ok(scheduled)
    }

    pub async fn status(&self) -> Result<CoreStatus> {
        let stats = self.tasks.stats().await?;
        Ok(CoreStatus {
            indexed: self.media.count().await?,
            secured: self.secure_folder.secured_count().await?,
            trashed: self.trash_records.count().await?,
            sync_tasks_waiting: stats.waiting,
            sync_tasks_processing: stats.processing,
            remote_enabled: self.remote.is_some(),
            background_enabled: self.config.features.enable_background_sync,
        })
    }

    /// Close the database pool. Other clones of this handle must not be
    /// used afterwards.
    pub async fn shutdown(&self) {
        self.pool.close().await;
        info!("Gallery core shut down");
    }
}

/// Items that fail stay not migrated and are retried on the next start.
async fn migrate_legacy_vault(migration: &LegacyVaultMigration) {
    let status = match migration.detect().await {
        Ok(status) => status,
        Err(e) => {
            warn!(error = %e, "Could not inspect the secure folder for legacy items");
            return;
        }
    };
    if !status.needs_migration() {
        return;
    }
    info!(legacy = status.legacy, "Encrypting legacy secure folder items");
    if let Err(e) = migration.run().await {
        warn!(error = %e, "Secure folder migration failed");
    }
}

fn photo_server(config: &CoreConfig) -> Result<Arc<dyn PhotoServer>> {
    if let Some(server) = &config.photo_server {
        return Ok(Arc::clone(server));
    }
    let url = config
        .remote
        .server_url
        .as_deref()
        .ok_or_else(|| CoreError::missing("PhotoServer", "No server URL configured."))?;
    let http = match &config.http_client {
        Some(client) => Arc::clone(client),
        None => default_http_client()?,
    };
    let client = ImmichClient::new(http, url)?;
    Ok(Arc::new(client))
}

#[cfg(feature = "desktop-shims")]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new()?);
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(CoreError::missing(
        "HttpClient",
        "Remote sync needs an HttpClient. Desktop: enable the 'desktop-shims' feature.",
    ))
}

fn remote_engine(
    config: &CoreConfig,
    server: Arc<dyn PhotoServer>,
    media: Arc<dyn MediaRepository>,
    duplicates: Arc<SqliteDuplicateRepository>,
    tasks: Arc<SyncTaskQueue>,
    event_bus: EventBus,
) -> RemoteSyncEngine {
    let sync_config = RemoteSyncConfig {
        device_id: config.remote.device_id.clone(),
        retry: RetryPolicy::new(
            config.remote.retry_initial_delay,
            config.remote.retry_max_attempts,
        ),
        unmetered_only: config.remote.unmetered_only,
    };
    let mut engine = RemoteSyncEngine::new(
        server,
        media,
        duplicates,
        tasks,
        Arc::clone(&config.file_system),
        sync_config,
        event_bus,
    )
    .with_clock(Arc::clone(&config.clock));
    if let Some(scheduler) = &config.background_scheduler {
        engine = engine.with_scheduler(Arc::clone(scheduler));
    }
    if let Some(network) = &config.network_monitor {
        engine = engine.with_network_monitor(Arc::clone(network));
    }
    engine
}
