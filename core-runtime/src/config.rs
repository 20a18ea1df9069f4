//! # Core Configuration Module
//!
//! Configuration for the gallery core.
//!
//! ## Overview
//!
//! A [`CoreConfig`] carries every setting and injected bridge the core needs.
//! It is built once at process start with [`CoreConfigBuilder`] and handed to
//! `core_service::CoreService`, which passes the pieces down to each engine.
//! Validation fails fast with actionable messages when a bridge is missing.
//!
//! ## Required Dependencies
//!
//! - `MediaSource` - the platform media registry
//! - `FileSystemAccess` - private file storage (desktop default: tokio fs)
//! - `SecureStore` - vault key and server credentials (desktop default: keyring)
//!
//! ## Optional Dependencies
//!
//! - `PhotoServer` or `HttpClient` - remote sync (required when enabled)
//! - `BackgroundScheduler` - background resync/upload (required when enabled)
//! - `NetworkMonitor` - connectivity gating for uploads
//! - `Clock` - defaults to the system clock
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/gallery/index.db")
//!     .secure_dir("/data/gallery/secure")
//!     .trash_dir("/data/gallery/trash")
//!     .restore_dir("/sdcard/Pictures/Restored")
//!     .media_source(Arc::new(MyMediaStore))
//!     .chunk_size(500)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    BackgroundScheduler, Clock, FileSystemAccess, HttpClient, MediaSource, NetworkMonitor,
    PhotoServer, SecureStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default number of media rows fetched and committed per transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Upper bound for `chunk_size`.
pub const MAX_CHUNK_SIZE: usize = 5_000;

/// Remote server settings.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL of the photo server, e.g. `https://photos.example.org`
    pub server_url: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Identifier this device reports with uploads
    pub device_id: String,
    /// First retry delay; doubled on every further attempt
    pub retry_initial_delay: Duration,
    /// Total attempts before surfacing an error state
    pub retry_max_attempts: u32,
    /// Only upload over unmetered networks
    pub unmetered_only: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            email: None,
            password: None,
            device_id: "gallery-core".to_string(),
            retry_initial_delay: Duration::from_secs(1),
            retry_max_attempts: 5,
            unmetered_only: true,
        }
    }
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("server_url", &self.server_url)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("device_id", &self.device_id)
            .field("retry_initial_delay", &self.retry_initial_delay)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("unmetered_only", &self.unmetered_only)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Mirror albums to the remote photo server
    pub enable_remote_sync: bool,

    /// Register resync and upload work with the background scheduler
    pub enable_background_sync: bool,
}

/// Core configuration for the gallery core.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// App-private directory holding encrypted secure-folder files
    pub secure_dir: PathBuf,

    /// Directory trashed files are moved into
    pub trash_dir: PathBuf,

    /// Directory files restored from the secure folder are written to
    pub restore_dir: PathBuf,

    /// Rows per reconciliation chunk transaction
    pub chunk_size: usize,

    pub remote: RemoteConfig,

    pub media_source: Arc<dyn MediaSource>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub secure_store: Arc<dyn SecureStore>,
    pub http_client: Option<Arc<dyn HttpClient>>,
    pub photo_server: Option<Arc<dyn PhotoServer>>,
    pub background_scheduler: Option<Arc<dyn BackgroundScheduler>>,
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub clock: Arc<dyn Clock>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn present<T: ?Sized>(value: &Option<Arc<T>>, name: &'static str) -> Option<&'static str> {
            value.as_ref().map(|_| name)
        }

        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("secure_dir", &self.secure_dir)
            .field("trash_dir", &self.trash_dir)
            .field("restore_dir", &self.restore_dir)
            .field("chunk_size", &self.chunk_size)
            .field("remote", &self.remote)
            .field("media_source", &"MediaSource { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("http_client", &present(&self.http_client, "HttpClient { ... }"))
            .field("photo_server", &present(&self.photo_server, "PhotoServer { ... }"))
            .field(
                "background_scheduler",
                &present(&self.background_scheduler, "BackgroundScheduler { ... }"),
            )
            .field(
                "network_monitor",
                &present(&self.network_monitor, "NetworkMonitor { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("Database path", &self.database_path),
            ("Secure directory", &self.secure_dir),
            ("Trash directory", &self.trash_dir),
            ("Restore directory", &self.restore_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{} cannot be empty", name)));
            }
        }

        if self.secure_dir == self.trash_dir || self.secure_dir == self.restore_dir {
            return Err(Error::Config(
                "Secure directory must not be shared with the trash or restore directory"
                    .to_string(),
            ));
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "Chunk size must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }

        if self.remote.retry_max_attempts == 0 || self.remote.retry_max_attempts > 20 {
            return Err(Error::Config(
                "Remote retry attempts must be between 1 and 20".to_string(),
            ));
        }

        if self.remote.retry_initial_delay.is_zero() {
            return Err(Error::Config(
                "Remote retry delay must be greater than 0".to_string(),
            ));
        }

        if self.features.enable_remote_sync {
            if self.remote.server_url.as_deref().map_or(true, str::is_empty) {
                return Err(Error::Config(
                    "Remote sync enabled but no server URL configured. \
                     Use .server_url() or disable remote sync."
                        .to_string(),
                ));
            }

            if self.photo_server.is_none() && self.http_client.is_none() {
                return Err(Error::missing(
                    "PhotoServer",
                    "Remote sync needs either a PhotoServer or an HttpClient to build one. \
                     Desktop: enable the 'desktop-shims' feature. \
                     Mobile: inject the platform HTTP adapter.",
                ));
            }
        }

        if self.features.enable_background_sync && self.background_scheduler.is_none() {
            return Err(Error::missing(
                "BackgroundScheduler",
                "Background sync enabled but no BackgroundScheduler provided. \
                 Android: inject the WorkManager adapter. \
                 Desktop: use bridge_desktop::TokioBackgroundScheduler.",
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    let store: Arc<dyn SecureStore> = Arc::new(bridge_desktop::KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(Error::missing(
        "SecureStore",
        "SecureStore implementation is required for the vault key. \
         Desktop: enable the 'desktop-shims' feature to use KeyringSecureStore. \
         Android: inject the Keystore adapter.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(database_path: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    let data_dir = database_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let fs: Arc<dyn FileSystemAccess> = Arc::new(bridge_desktop::TokioFileSystem::new(data_dir));
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(_database_path: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::missing(
        "FileSystemAccess",
        "FileSystemAccess implementation is required for the secure folder and trash. \
         Desktop: enable the 'desktop-shims' feature to use TokioFileSystem.",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    secure_dir: Option<PathBuf>,
    trash_dir: Option<PathBuf>,
    restore_dir: Option<PathBuf>,
    chunk_size: Option<usize>,
    remote: RemoteConfig,
    media_source: Option<Arc<dyn MediaSource>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    photo_server: Option<Arc<dyn PhotoServer>>,
    background_scheduler: Option<Arc<dyn BackgroundScheduler>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the database path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/data/gallery/index.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the secure-folder directory. Defaults to `secure/` next to the database.
    pub fn secure_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.secure_dir = Some(path.into());
        self
    }

    /// Sets the trash directory. Defaults to `trash/` next to the database.
    pub fn trash_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.trash_dir = Some(path.into());
        self
    }

    /// Sets where restored secure items are written. Defaults to `restored/`.
    pub fn restore_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.restore_dir = Some(path.into());
        self
    }

    /// Rows per reconciliation chunk. Default: 500.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.remote.server_url = Some(url.into());
        self
    }

    pub fn server_credentials(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.remote.email = Some(email.into());
        self.remote.password = Some(password.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.remote.device_id = device_id.into();
        self
    }

    /// Retry policy for album refresh. Default: 1s initial delay, 5 attempts.
    pub fn remote_retry(mut self, initial_delay: Duration, max_attempts: u32) -> Self {
        self.remote.retry_initial_delay = initial_delay;
        self.remote.retry_max_attempts = max_attempts;
        self
    }

    /// Upload only on unmetered networks. Default: true.
    pub fn unmetered_only(mut self, enabled: bool) -> Self {
        self.remote.unmetered_only = enabled;
        self
    }

    pub fn media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Overrides the photo server built from `http_client`.
    pub fn photo_server(mut self, server: Arc<dyn PhotoServer>) -> Self {
        self.photo_server = Some(server);
        self
    }

    pub fn background_scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.background_scheduler = Some(scheduler);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn enable_remote_sync(mut self, enabled: bool) -> Self {
        self.features.enable_remote_sync = enabled;
        self
    }

    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    /// Builds and validates the final `CoreConfig`.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let media_source = self.media_source.ok_or_else(|| {
            Error::missing(
                "MediaSource",
                "A MediaSource is required to reconcile the media index. \
                 Android: inject the MediaStore adapter.",
            )
        })?;

        let base_dir = database_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&database_path)?,
        };

        let config = CoreConfig {
            secure_dir: self.secure_dir.unwrap_or_else(|| base_dir.join("secure")),
            trash_dir: self.trash_dir.unwrap_or_else(|| base_dir.join("trash")),
            restore_dir: self.restore_dir.unwrap_or_else(|| base_dir.join("restored")),
            database_path,
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            remote: self.remote,
            media_source,
            file_system,
            secure_store,
            http_client: self.http_client,
            photo_server: self.photo_server,
            background_scheduler: self.background_scheduler,
            network_monitor: self.network_monitor,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
