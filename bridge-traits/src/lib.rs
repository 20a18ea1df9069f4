//! # Host Bridge Traits
//!
//! Contracts between the gallery core and the host platform.
//!
//! The core never talks to the platform media registry, the photo server, the
//! OS work scheduler or the keystore directly. Each of those collaborators is
//! described here as an async trait and injected at startup through
//! `core_runtime::config::CoreConfig`.
//!
//! ## Traits
//!
//! ### Media
//! - [`MediaSource`](media_source::MediaSource) - The platform's authoritative media registry
//! - [`PhotoServer`](remote::PhotoServer) - Remote backup server (albums, uploads)
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP with multipart uploads
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O inside the app sandbox
//!
//! ### Security
//! - [`SecureStore`](storage::SecureStore) - Keystore-backed secret persistence
//!
//! ### Platform Integration
//! - [`BackgroundScheduler`](background::BackgroundScheduler) - Unique, constraint-gated background work
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and metered network detection
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Every trait returns [`BridgeError`](error::BridgeError). Implementations
//! convert platform failures into it and never panic across the boundary.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared between
//! the reconciliation, vault and remote sync tasks.

pub mod background;
pub mod error;
pub mod http;
pub mod media_source;
pub mod network;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use background::{
    BackgroundScheduler, ExistingWorkPolicy, ProgressReporter, TaskConstraints, TaskId,
    TaskStatus, WorkContext, WorkFn, WorkProgress,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartPart};
pub use media_source::{ColumnValue, IdFilter, MediaColumn, MediaQuery, MediaRow, MediaSource};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use remote::{AlbumUpdate, PhotoServer, RemoteAlbum, RemoteAsset, Session, UploadRequest, UploadedAsset};
pub use storage::{FileMetadata, FileSystemAccess, SecureStore};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
