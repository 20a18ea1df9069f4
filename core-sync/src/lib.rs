//! # Media Sync
//!
//! Keeps the local media index aligned with the platform media source and
//! mirrors selected albums to the remote photo server.
//!
//! ## Components
//!
//! - **Reconciliation Engine** (`reconcile`): full and incremental resync in
//!   chunked transactions with monotonic progress
//! - **Chunk Progress** (`progress`): progress fractions that never stall
//!   below 1.0
//! - **Sync Task Queue** (`task_queue`): persisted remote changes with
//!   `Waiting -> Processing -> Synced` lifecycle and retry
//! - **Query Generations** (`query_guard`): latest-wins query results with
//!   cancellation of superseded queries
//! - **Remote Sync Engine** (`remote`): album difference checks, uploads,
//!   duplicate suppression and album refresh with bounded backoff

pub mod error;
pub mod progress;
pub mod query_guard;
pub mod reconcile;
pub mod remote;
pub mod task_queue;

pub use error::{Result, SyncError};
pub use progress::ChunkProgress;
pub use query_guard::{AlbumFeed, QueryGenerations, QueryTicket};
pub use reconcile::{ReconciliationEngine, ResyncJobId, ResyncKind, ResyncReport};
pub use remote::{
    device_asset_id, device_asset_id_for, upload_work_name, AlbumRegistration, AlbumSyncState,
    AlbumsState, DuplicateState, RemoteSyncConfig, RemoteSyncEngine, RetryPolicy,
    SyncDifference, TaskDrainReport, UploadReport, TASK_DRAIN_WORK,
};
pub use task_queue::SyncTaskQueue;

/// Unique work name of the scheduled full resync.
pub const RESYNC_WORK: &str = "media-resync";

/// Unique work name of the scheduled incremental resync.
pub const INCREMENTAL_RESYNC_WORK: &str = "media-incremental-resync";
