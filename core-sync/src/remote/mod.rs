//! Remote album sync against the photo server

mod engine;
mod retry;
mod state;

pub use engine::{
    upload_work_name, AlbumRegistration, RemoteSyncConfig, RemoteSyncEngine, TaskDrainReport,
    UploadReport, TASK_DRAIN_WORK,
};
pub use retry::RetryPolicy;
pub use state::{
    device_asset_id, device_asset_id_for, AlbumSyncState, AlbumsState, DuplicateState,
    SyncDifference,
};
