use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress: {kind}")]
    SyncInProgress { kind: String },

    #[error("Media source error: {0}")]
    Source(String),

    #[error("Remote server error: {0}")]
    Remote(String),

    #[error("Remote server unavailable after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("Remote sync is not configured: {0}")]
    NotConfigured(String),

    #[error("Album {0} is not registered for remote sync")]
    AlbumNotRegistered(String),

    #[error("Sync task {task_id} not found")]
    TaskNotFound { task_id: i64 },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<LibraryError> for SyncError {
    fn from(e: LibraryError) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<BridgeError> for SyncError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Cancelled => SyncError::Cancelled,
            other => SyncError::Remote(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Failure reported back to the background scheduler. Overlapping runs
    /// and remote failures stay retryable.
    pub fn into_bridge(self) -> BridgeError {
        match self {
            SyncError::Cancelled => BridgeError::Cancelled,
            SyncError::NotConfigured(msg) => BridgeError::NotAvailable(msg),
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}
