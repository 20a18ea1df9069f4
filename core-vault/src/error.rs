use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error("Invalid vault key: {0}")]
    InvalidKey(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
