//! Error types for the Immich provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImmichError {
    /// Login rejected or the access token is no longer accepted
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A request needing a session was made before `login`
    #[error("Not logged in to the photo server")]
    NotLoggedIn,

    #[error("Immich API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, ImmichError>;

impl From<ImmichError> for BridgeError {
    fn from(error: ImmichError) -> Self {
        match error {
            ImmichError::AuthenticationFailed(msg) => BridgeError::Unauthorized(msg),
            ImmichError::NotLoggedIn => BridgeError::Unauthorized("not logged in".to_string()),
            ImmichError::NotFound { resource } => BridgeError::NotFound(resource),
            ImmichError::BridgeError(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ImmichError::ApiError {
            status_code: 500,
            message: "Internal Server Error".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Immich API error (status 500): Internal Server Error"
        );
    }

    #[test]
    fn test_error_conversion() {
        let bridge: BridgeError = ImmichError::AuthenticationFailed("bad password".into()).into();
        assert!(matches!(bridge, BridgeError::Unauthorized(_)));

        let bridge: BridgeError = ImmichError::NotFound {
            resource: "album a1".into(),
        }
        .into();
        assert!(matches!(bridge, BridgeError::NotFound(ref r) if r == "album a1"));

        let bridge: BridgeError = ImmichError::ParseError("eof".into()).into();
        assert!(matches!(bridge, BridgeError::OperationFailed(_)));
    }
}
