use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A setting is out of range or inconsistent with another.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A feature was enabled without the host bridge it runs on.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    pub(crate) fn missing(capability: &str, message: impl Into<String>) -> Self {
        Error::CapabilityMissing {
            capability: capability.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
