//! `SecureStore` over the OS credential store.
//!
//! Holds the secure folder's vault key. Keychain on macOS, Credential Manager
//! on Windows, Secret Service on Linux. Values are binary, so they are kept
//! base64-encoded in the password slot.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, warn};

pub const DEFAULT_SERVICE: &str = "gallery-core";

pub struct KeyringSecureStore {
    service: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE)
    }

    /// Separate service names keep test or per-profile keys apart.
    pub fn with_service_name(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).map_err(|e| into_bridge(key, e))
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A locked or missing credential store is a capability problem, not a
/// failed write.
fn into_bridge(key: &str, error: keyring::Error) -> BridgeError {
    match error {
        keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
            BridgeError::NotAvailable(format!("credential store ({}): {}", key, error))
        }
        keyring::Error::NoEntry => BridgeError::NotFound(key.to_string()),
        other => BridgeError::OperationFailed(format!("credential store ({}): {}", key, other)),
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&STANDARD.encode(value))
            .map_err(|e| into_bridge(key, e))?;
        debug!(service = %self.service, key, "Secret stored");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let encoded = match self.entry(key)?.get_password() {
            Ok(encoded) => encoded,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(into_bridge(key, e)),
        };

        STANDARD.decode(encoded.as_bytes()).map(Some).map_err(|e| {
            warn!(key, error = %e, "Stored secret is not valid base64");
            BridgeError::OperationFailed(format!("corrupt secret {}: {}", key, e))
        })
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(into_bridge(key, e)),
        }
    }
}
