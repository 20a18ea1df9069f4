//! AES-256-GCM encryption for secure folder files
//!
//! One master key encrypts every secured file. Each file and each thumbnail
//! gets a fresh 96-bit nonce which is persisted as the mapping's `iv`, so the
//! ciphertext on disk carries no header.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use bridge_traits::storage::SecureStore;
use tracing::{debug, info};

use crate::error::{Result, VaultError};

/// Secure store entry holding the hex-encoded master key.
pub const MASTER_KEY_NAME: &str = "vault.master_key";

pub const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Master key for the secure folder.
#[derive(Clone)]
pub struct VaultKey {
    key_bytes: Vec<u8>,
}

impl VaultKey {
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            key_bytes: key.to_vec(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(VaultError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { key_bytes: bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.key_bytes)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| VaultError::InvalidKey(format!("invalid hex: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Load the master key, generating and persisting one on first use.
    pub async fn load_or_create(store: &dyn SecureStore) -> Result<Self> {
        if let Some(stored) = store.get_secret(MASTER_KEY_NAME).await? {
            let text = String::from_utf8(stored)
                .map_err(|_| VaultError::InvalidKey("stored key is not utf-8".to_string()))?;
            debug!("Loaded vault master key");
            return Self::from_hex(&text);
        }

        let key = Self::generate();
        store
            .set_secret(MASTER_KEY_NAME, key.to_hex().as_bytes())
            .await?;
        info!("Generated new vault master key");
        Ok(key)
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

/// Ciphertext together with the nonce that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Encrypts and decrypts secure folder payloads.
#[derive(Clone)]
pub struct VaultCipher {
    cipher: Arc<Aes256Gcm>,
}

impl VaultCipher {
    pub fn new(key: &VaultKey) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key.key_bytes);
        Self {
            cipher: Arc::new(Aes256Gcm::new(key)),
        }
    }

    /// Encrypt with a freshly generated iv.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Sealed> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| VaultError::Encryption(format!("encryption failed: {}", e)))?;

        Ok(Sealed {
            ciphertext,
            iv: iv.to_vec(),
        })
    }

    pub fn open(&self, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != IV_LEN {
            return Err(VaultError::Encryption(format!(
                "invalid iv length {}",
                iv.len()
            )));
        }
        if ciphertext.len() < TAG_LEN {
            return Err(VaultError::Encryption(
                "invalid ciphertext: too short".to_string(),
            ));
        }

        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|e| VaultError::Encryption(format!("decryption failed: {}", e)))
    }
}

impl fmt::Debug for VaultCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultCipher").finish_non_exhaustive()
    }
}
