//! Credential encryption using AES-256-GCM with an instance master key.
//!
//! Every encrypted value is a single opaque blob laid out as
//! `nonce (12B) || ciphertext || tag (16B)`. The master key is 32 random
//! bytes generated on first boot and persisted to a private file; losing
//! that file makes every stored blob unrecoverable.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};
use rand::RngCore;
use thiserror::Error;

/// Size of the AES-256 key in bytes.
const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag.
const TAG_SIZE: usize = 16;

/// Errors from master-key handling and value encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Decryption failed: the blob was tampered with, truncated, or
    /// encrypted under a different key.
    #[error("ciphertext rejected: tampered, truncated, or wrong key")]
    BadCiphertext,

    /// The key file exists but does not hold exactly 32 bytes.
    #[error("master key file is corrupt: expected {KEY_SIZE} bytes, found {found}")]
    KeyFileCorrupt { found: usize },

    /// The key file is missing (only raised by the strict load path).
    #[error("master key file not found at {path}")]
    KeyFileMissing { path: String },

    #[error("key file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The process-wide master key, read-only after init.
///
/// Held in memory for the lifetime of the process. Never logged,
/// serialized, or exposed through Debug.
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    /// Load the master key from `path`, or generate and persist a new one.
    ///
    /// A fresh key is written with owner-only permissions (0600 on Unix).
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            return Self::load(path);
        }

        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        std::fs::write(path, bytes)?;
        restrict_permissions(path)?;

        tracing::info!(path = %path.display(), "Generated new master key");
        Ok(Self { bytes })
    }

    /// Load an existing master key, failing if the file is absent or corrupt.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let raw = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CryptoError::KeyFileMissing {
                    path: path.display().to_string(),
                }
            } else {
                CryptoError::Io(e)
            }
        })?;
        let bytes: [u8; KEY_SIZE] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::KeyFileCorrupt { found: raw.len() })?;
        Ok(Self { bytes })
    }

    /// Build a key from raw bytes (tests and tooling).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Encrypt a plaintext value. A fresh random nonce is drawn per call,
    /// so encrypting the same plaintext twice yields different blobs.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(&self.bytes)
            .expect("key length is fixed at 32 bytes");
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .expect("AES-GCM encryption is infallible for in-memory buffers");

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        blob
    }

    /// Decrypt a blob produced by [`MasterKey::encrypt`].
    ///
    /// Any modification to the nonce, ciphertext, or tag fails the GCM
    /// integrity check and returns [`CryptoError::BadCiphertext`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::BadCiphertext);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.bytes)
            .expect("key length is fixed at 32 bytes");
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::BadCiphertext)
    }

    /// Decrypt a blob into a UTF-8 string.
    pub fn decrypt_string(&self, blob: &[u8]) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(blob)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::BadCiphertext)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
