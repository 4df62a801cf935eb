//! Profile lifecycle: creation, credential binding, the two-part key
//! (lock / revoke / regenerate), bearer authentication, and per-script
//! HMAC verification.
//!
//! A profile moves UNLOCKED -> LOCKED -> REVOKED and never backwards.
//! Credential bindings change only while unlocked; execution is allowed
//! only while locked and unexpired.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use secrecy::SecretString;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::crypto::{CryptoError, MasterKey};
use crate::store::{ProfileRow, Store, StoreError};

pub const KEY_ID_PREFIX: &str = "ark_";
const KEY_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const KEY_ID_LENGTH: usize = 24;
const SECRET_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SECRET_LENGTH: usize = 48;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Profile '{0}' not found")]
    NotFound(String),

    #[error("Profile '{0}' is already locked")]
    AlreadyLocked(String),

    #[error("Profile '{0}' is not locked")]
    NotLocked(String),

    #[error("Profile '{0}' is revoked")]
    Revoked(String),

    #[error("Profile '{0}' is already revoked")]
    AlreadyRevoked(String),

    #[error("Cannot delete locked profile '{0}' - revoke it first")]
    LockedActive(String),

    #[error("Cannot modify credentials on a locked profile")]
    CredentialsLocked,

    #[error("Credential '{0}' not found")]
    UnknownCredential(String),

    #[error("Invalid expires_at '{0}': expected an RFC 3339 timestamp")]
    InvalidExpiry(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Why a bearer token was rejected. The Display strings are what agents see.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    Missing,

    #[error("Invalid profile key")]
    Malformed,

    #[error("Invalid profile key")]
    UnknownKey,

    #[error("Profile is not locked")]
    NotLocked,

    #[error("Profile has been revoked")]
    Revoked,

    #[error("Profile has expired")]
    Expired,

    #[error("internal error")]
    Store(#[from] StoreError),

    #[error("internal error")]
    Crypto(#[from] CryptoError),
}

/// Credential reference within a profile.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialRef {
    pub name: String,
    pub description: String,
    pub value_exists: bool,
}

/// Profile metadata returned by list/get operations. Never the secret.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileInfo {
    pub id: String,
    pub description: String,
    pub locked: bool,
    pub key_id: Option<String>,
    pub credentials: Vec<CredentialRef>,
    pub expires_at: Option<String>,
    pub revoked: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Returned by lock and regenerate: the full `ark_ID:SECRET` string is
/// included exactly once, here.
#[derive(Debug, Clone)]
pub struct LockResult {
    pub profile: ProfileInfo,
    pub key: String,
}

/// Outcome of a successful bearer authentication.
pub struct AuthenticatedProfile {
    pub profile_id: String,
    pub secret: SecretString,
}

/// Three-valued expiry input for partial updates.
#[derive(Debug, Clone, Default)]
pub enum ExpiryChange {
    #[default]
    Unchanged,
    Clear,
    Set(String),
}

fn random_string(charset: &[u8], len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}

fn generate_key_id() -> String {
    format!("{KEY_ID_PREFIX}{}", random_string(KEY_ID_CHARS, KEY_ID_LENGTH))
}

fn generate_secret() -> String {
    random_string(SECRET_CHARS, SECRET_LENGTH)
}

/// Lowercase-hex HMAC-SHA256 of the script keyed by the profile secret.
pub fn script_hmac(secret: &str, script: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(script.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Verify `HMAC-SHA256(secret, script)` against a provided hex digest in
/// constant time.
pub fn verify_script(secret: &str, script: &str, provided_hash: &str) -> bool {
    let expected = script_hmac(secret, script);
    if expected.len() != provided_hash.len() {
        return false;
    }
    expected
        .as_bytes()
        .ct_eq(provided_hash.as_bytes())
        .into()
}

/// Service over profiles.
#[derive(Clone)]
pub struct ProfileService {
    store: Store,
    master_key: Arc<MasterKey>,
}

impl ProfileService {
    pub fn new(store: Store, master_key: Arc<MasterKey>) -> Self {
        Self { store, master_key }
    }

    pub fn list(&self) -> Result<Vec<ProfileInfo>, ProfileError> {
        let rows = self.store.list_profiles()?;
        rows.into_iter().map(|row| self.info_from_row(row)).collect()
    }

    pub fn get(&self, id: &str) -> Result<ProfileInfo, ProfileError> {
        let row = self.require(id)?;
        self.info_from_row(row)
    }

    /// Create a new unlocked profile with a fresh UUID id.
    pub fn create(&self, description: &str) -> Result<ProfileInfo, ProfileError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.store.insert_profile(&id, description)?;
        tracing::info!(profile_id = %id, "Created profile");
        self.get(&id)
    }

    /// Update description and/or expiry. Allowed in any non-revoked state:
    /// both are operational knobs, not trust-relevant.
    pub fn update(
        &self,
        id: &str,
        description: Option<&str>,
        expires_at: ExpiryChange,
    ) -> Result<ProfileInfo, ProfileError> {
        let row = self.require(id)?;
        if row.revoked {
            return Err(ProfileError::Revoked(id.to_string()));
        }

        if let Some(desc) = description {
            self.store.update_profile_description(id, desc)?;
        }
        match expires_at {
            ExpiryChange::Unchanged => {}
            ExpiryChange::Clear => self.store.update_profile_expiry(id, None)?,
            ExpiryChange::Set(raw) => {
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|_| ProfileError::InvalidExpiry(raw.clone()))?;
                self.store.update_profile_expiry(id, Some(&raw))?;
            }
        }
        self.get(id)
    }

    /// Delete a profile. Locked profiles must be revoked first.
    pub fn delete(&self, id: &str) -> Result<(), ProfileError> {
        let row = self.require(id)?;
        if row.locked && !row.revoked {
            return Err(ProfileError::LockedActive(id.to_string()));
        }
        self.store.delete_profile(id)?;
        tracing::info!(profile_id = %id, "Deleted profile");
        Ok(())
    }

    /// Bind credentials by name. Unlocked profiles only; idempotent.
    pub fn add_credentials(&self, id: &str, names: &[String]) -> Result<ProfileInfo, ProfileError> {
        let row = self.require(id)?;
        self.require_unlocked(&row)?;

        for name in names {
            let cred = self
                .store
                .get_credential(name)?
                .ok_or_else(|| ProfileError::UnknownCredential(name.clone()))?;
            self.store.attach_credential(id, &cred.id)?;
        }
        self.get(id)
    }

    /// Unbind credentials by name, silently skipping names not attached.
    pub fn remove_credentials(
        &self,
        id: &str,
        names: &[String],
    ) -> Result<ProfileInfo, ProfileError> {
        let row = self.require(id)?;
        self.require_unlocked(&row)?;

        for name in names {
            if let Some(cred) = self.store.get_credential(name)? {
                self.store.detach_credential(id, &cred.id)?;
            }
        }
        self.get(id)
    }

    /// Lock a profile, generating its two-part key. The returned
    /// `ark_ID:SECRET` string is the only time the secret leaves the service.
    pub fn lock(&self, id: &str) -> Result<LockResult, ProfileError> {
        let row = self.require(id)?;
        if row.revoked {
            return Err(ProfileError::Revoked(id.to_string()));
        }
        if row.locked {
            return Err(ProfileError::AlreadyLocked(id.to_string()));
        }

        let key_id = generate_key_id();
        let secret = generate_secret();
        let encrypted = self.master_key.encrypt(secret.as_bytes());
        self.store.set_profile_key(id, &key_id, &encrypted)?;

        tracing::info!(profile_id = %id, key_id = %key_id, "Locked profile");
        Ok(LockResult {
            profile: self.get(id)?,
            key: format!("{key_id}:{secret}"),
        })
    }

    /// Revoke a profile. Instant and irreversible.
    pub fn revoke(&self, id: &str) -> Result<ProfileInfo, ProfileError> {
        let row = self.require(id)?;
        if row.revoked {
            return Err(ProfileError::AlreadyRevoked(id.to_string()));
        }
        self.store.set_profile_revoked(id)?;
        tracing::info!(profile_id = %id, "Revoked profile");
        self.get(id)
    }

    /// Replace the key pair on a locked profile. The old key_id stops
    /// authenticating the moment the new row is committed.
    pub fn regenerate_key(&self, id: &str) -> Result<LockResult, ProfileError> {
        let row = self.require(id)?;
        if row.revoked {
            return Err(ProfileError::Revoked(id.to_string()));
        }
        if !row.locked {
            return Err(ProfileError::NotLocked(id.to_string()));
        }

        let key_id = generate_key_id();
        let secret = generate_secret();
        let encrypted = self.master_key.encrypt(secret.as_bytes());
        self.store.set_profile_key(id, &key_id, &encrypted)?;

        tracing::info!(profile_id = %id, key_id = %key_id, "Regenerated profile key");
        Ok(LockResult {
            profile: self.get(id)?,
            key: format!("{key_id}:{secret}"),
        })
    }

    /// Resolve a bearer token to an executable profile.
    ///
    /// Checks prefix and shape, looks up the key_id, enforces
    /// locked/not-revoked/not-expired, decrypts the secret, and stamps
    /// `last_used_at`.
    pub fn authenticate(&self, bearer: &str) -> Result<AuthenticatedProfile, AuthError> {
        if bearer.is_empty() {
            return Err(AuthError::Missing);
        }
        if !is_well_formed_key_id(bearer) {
            return Err(AuthError::Malformed);
        }

        let row = self
            .store
            .get_profile_by_key_id(bearer)?
            .ok_or(AuthError::UnknownKey)?;

        if row.revoked {
            return Err(AuthError::Revoked);
        }
        if !row.locked {
            return Err(AuthError::NotLocked);
        }
        if is_expired(row.expires_at.as_deref()) {
            return Err(AuthError::Expired);
        }

        let blob = row.key_secret_encrypted.as_deref().ok_or(AuthError::NotLocked)?;
        let secret = self.master_key.decrypt_string(blob)?;
        self.store.touch_profile_last_used(&row.id)?;

        Ok(AuthenticatedProfile {
            profile_id: row.id,
            secret: SecretString::from(secret),
        })
    }

    fn require(&self, id: &str) -> Result<ProfileRow, ProfileError> {
        self.store
            .get_profile(id)?
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))
    }

    fn require_unlocked(&self, row: &ProfileRow) -> Result<(), ProfileError> {
        if row.revoked {
            return Err(ProfileError::Revoked(row.id.clone()));
        }
        if row.locked {
            return Err(ProfileError::CredentialsLocked);
        }
        Ok(())
    }

    fn info_from_row(&self, row: ProfileRow) -> Result<ProfileInfo, ProfileError> {
        let credentials = self
            .store
            .credentials_for_profile(&row.id)?
            .into_iter()
            .map(|c| CredentialRef {
                name: c.name,
                description: c.description,
                value_exists: c.encrypted_value.is_some(),
            })
            .collect();
        Ok(ProfileInfo {
            id: row.id,
            description: row.description,
            locked: row.locked,
            key_id: row.key_id,
            credentials,
            expires_at: row.expires_at,
            revoked: row.revoked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn is_well_formed_key_id(token: &str) -> bool {
    let Some(rest) = token.strip_prefix(KEY_ID_PREFIX) else {
        return false;
    };
    rest.len() == KEY_ID_LENGTH
        && rest
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Strictly-in-future expiry: a timestamp equal to "now" is already expired.
fn is_expired(expires_at: Option<&str>) -> bool {
    match expires_at {
        None => false,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(when) => when.with_timezone(&Utc) <= Utc::now(),
            Err(_) => {
                tracing::warn!(expires_at = raw, "Unparseable expiry, treating as expired");
                true
            }
        },
    }
}
