//! Credential slot management: CRUD with encryption, plus profile-scoped
//! resolution to plaintext for the dispatcher.
//!
//! Plaintext values enter through `create`/`update` and leave only through
//! [`CredentialService::resolve_for_profile`], which is never exposed over
//! the API.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::{CryptoError, MasterKey};
use crate::store::{Store, StoreError};

const NAME_MAX_LENGTH: usize = 128;

fn name_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("{0}")]
    InvalidName(String),

    #[error("Credential '{0}' already exists")]
    NameTaken(String),

    #[error("Credential '{0}' not found")]
    NotFound(String),

    /// Deletion blocked: the credential is referenced by locked profiles.
    #[error("Cannot delete credential '{name}': referenced by locked profile(s): {}", locked_profile_ids.join(", "))]
    InUse {
        name: String,
        locked_profile_ids: Vec<String>,
    },

    #[error("Profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("Profile '{0}' is not locked")]
    ProfileNotLocked(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Credential metadata. Never carries the value.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialInfo {
    pub name: String,
    pub description: String,
    pub value_exists: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

/// Three-valued input for partial updates: leave the stored value alone,
/// clear it, or replace it.
#[derive(Debug, Clone, Default)]
pub enum ValueChange {
    #[default]
    Unchanged,
    Clear,
    Set(String),
}

/// Validate a credential name against the naming rules.
pub fn validate_name(name: &str) -> Result<(), CredentialError> {
    if name.is_empty() {
        return Err(CredentialError::InvalidName(
            "Credential name cannot be empty".to_string(),
        ));
    }
    if name.len() > NAME_MAX_LENGTH {
        return Err(CredentialError::InvalidName(format!(
            "Credential name exceeds {NAME_MAX_LENGTH} characters"
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(CredentialError::InvalidName(format!(
            "Invalid credential name '{name}': must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    Ok(())
}

/// Service over credential slots.
#[derive(Clone)]
pub struct CredentialService {
    store: Store,
    master_key: Arc<MasterKey>,
}

impl CredentialService {
    pub fn new(store: Store, master_key: Arc<MasterKey>) -> Self {
        Self { store, master_key }
    }

    /// List all credentials with metadata. Never returns values.
    pub fn list(&self) -> Result<Vec<CredentialInfo>, CredentialError> {
        let rows = self.store.list_credentials()?;
        Ok(rows.into_iter().map(info_from_row).collect())
    }

    pub fn get(&self, name: &str) -> Result<Option<CredentialInfo>, CredentialError> {
        Ok(self.store.get_credential(name)?.map(info_from_row))
    }

    /// Create a credential. The value is optional: agent-created slots start
    /// empty and an operator fills them in later.
    pub fn create(
        &self,
        name: &str,
        description: &str,
        value: Option<&str>,
    ) -> Result<CredentialInfo, CredentialError> {
        validate_name(name)?;
        if self.store.get_credential(name)?.is_some() {
            return Err(CredentialError::NameTaken(name.to_string()));
        }

        let id = format!("cred_{}", uuid::Uuid::new_v4().simple());
        let encrypted = value.map(|v| self.master_key.encrypt(v.as_bytes()));
        self.store
            .insert_credential(&id, name, description, encrypted.as_deref())?;

        tracing::info!(name, value_set = value.is_some(), "Created credential slot");
        self.get(name)?
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))
    }

    /// Update a credential's value and/or description. Each field is
    /// three-valued; [`ValueChange::Clear`] sets the stored blob to null.
    pub fn update(
        &self,
        name: &str,
        value: ValueChange,
        description: Option<&str>,
    ) -> Result<CredentialInfo, CredentialError> {
        if self.store.get_credential(name)?.is_none() {
            return Err(CredentialError::NotFound(name.to_string()));
        }

        let blob_change: Option<Option<Vec<u8>>> = match value {
            ValueChange::Unchanged => None,
            ValueChange::Clear => Some(None),
            ValueChange::Set(plaintext) => Some(Some(self.master_key.encrypt(plaintext.as_bytes()))),
        };
        self.store
            .update_credential(name, blob_change.as_ref().map(|b| b.as_deref()), description)?;

        self.get(name)?
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))
    }

    /// Delete a credential by name.
    ///
    /// Fails if any locked (non-revoked) profile references it; references
    /// held by unlocked profiles are dropped silently.
    pub fn delete(&self, name: &str) -> Result<(), CredentialError> {
        let row = self
            .store
            .get_credential(name)?
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;

        let locked = self.store.locked_profiles_referencing(&row.id)?;
        if !locked.is_empty() {
            return Err(CredentialError::InUse {
                name: name.to_string(),
                locked_profile_ids: locked,
            });
        }

        self.store.delete_credential(&row.id)?;
        tracing::info!(name, "Deleted credential slot");
        Ok(())
    }

    /// Resolve a locked profile's credentials into a `{name -> plaintext}`
    /// map for injection. Slots without a value are skipped.
    ///
    /// Internal only: the result never crosses the API boundary.
    pub fn resolve_for_profile(
        &self,
        profile_id: &str,
    ) -> Result<HashMap<String, SecretString>, CredentialError> {
        let profile = self
            .store
            .get_profile(profile_id)?
            .ok_or_else(|| CredentialError::ProfileNotFound(profile_id.to_string()))?;
        if !profile.locked {
            return Err(CredentialError::ProfileNotLocked(profile_id.to_string()));
        }

        let mut resolved = HashMap::new();
        for row in self.store.credentials_for_profile(profile_id)? {
            if let Some(blob) = row.encrypted_value {
                let plaintext = self.master_key.decrypt_string(&blob)?;
                resolved.insert(row.name, SecretString::from(plaintext));
            }
        }
        Ok(resolved)
    }
}

fn info_from_row(row: crate::store::CredentialRow) -> CredentialInfo {
    CredentialInfo {
        name: row.name,
        description: row.description,
        value_exists: row.encrypted_value.is_some(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}
