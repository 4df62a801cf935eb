//! SQLite persistence layer.
//!
//! A single [`Store`] wraps one `rusqlite::Connection` behind a mutex, so all
//! writes are serialized by construction. Rows come back as plain structs;
//! all SQL lives in this module. Schema evolution is append-only: new columns
//! are added by an idempotent migration runner that ignores "duplicate
//! column" failures.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    encrypted_value BLOB,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT '',
    locked INTEGER NOT NULL DEFAULT 0,
    expires_at TEXT,
    revoked INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS profile_credentials (
    profile_id TEXT NOT NULL REFERENCES profiles(id),
    credential_id TEXT NOT NULL REFERENCES credentials(id),
    PRIMARY KEY (profile_id, credential_id)
);

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL REFERENCES profiles(id),
    script TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    result TEXT,
    stdout TEXT NOT NULL DEFAULT '',
    stderr TEXT NOT NULL DEFAULT '',
    error TEXT,
    llm_request TEXT,
    execution_time_ms INTEGER,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS admin (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Append-only column additions. Each statement either succeeds or fails
/// with a "duplicate column name" error, which the runner ignores.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE profiles ADD COLUMN key_id TEXT",
    "ALTER TABLE profiles ADD COLUMN key_secret_encrypted BLOB",
];

/// A stored credential slot.
#[derive(Clone)]
pub struct CredentialRow {
    pub id: String,
    pub name: String,
    pub encrypted_value: Option<Vec<u8>>,
    pub description: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl std::fmt::Debug for CredentialRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("encrypted_value", &"[REDACTED]")
            .field("description", &self.description)
            .finish()
    }
}

/// A stored profile.
#[derive(Clone)]
pub struct ProfileRow {
    pub id: String,
    pub description: String,
    pub locked: bool,
    pub key_id: Option<String>,
    pub key_secret_encrypted: Option<Vec<u8>>,
    pub expires_at: Option<String>,
    pub revoked: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub last_used_at: Option<String>,
}

impl std::fmt::Debug for ProfileRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRow")
            .field("id", &self.id)
            .field("locked", &self.locked)
            .field("key_id", &self.key_id)
            .field("key_secret_encrypted", &"[REDACTED]")
            .field("revoked", &self.revoked)
            .finish()
    }
}

/// A persisted execution record.
#[derive(Debug, Clone)]
pub struct ExecutionRow {
    pub id: String,
    pub profile_id: String,
    pub script: String,
    pub status: String,
    pub result: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Filters for execution listing.
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub profile_id: Option<String>,
    pub status: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Handle to the SQLite store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Store {
    /// Open (or create) the store file, applying schema and migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // -- Credentials --

    pub fn insert_credential(
        &self,
        id: &str,
        name: &str,
        description: &str,
        encrypted_value: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO credentials (id, name, encrypted_value, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, encrypted_value, description, now()],
        )?;
        Ok(())
    }

    pub fn get_credential(&self, name: &str) -> Result<Option<CredentialRow>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, encrypted_value, description, created_at, updated_at
                 FROM credentials WHERE name = ?1",
                params![name],
                credential_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_credentials(&self) -> Result<Vec<CredentialRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, encrypted_value, description, created_at, updated_at
             FROM credentials ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], credential_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update a credential in place. `value` semantics: `None` leaves the
    /// blob untouched, `Some(None)` clears it, `Some(Some(blob))` replaces it.
    pub fn update_credential(
        &self,
        name: &str,
        value: Option<Option<&[u8]>>,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        match (value, description) {
            (Some(blob), Some(desc)) => {
                conn.execute(
                    "UPDATE credentials SET encrypted_value = ?1, description = ?2,
                     updated_at = ?3 WHERE name = ?4",
                    params![blob, desc, now(), name],
                )?;
            }
            (Some(blob), None) => {
                conn.execute(
                    "UPDATE credentials SET encrypted_value = ?1, updated_at = ?2
                     WHERE name = ?3",
                    params![blob, now(), name],
                )?;
            }
            (None, Some(desc)) => {
                conn.execute(
                    "UPDATE credentials SET description = ?1, updated_at = ?2
                     WHERE name = ?3",
                    params![desc, now(), name],
                )?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Profile ids of LOCKED (non-revoked) profiles referencing a credential.
    pub fn locked_profiles_referencing(
        &self,
        credential_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id FROM profiles p
             JOIN profile_credentials pc ON p.id = pc.profile_id
             WHERE pc.credential_id = ?1 AND p.locked = 1 AND p.revoked = 0
             ORDER BY p.id",
        )?;
        let ids = stmt
            .query_map(params![credential_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Delete a credential, dropping all remaining bindings with it.
    pub fn delete_credential(&self, credential_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM profile_credentials WHERE credential_id = ?1",
            params![credential_id],
        )?;
        tx.execute("DELETE FROM credentials WHERE id = ?1", params![credential_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Credentials bound to a profile, ordered by name.
    pub fn credentials_for_profile(
        &self,
        profile_id: &str,
    ) -> Result<Vec<CredentialRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.encrypted_value, c.description, c.created_at, c.updated_at
             FROM credentials c
             JOIN profile_credentials pc ON c.id = pc.credential_id
             WHERE pc.profile_id = ?1 ORDER BY c.name",
        )?;
        let rows = stmt
            .query_map(params![profile_id], credential_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- Profiles --

    pub fn insert_profile(&self, id: &str, description: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO profiles (id, description, created_at) VALUES (?1, ?2, ?3)",
            params![id, description, now()],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{PROFILE_SELECT} WHERE id = ?1"),
                params![id],
                profile_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_profile_by_key_id(&self, key_id: &str) -> Result<Option<ProfileRow>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{PROFILE_SELECT} WHERE key_id = ?1"),
                params![key_id],
                profile_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_profiles(&self) -> Result<Vec<ProfileRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{PROFILE_SELECT} ORDER BY created_at"))?;
        let rows = stmt
            .query_map([], profile_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_profile_description(&self, id: &str, description: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE profiles SET description = ?1, updated_at = ?2 WHERE id = ?3",
            params![description, now(), id],
        )?;
        Ok(())
    }

    pub fn update_profile_expiry(&self, id: &str, expires_at: Option<&str>) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE profiles SET expires_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![expires_at, now(), id],
        )?;
        Ok(())
    }

    /// Lock a profile or replace its key pair: both are a key_id + encrypted
    /// secret swap with `locked` forced to 1.
    pub fn set_profile_key(
        &self,
        id: &str,
        key_id: &str,
        key_secret_encrypted: &[u8],
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE profiles SET locked = 1, key_id = ?1, key_secret_encrypted = ?2,
             updated_at = ?3 WHERE id = ?4",
            params![key_id, key_secret_encrypted, now(), id],
        )?;
        Ok(())
    }

    pub fn set_profile_revoked(&self, id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE profiles SET revoked = 1, updated_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }

    pub fn touch_profile_last_used(&self, id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE profiles SET last_used_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }

    /// Delete a profile and its credential bindings.
    pub fn delete_profile(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM profile_credentials WHERE profile_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Bind a credential to a profile. Idempotent.
    pub fn attach_credential(&self, profile_id: &str, credential_id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO profile_credentials (profile_id, credential_id)
             VALUES (?1, ?2)",
            params![profile_id, credential_id],
        )?;
        Ok(())
    }

    pub fn detach_credential(&self, profile_id: &str, credential_id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM profile_credentials WHERE profile_id = ?1 AND credential_id = ?2",
            params![profile_id, credential_id],
        )?;
        Ok(())
    }

    // -- Executions --

    pub fn insert_execution(
        &self,
        id: &str,
        profile_id: &str,
        script: &str,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO executions (id, profile_id, script, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![id, profile_id, script, now()],
        )?;
        Ok(())
    }

    /// Record a terminal outcome. `completed_at` is stamped here.
    #[allow(clippy::too_many_arguments)]
    pub fn finish_execution(
        &self,
        id: &str,
        status: &str,
        result: Option<&str>,
        stdout: &str,
        stderr: &str,
        error: Option<&str>,
        execution_time_ms: Option<i64>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE executions
             SET status = ?1, result = ?2, stdout = ?3, stderr = ?4,
                 error = ?5, execution_time_ms = ?6, completed_at = ?7
             WHERE id = ?8",
            params![status, result, stdout, stderr, error, execution_time_ms, now(), id],
        )?;
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<ExecutionRow>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{EXECUTION_SELECT} WHERE id = ?1"),
                params![id],
                execution_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRow>, StoreError> {
        let mut sql = EXECUTION_SELECT.to_string();
        let mut clauses = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref profile_id) = filter.profile_id {
            clauses.push(format!("profile_id = ?{}", args.len() + 1));
            args.push(Box::new(profile_id.clone()));
        }
        if let Some(ref status) = filter.status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(Box::new(status.clone()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            args.len() + 1,
            args.len() + 2
        ));
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        args.push(Box::new(limit));
        args.push(Box::new(filter.offset));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), execution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mark every non-terminal execution as failed. Returns how many rows
    /// were touched. Run once at startup.
    pub fn fail_inflight_executions(&self, message: &str) -> Result<usize, StoreError> {
        let count = self.conn()?.execute(
            "UPDATE executions
             SET status = 'error', error = ?1, completed_at = ?2
             WHERE status IN ('pending', 'running', 'awaiting_llm')",
            params![message, now()],
        )?;
        Ok(count)
    }

    // -- Admin key/value --

    pub fn admin_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM admin WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn admin_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO admin (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

const PROFILE_SELECT: &str =
    "SELECT id, description, locked, key_id, key_secret_encrypted, expires_at, revoked,
            created_at, updated_at, last_used_at
     FROM profiles";

const EXECUTION_SELECT: &str =
    "SELECT id, profile_id, script, status, result, stdout, stderr, error,
            execution_time_ms, created_at, completed_at
     FROM executions";

fn credential_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRow> {
    Ok(CredentialRow {
        id: row.get(0)?,
        name: row.get(1)?,
        encrypted_value: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        description: row.get(1)?,
        locked: row.get::<_, i64>(2)? != 0,
        key_id: row.get(3)?,
        key_secret_encrypted: row.get(4)?,
        expires_at: row.get(5)?,
        revoked: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        last_used_at: row.get(9)?,
    })
}

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        script: row.get(2)?,
        status: row.get(3)?,
        result: row.get(4)?,
        stdout: row.get(5)?,
        stderr: row.get(6)?,
        error: row.get(7)?,
        execution_time_ms: row.get(8)?,
        created_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    for statement in MIGRATIONS {
        match conn.execute(statement, []) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
