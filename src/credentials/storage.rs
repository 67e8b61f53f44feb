//! Single-slot credential storage backed by SQLite, with an in-memory fallback.

use super::{
    expiry_from_now, CredentialSet, EncryptedField, TokenCipher, DEFAULT_SERVICE,
    DEFAULT_TOKEN_TYPE,
};
use crate::error::{AuthError, AuthResult};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Which backend a [`CredentialStore`] is writing to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    /// SQLite database on disk (or `:memory:` SQLite in tests)
    Durable,
    /// Process-local map; contents are lost on restart
    InMemory,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Durable => write!(f, "durable"),
            StoreMode::InMemory => write!(f, "in-memory"),
        }
    }
}

/// A record as it sits at rest: tokens encrypted, metadata in the clear.
#[derive(Clone, Debug)]
struct StoredRecord {
    access_token: EncryptedField,
    refresh_token: Option<EncryptedField>,
    expires_at: DateTime<Utc>,
    scope: Option<String>,
    token_type: String,
}

enum Backend {
    Sqlite(Mutex<Connection>),
    Memory(Mutex<HashMap<String, StoredRecord>>),
}

/// Encrypted single-slot credential storage.
///
/// # Schema
/// ```sql
/// CREATE TABLE oauth_tokens (
///     id INTEGER PRIMARY KEY,
///     service TEXT NOT NULL UNIQUE,
///     access_token TEXT NOT NULL,       -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,               -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     expires_at TEXT NOT NULL,         -- RFC 3339
///     scope TEXT,
///     token_type TEXT NOT NULL DEFAULT 'Bearer',
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// # Failure model
/// Storage errors never escape this type. Writes report `false`, reads
/// report `None`, and the cause is logged.
pub struct CredentialStore {
    backend: Backend,
    cipher: TokenCipher,
    service: String,
}

impl CredentialStore {
    /// Creates a store for the default `"yahoo"` service.
    ///
    /// # Arguments
    /// * `db_path` - SQLite database path; `None` selects in-memory mode
    /// * `encryption_key` - Base64-encoded 32-byte key; `None` generates one
    ///
    /// # Returns
    /// * `Err(AuthError::Configuration)` - If the key is present but invalid
    ///
    /// A database that cannot be opened is not an error: the store falls back
    /// to [`StoreMode::InMemory`].
    pub fn new(db_path: Option<&str>, encryption_key: Option<&str>) -> AuthResult<Self> {
        Self::with_service(db_path, encryption_key, DEFAULT_SERVICE)
    }

    pub fn with_service(
        db_path: Option<&str>,
        encryption_key: Option<&str>,
        service: &str,
    ) -> AuthResult<Self> {
        let cipher = match encryption_key {
            Some(key) => TokenCipher::from_base64(key).map_err(|e| {
                AuthError::Configuration(format!("Invalid encryption key: {:#}", e))
            })?,
            None => {
                let (cipher, generated) = TokenCipher::generate();
                warn!(
                    generated_key = %generated,
                    "No encryption key configured, generated a new one. \
                     Set TOKEN_ENCRYPTION_KEY to this value or stored tokens \
                     become unreadable after restart"
                );
                cipher
            }
        };

        let backend = match db_path {
            Some(path) => match open_database(path) {
                Ok(conn) => {
                    info!(db_path = %path, service = %service, "OAuth tokens table initialized");
                    Backend::Sqlite(Mutex::new(conn))
                }
                Err(e) => {
                    error!(
                        db_path = %path,
                        error = %format!("{:#}", e),
                        "Failed to initialize token database, using in-memory storage"
                    );
                    Backend::Memory(Mutex::new(HashMap::new()))
                }
            },
            None => {
                warn!("No token database configured, using in-memory storage");
                Backend::Memory(Mutex::new(HashMap::new()))
            }
        };

        Ok(Self {
            backend,
            cipher,
            service: service.to_string(),
        })
    }

    pub fn mode(&self) -> StoreMode {
        match self.backend {
            Backend::Sqlite(_) => StoreMode::Durable,
            Backend::Memory(_) => StoreMode::InMemory,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Saves tokens, superseding any previous record for this service.
    ///
    /// `expires_in` is relative to now and may be negative. A `None`
    /// refresh token keeps whichever refresh token is already stored.
    ///
    /// Returns `false` if encryption or the backend write failed.
    pub fn save(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
        scope: Option<&str>,
    ) -> bool {
        match self.try_save(access_token, refresh_token, expires_in, scope) {
            Ok(()) => {
                info!(
                    service = %self.service,
                    mode = %self.mode(),
                    has_refresh_token = refresh_token.is_some(),
                    "Tokens saved"
                );
                true
            }
            Err(e) => {
                error!(service = %self.service, error = %format!("{:#}", e), "Failed to save tokens");
                false
            }
        }
    }

    /// Returns the decrypted credential set, or `None` if there is none or
    /// it cannot be read back (wrong key, corrupted row, backend error).
    pub fn get(&self) -> Option<CredentialSet> {
        match self.try_get() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(service = %self.service, error = %format!("{:#}", e), "Failed to retrieve tokens");
                None
            }
        }
    }

    /// Removes the record. Deleting a missing record succeeds.
    pub fn delete(&self) -> bool {
        match self.try_delete() {
            Ok(removed) => {
                info!(service = %self.service, removed, "Tokens deleted");
                true
            }
            Err(e) => {
                error!(service = %self.service, error = %format!("{:#}", e), "Failed to delete tokens");
                false
            }
        }
    }

    /// True if there is no usable record or it expires within the safety buffer.
    pub fn is_expired(&self) -> bool {
        self.get().map_or(true, |credentials| credentials.is_expired())
    }

    fn try_save(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
        scope: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = expiry_from_now(now, expires_in)
            .ok_or_else(|| anyhow!("expires_in out of range: {}", expires_in))?;
        let record = StoredRecord {
            access_token: self
                .cipher
                .encrypt(access_token)
                .context("Failed to encrypt access token")?,
            refresh_token: refresh_token
                .map(|token| self.cipher.encrypt(token))
                .transpose()
                .context("Failed to encrypt refresh token")?,
            expires_at,
            scope: scope.map(str::to_string),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
        };

        match &self.backend {
            Backend::Sqlite(conn) => {
                let now = now.to_rfc3339();
                let (refresh_ciphertext, refresh_nonce) = match &record.refresh_token {
                    Some(field) => (Some(field.ciphertext.as_str()), Some(field.nonce.as_str())),
                    None => (None, None),
                };

                // One statement, so a concurrent save can never interleave
                // a new access token with a stale expiry.
                lock(conn)
                    .execute(
                        r#"
                        INSERT INTO oauth_tokens (
                            service,
                            access_token, access_token_nonce,
                            refresh_token, refresh_token_nonce,
                            expires_at, scope, token_type,
                            created_at, updated_at
                        )
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                        ON CONFLICT(service) DO UPDATE SET
                            access_token = excluded.access_token,
                            access_token_nonce = excluded.access_token_nonce,
                            refresh_token = COALESCE(excluded.refresh_token, oauth_tokens.refresh_token),
                            refresh_token_nonce = COALESCE(excluded.refresh_token_nonce, oauth_tokens.refresh_token_nonce),
                            expires_at = excluded.expires_at,
                            scope = excluded.scope,
                            updated_at = excluded.updated_at
                        "#,
                        params![
                            self.service,
                            record.access_token.ciphertext,
                            record.access_token.nonce,
                            refresh_ciphertext,
                            refresh_nonce,
                            record.expires_at.to_rfc3339(),
                            record.scope,
                            record.token_type,
                            now,
                            now,
                        ],
                    )
                    .context("Failed to upsert tokens")?;
            }
            Backend::Memory(map) => {
                let mut map = lock(map);
                let previous_refresh = map
                    .get(&self.service)
                    .and_then(|existing| existing.refresh_token.clone());
                let record = StoredRecord {
                    refresh_token: record.refresh_token.or(previous_refresh),
                    ..record
                };
                map.insert(self.service.clone(), record);
            }
        }

        Ok(())
    }

    fn try_get(&self) -> Result<Option<CredentialSet>> {
        let record = match &self.backend {
            Backend::Sqlite(conn) => lock(conn)
                .query_row(
                    r#"
                    SELECT access_token, access_token_nonce,
                           refresh_token, refresh_token_nonce,
                           expires_at, scope, token_type
                    FROM oauth_tokens
                    WHERE service = ?1
                    ORDER BY updated_at DESC
                    LIMIT 1
                    "#,
                    params![self.service],
                    |row| {
                        Ok((
                            EncryptedField {
                                ciphertext: row.get(0)?,
                                nonce: row.get(1)?,
                            },
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    },
                )
                .optional()
                .context("Failed to query tokens")?
                .map(
                    |(access_token, refresh, refresh_nonce, expires_at, scope, token_type)| {
                        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
                            .context("Failed to parse expires_at timestamp")?
                            .with_timezone(&Utc);
                        let refresh_token = match (refresh, refresh_nonce) {
                            (Some(ciphertext), Some(nonce)) => {
                                Some(EncryptedField { ciphertext, nonce })
                            }
                            _ => None,
                        };
                        Ok::<_, anyhow::Error>(StoredRecord {
                            access_token,
                            refresh_token,
                            expires_at,
                            scope,
                            token_type,
                        })
                    },
                )
                .transpose()?,
            Backend::Memory(map) => lock(map).get(&self.service).cloned(),
        };

        let Some(record) = record else {
            debug!(service = %self.service, "No stored tokens");
            return Ok(None);
        };

        let access_token = self
            .cipher
            .decrypt(&record.access_token)
            .context("Failed to decrypt access token")?;
        let refresh_token = record
            .refresh_token
            .as_ref()
            .map(|field| self.cipher.decrypt(field))
            .transpose()
            .context("Failed to decrypt refresh token")?;

        Ok(Some(CredentialSet {
            access_token,
            refresh_token,
            expires_at: record.expires_at,
            scope: record.scope,
            token_type: record.token_type,
        }))
    }

    fn try_delete(&self) -> Result<bool> {
        match &self.backend {
            Backend::Sqlite(conn) => {
                let rows_affected = lock(conn)
                    .execute(
                        "DELETE FROM oauth_tokens WHERE service = ?1",
                        params![self.service],
                    )
                    .context("Failed to delete tokens")?;
                Ok(rows_affected > 0)
            }
            Backend::Memory(map) => Ok(lock(map).remove(&self.service).is_some()),
        }
    }
}

/// Opens the database and creates the schema if it does not exist yet.
fn open_database(db_path: &str) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open token database at {}", db_path))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_tokens (
            id INTEGER PRIMARY KEY,
            service TEXT NOT NULL UNIQUE,
            access_token TEXT NOT NULL,
            access_token_nonce TEXT NOT NULL,
            refresh_token TEXT,
            refresh_token_nonce TEXT,
            expires_at TEXT NOT NULL,
            scope TEXT,
            token_type TEXT NOT NULL DEFAULT 'Bearer',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_oauth_tokens_service ON oauth_tokens(service);
        "#,
    )
    .context("Failed to create oauth_tokens table")?;

    Ok(conn)
}

/// A panic while holding the lock cannot leave a half-written record
/// (every write is a single statement or a single map insert).
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
