//! Encrypted, single-slot storage for the Yahoo OAuth credential set.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - save / get / delete / is_expired      │
//! │  - Transparent encryption/decryption     │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher (AES-256-GCM)          │
//! │  - Unique nonce per token per write      │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌──────────────────┐  ┌──────────────────┐
//! │ SQLite (durable) │  │ HashMap (fallback)│
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! The store holds at most one record per service key. If SQLite cannot be
//! opened at construction the store switches to an in-memory map for the
//! rest of its lifetime; [`CredentialStore::mode`] reports which one is
//! active. Tokens are encrypted in both modes.
//!
//! # Usage
//!
//! ```no_run
//! use yahoo_oauth::credentials::CredentialStore;
//!
//! let key = std::env::var("TOKEN_ENCRYPTION_KEY").ok();
//! let store = CredentialStore::new(Some("tokens.db"), key.as_deref()).unwrap();
//!
//! store.save("access", Some("refresh"), 3600, None);
//! if let Some(creds) = store.get() {
//!     println!("expires at {}", creds.expires_at);
//! }
//! store.delete();
//! ```

use chrono::{DateTime, Datelike, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod storage;

pub use encryption::{EncryptedField, TokenCipher};
pub use storage::{CredentialStore, StoreMode};

/// Service key of the single stored credential set.
pub const DEFAULT_SERVICE: &str = "yahoo";

/// Default `token_type` for stored credentials.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Seconds before `expires_at` at which a token is already treated as expired.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// The one persisted credential set.
///
/// Plaintext only ever lives here, in process memory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialSet {
    /// OAuth access token (used for API requests)
    pub access_token: String,

    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: Option<String>,

    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,

    pub scope: Option<String>,

    pub token_type: String,
}

impl CredentialSet {
    /// True if `now` is within [`EXPIRY_BUFFER_SECS`] of `expires_at` or past it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_stale(self.expires_at, now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Expiry predicate shared by the store and the client's token cache.
pub(crate) fn is_stale(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at
        .checked_sub_signed(Duration::seconds(EXPIRY_BUFFER_SECS))
        .map_or(true, |threshold| now >= threshold)
}

/// Absolute expiry `expires_in` seconds after `now`.
///
/// `None` if the result does not fit in a four-digit-year RFC 3339
/// timestamp, the format the store persists.
pub(crate) fn expiry_from_now(now: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|delta| now.checked_add_signed(delta))
        .filter(|expires_at| (0..=9999).contains(&expires_at.year()))
}
