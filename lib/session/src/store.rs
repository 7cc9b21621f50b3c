//! Durable token storage.
//!
//! [`TokenStore`] is the single source of truth for the current session's
//! tokens. It keeps one JSON session record `{session_id, tokens, user}`
//! under one well-known key and never caches it in memory, so every reader
//! sees the last write. The storage medium is a [`StorageBackend`].

use crate::error::AuthError;
use crate::oauth::PendingLogin;
use crate::tokens::AuthTokens;
use chrono::Duration;
use gpu_console_access::User;
use gpu_console_core::{Clock, Result, SessionId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Default storage key of the session record.
pub const SESSION_KEY: &str = "gpu-console.session";

/// Storage key of the pending OAuth login.
pub const PENDING_LOGIN_KEY: &str = "gpu-console.oauth_state";

/// Key/value persistence used by the token store.
pub trait StorageBackend: Debug + Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> Result<(), AuthError>;

    /// Removes `key`; removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), AuthError>;
}

/// Process-local backend; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), AuthError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// reader never sees a half-written record.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `dir`; the directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_error(action: &str, path: &Path, err: &std::io::Error) -> AuthError {
    AuthError::Storage {
        details: format!("failed to {action} {}: {err}", path.display()),
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, &e).into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), AuthError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error("create", &self.dir, &e))?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value).map_err(|e| io_error("write", &tmp, &e))?;
        restrict_permissions(&tmp).map_err(|e| io_error("restrict", &tmp, &e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error("replace", &path, &e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, &e).into()),
        }
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

/// The persisted session: tokens plus the user they were issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub tokens: AuthTokens,
    pub user: User,
}

/// Durable holder of the current session's tokens.
#[derive(Debug, Clone)]
pub struct TokenStore {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    key: String,
}

impl TokenStore {
    /// Creates a store over `backend` using the default session key.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            key: SESSION_KEY.to_string(),
        }
    }

    /// Uses a different storage key for the session record.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Returns the clock expiry is measured against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Writes a complete session record.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the record cannot be written.
    pub fn save_session(
        &self,
        session_id: SessionId,
        tokens: &AuthTokens,
        user: &User,
    ) -> Result<(), AuthError> {
        let record = SessionRecord {
            session_id,
            tokens: tokens.clone(),
            user: user.clone(),
        };
        self.write(&self.key, &record)?;
        debug!(%session_id, expires_at = %tokens.expires_at, "saved session record");
        Ok(())
    }

    /// Replaces the stored tokens, keeping the stored user.
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` if there is no session to update and
    /// `Storage` if the record cannot be read or written.
    pub fn save(&self, tokens: &AuthTokens) -> Result<(), AuthError> {
        let Some(record) = self.load_record()? else {
            return Err(AuthError::SessionExpired.into());
        };
        self.save_session(record.session_id, tokens, &record.user)
    }

    /// Loads the full session record.
    ///
    /// A record that cannot be parsed is logged, removed and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend cannot be read.
    pub fn load_record(&self) -> Result<Option<SessionRecord>, AuthError> {
        self.read(&self.key)
    }

    /// Loads the stored tokens.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend cannot be read.
    pub fn load(&self) -> Result<Option<AuthTokens>, AuthError> {
        Ok(self.load_record()?.map(|record| record.tokens))
    }

    /// Loads the stored user.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend cannot be read.
    pub fn load_user(&self) -> Result<Option<User>, AuthError> {
        Ok(self.load_record()?.map(|record| record.user))
    }

    /// Removes the session record. Clearing an empty store succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the record cannot be removed.
    pub fn clear(&self) -> Result<(), AuthError> {
        self.backend.remove(&self.key)
    }

    /// Returns true if there are no tokens or they expire within `skew`.
    ///
    /// An unreadable store counts as expired.
    #[must_use]
    pub fn is_expired(&self, skew: Duration) -> bool {
        match self.load() {
            Ok(Some(tokens)) => tokens.is_expired_at(self.clock.now(), skew),
            Ok(None) => true,
            Err(report) => {
                warn!(error = %report, "cannot read session record; treating tokens as expired");
                true
            }
        }
    }

    /// Persists a started OAuth login, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the login cannot be written.
    pub fn put_pending_login(&self, pending: &PendingLogin) -> Result<(), AuthError> {
        self.write(PENDING_LOGIN_KEY, pending)
    }

    /// Reads and removes the pending OAuth login.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the backend cannot be read or updated.
    pub fn take_pending_login(&self) -> Result<Option<PendingLogin>, AuthError> {
        let pending = self.read(PENDING_LOGIN_KEY)?;
        self.backend.remove(PENDING_LOGIN_KEY)?;
        Ok(pending)
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AuthError> {
        let json = serde_json::to_string(value).map_err(|e| AuthError::Storage {
            details: format!("failed to encode {key}: {e}"),
        })?;
        self.backend.put(key, &json)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AuthError> {
        let Some(json) = self.backend.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding corrupt stored record");
                self.backend.remove(key)?;
                Ok(None)
            }
        }
    }
}
