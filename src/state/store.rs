//! Local session store: the three persisted keys that survive restarts.
//!
//! DESIGN
//! ======
//! `SessionStore` is the only code that knows the key names. Values are JSON
//! text behind a small `Storage` trait shaped like browser local storage, so the
//! backing can be a file on disk (`FileStorage`) or a map (`MemoryStorage`).
//! Every key is read and written independently; there is no cross-key
//! transaction, and `clear_all` keeps going when one removal fails.
//!
//! ERROR HANDLING
//! ==============
//! Reads never fail: a missing key, an unreadable backing, or a value that does
//! not decode all read as absent, the latter two with a warning. Writes return
//! `StoreError` and callers decide whether to surface it.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::net::types::{Room, User};

pub const USER_KEY: &str = "usuario";
pub const ROOM_KEY: &str = "sala";
pub const SESSION_KEY: &str = "sessionId";

const APP_DIR: &str = "bluffroom";
const STORE_FILE: &str = "session.json";

/// Error type for storage writes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("storage file {path} is not a JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: &'static str,
        source: serde_json::Error,
    },
    #[error("platform exposes no data directory")]
    NoDataDir,
}

// =============================================================================
// STORAGE BACKENDS
// =============================================================================

/// String key/value storage.
pub trait Storage: Send + Sync {
    /// Read the raw text stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing cannot be read.
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the text stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing cannot be written.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing cannot be written.
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process storage; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    fn items(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.items().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items().remove(key);
        Ok(())
    }
}

/// Storage in a single JSON object file. The file is rewritten on every change
/// through a sibling temp file and a rename.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<data dir>/bluffroom/session.json` for the current platform.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoDataDir`] if the platform has no data directory.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let base = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
        Ok(base.join(APP_DIR).join(STORE_FILE))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, items: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let text = serde_json::to_vec_pretty(items).map_err(|e| self.io_error(e.into()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.load()?;
        change(&mut items);
        self.save(&items)
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|items| {
            items.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.update(|items| {
            items.remove(key);
        })
    }
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// Typed access to the persisted user, room, and game session id.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Arc::new(storage),
        }
    }

    /// A store that forgets everything on exit.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::default())
    }

    /// A file-backed store at the platform default location.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoDataDir`] if no data directory can be resolved.
    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::new(FileStorage::new(FileStorage::default_path()?)))
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.read(USER_KEY)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the value cannot be persisted.
    pub fn set_user(&self, user: &User) -> Result<(), StoreError> {
        self.write(USER_KEY, user)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the key cannot be removed.
    pub fn clear_user(&self) -> Result<(), StoreError> {
        self.storage.remove_item(USER_KEY)
    }

    #[must_use]
    pub fn room(&self) -> Option<Room> {
        self.read(ROOM_KEY)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the value cannot be persisted.
    pub fn set_room(&self, room: &Room) -> Result<(), StoreError> {
        self.write(ROOM_KEY, room)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the key cannot be removed.
    pub fn clear_room(&self) -> Result<(), StoreError> {
        self.storage.remove_item(ROOM_KEY)
    }

    /// The stored game session id. Accepts both JSON-quoted and bare text.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        let raw = self.raw(SESSION_KEY)?;
        let id = serde_json::from_str::<String>(&raw).unwrap_or(raw);
        (!id.is_empty()).then_some(id)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the value cannot be persisted.
    pub fn set_session_id(&self, session_id: &str) -> Result<(), StoreError> {
        self.write(SESSION_KEY, session_id)
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the key cannot be removed.
    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.storage.remove_item(SESSION_KEY)
    }

    /// Remove all three keys. Each removal is attempted even if an earlier one
    /// failed; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] encountered.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let results = [self.clear_user(), self.clear_room(), self.clear_session()];
        results.into_iter().collect()
    }

    fn raw(&self, key: &'static str) -> Option<String> {
        match self.storage.get_item(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "store: read failed");
                None
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &'static str) -> Option<T> {
        let raw = self.raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "store: discarding undecodable value");
                None
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) -> Result<(), StoreError> {
        let text =
            serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })?;
        self.storage.set_item(key, &text)
    }
}
