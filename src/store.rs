//! Record persistence.
//!
//! Every piece of engine state (policy config, last-check time, download
//! progress, pending update) is a small JSON document identified by a record
//! name. [`RecordStore`] is the injected file-system dependency behind them:
//! [`FsStore`] writes atomic files under the data directory, [`MemoryStore`]
//! keeps them in a map so the engine can be tested without touching disk.
//!
//! Each record is independently loadable: a missing or corrupt record never
//! affects the others.

use crate::core::{Result, UpdateError};
use crate::utils::fs::{atomic_write, remove_file_if_exists};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Byte-level storage for named records.
pub trait RecordStore: Send + Sync {
    /// Read a record, `Ok(None)` if it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replace a record. Readers never observe a partial write.
    fn write(&self, name: &str, content: &[u8]) -> Result<()>;

    /// Delete a record; deleting a missing record succeeds.
    fn remove(&self, name: &str) -> Result<()>;

    /// On-disk location of a record, if the store is file-backed.
    ///
    /// The replacement helper runs after this process exits and needs a real
    /// path to delete the pending-update record once the swap succeeds.
    fn location(&self, name: &str) -> Option<PathBuf>;
}

/// Records stored as JSON files in one directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the record files.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RecordStore for FsStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UpdateError::io(format!("reading {}", path.display()), e)),
        }
    }

    fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        let path = self.root.join(name);
        atomic_write(&path, content).map_err(|e| UpdateError::io(
            format!("writing {}", path.display()),
            std::io::Error::other(format!("{e:#}")),
        ))
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.root.join(name);
        remove_file_if_exists(&path).map_err(|e| UpdateError::io(
            format!("removing {}", path.display()),
            std::io::Error::other(format!("{e:#}")),
        ))
    }

    fn location(&self, name: &str) -> Option<PathBuf> {
        Some(self.root.join(name))
    }
}

/// In-memory record store for tests and embedded callers.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record is currently present.
    pub fn contains(&self, name: &str) -> bool {
        self.records.read().map(|r| r.contains_key(name)).unwrap_or(false)
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let records = self
            .records
            .read()
            .map_err(|_| UpdateError::io("reading memory store", std::io::Error::other("lock poisoned")))?;
        Ok(records.get(name).cloned())
    }

    fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| UpdateError::io("writing memory store", std::io::Error::other("lock poisoned")))?;
        records.insert(name.to_string(), content.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| UpdateError::io("writing memory store", std::io::Error::other("lock poisoned")))?;
        records.remove(name);
        Ok(())
    }

    fn location(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

/// Load and decode a JSON record.
///
/// Missing records yield `None`. Unreadable or corrupt records are logged,
/// removed so they cannot mislead a later reader, and also yield `None`.
pub fn load_json<T: DeserializeOwned>(store: &dyn RecordStore, name: &str) -> Option<T> {
    let bytes = match store.read(name) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read record {}: {}", name, e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding corrupt record {}: {}", name, e);
            if let Err(e) = store.remove(name) {
                debug!("Failed to remove corrupt record {}: {}", name, e);
            }
            None
        }
    }
}

/// Encode and write a JSON record.
pub fn save_json<T: Serialize>(store: &dyn RecordStore, name: &str, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).map_err(|e| UpdateError::Serialization {
        record: name.to_string(),
        reason: e.to_string(),
    })?;
    store.write(name, &content)
}
