//! Lock store (caffeine-lock.json)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::JsonStore;
use crate::error::{CaffeineError, Result};
use crate::plugin::{validate_name, LockEntry};

pub const LOCK_FILE: &str = "caffeine-lock.json";

/// Immutable view of the lock taken at resolve time
pub type LockSnapshot = BTreeMap<String, LockEntry>;

/// On-disk layout of the lock file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default)]
    pub plugins: Vec<LockEntry>,
}

impl LockFile {
    pub fn get(&self, name: &str) -> Option<&LockEntry> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// Insert or replace the entry with the same name
    pub fn upsert(&mut self, entry: LockEntry) {
        match self.plugins.iter_mut().find(|p| p.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.plugins.push(entry),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<LockEntry> {
        let index = self.plugins.iter().position(|p| p.name == name)?;
        Some(self.plugins.remove(index))
    }
}

/// Single-writer store of resolved plugin versions
pub struct LockStore {
    inner: JsonStore<LockFile>,
}

impl LockStore {
    /// Open the lock file at `path` (missing file = empty lock). Entry names
    /// become directory names, so a lock holding an invalid name is rejected.
    pub fn open(path: PathBuf) -> Result<Self> {
        let inner: JsonStore<LockFile> = JsonStore::open(path)?;
        let invalid = inner.read(|file| {
            file.plugins
                .iter()
                .find(|entry| validate_name(&entry.name).is_err())
                .map(|entry| entry.name.clone())
        });
        if let Some(name) = invalid {
            return Err(CaffeineError::ConfigParse {
                path: inner.path().to_path_buf(),
                message: format!("invalid plugin name '{}' in lock entry", name),
            });
        }
        Ok(Self { inner })
    }

    /// Open `caffeine-lock.json` inside `dir`
    pub fn open_in(dir: &Path) -> Result<Self> {
        Self::open(dir.join(LOCK_FILE))
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn snapshot(&self) -> LockSnapshot {
        self.inner.read(|file| {
            file.plugins
                .iter()
                .map(|entry| (entry.name.clone(), entry.clone()))
                .collect()
        })
    }

    pub fn get(&self, name: &str) -> Option<LockEntry> {
        self.inner.read(|file| file.get(name).cloned())
    }

    /// Record a committed install. Fails with `LockWrite` when only the
    /// in-memory copy could be updated.
    pub fn record(&self, entry: LockEntry) -> Result<()> {
        tracing::debug!(plugin = %entry.name, commit = %entry.git.commit_hash, "recording lock entry");
        self.inner.update(|file| file.upsert(entry))
    }

    /// Drop a plugin's entry, returning it if it existed
    pub fn forget(&self, name: &str) -> Result<Option<LockEntry>> {
        self.inner.update(|file| file.remove(name))
    }

    /// Retry persisting the in-memory lock
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}
