//! Persisted stores
//!
//! - `lock`: caffeine-lock.json, plugin name -> resolved version
//! - `state`: caffeine-state.json, plugin name -> enabled flag
//!
//! Both are single-writer: every mutation takes the store's mutex, updates the
//! in-memory copy, then replaces the file on disk atomically while still holding
//! the mutex. Readers get cloned snapshots.

pub mod lock;
pub mod state;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{CaffeineError, Result};

pub use lock::{LockFile, LockSnapshot, LockStore};
pub use state::{StateFile, StateStore};

/// Replace `path` with `content` via a temp file in the same directory + rename
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// JSON document guarded by a mutex and mirrored to disk
pub(crate) struct JsonStore<T> {
    path: PathBuf,
    data: Mutex<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Load from disk; a missing file is an empty store, an unreadable one is fatal
    pub(crate) fn open(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| CaffeineError::Storage {
                path: path.clone(),
                message: e.to_string(),
            })?;
            if content.trim().is_empty() {
                T::default()
            } else {
                serde_json::from_str(&content).map_err(|e| CaffeineError::Storage {
                    path: path.clone(),
                    message: e.to_string(),
                })?
            }
        } else {
            T::default()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.guard())
    }

    /// Apply `f` in memory, then persist. On a persist failure the in-memory
    /// change stays applied and `LockWrite` is returned; `flush` retries.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.guard();
        let result = f(&mut guard);
        self.persist(&guard)?;
        Ok(result)
    }

    pub(crate) fn flush(&self) -> Result<()> {
        let guard = self.guard();
        self.persist(&guard)
    }

    fn persist(&self, data: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        write_atomic(&self.path, content.as_bytes()).map_err(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "store persist failed");
            CaffeineError::LockWrite {
                message: format!("{}: {}", self.path.display(), e),
            }
        })
    }
}
