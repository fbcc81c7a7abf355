//! Enable/disable flags (caffeine-state.json)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::JsonStore;
use crate::error::Result;

pub const STATE_FILE: &str = "caffeine-state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub plugins: BTreeMap<String, bool>,
}

/// Single-writer store of per-plugin enabled flags
pub struct StateStore {
    inner: JsonStore<StateFile>,
}

impl StateStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            inner: JsonStore::open(path)?,
        })
    }

    pub fn open_in(dir: &Path) -> Result<Self> {
        Self::open(dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.inner.read(|file| file.plugins.clone())
    }

    /// Plugins without a flag count as enabled
    pub fn is_enabled(&self, name: &str) -> bool {
        self.inner
            .read(|file| file.plugins.get(name).copied().unwrap_or(true))
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.inner.update(|file| {
            file.plugins.insert(name.to_string(), enabled);
        })
    }

    /// Write the flag only if none exists yet. Returns whether it was written.
    pub fn init_flag(&self, name: &str, enabled: bool) -> Result<bool> {
        if self.inner.read(|file| file.plugins.contains_key(name)) {
            return Ok(false);
        }
        self.inner.update(|file| {
            file.plugins.entry(name.to_string()).or_insert(enabled);
            true
        })
    }

    pub fn forget(&self, name: &str) -> Result<()> {
        self.inner.update(|file| {
            file.plugins.remove(name);
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_enabled() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open_in(temp.path()).unwrap();
        assert!(store.is_enabled("anything"));
    }

    #[test]
    fn test_set_and_reopen() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open_in(temp.path()).unwrap();
        store.set_enabled("a", false).unwrap();

        let reopened = StateStore::open_in(temp.path()).unwrap();
        assert!(!reopened.is_enabled("a"));
    }

    #[test]
    fn test_init_flag_does_not_override() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open_in(temp.path()).unwrap();
        store.set_enabled("a", false).unwrap();

        assert!(!store.init_flag("a", true).unwrap());
        assert!(!store.is_enabled("a"));

        assert!(store.init_flag("b", false).unwrap());
        assert!(!store.is_enabled("b"));
    }

    #[test]
    fn test_forget() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open_in(temp.path()).unwrap();
        store.set_enabled("a", false).unwrap();
        store.forget("a").unwrap();
        assert!(!store.snapshot().contains_key("a"));
    }
}
