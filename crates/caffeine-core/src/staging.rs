//! Staging area and per-plugin advisory locks
//!
//! ```text
//! <plugins_dir>/
//! ├── tmux-sensible/                 live installation
//! └── .caffeine/
//!     ├── staging/
//!     │   ├── tmux-yank~<uuid>        in-flight clone
//!     │   └── tmux-yank~<uuid>~old    previous tree after a swap
//!     └── locks/
//!         └── tmux-yank.lock          held while an operation runs
//! ```
//!
//! Staging lives under the plugins directory so the swap is a same-filesystem
//! rename. A staged directory that is neither committed nor discarded stays on
//! disk until a later run reclaims it. A `~old` tree whose live directory is
//! missing (a swap interrupted between its two renames) is moved back instead.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CaffeineError, Result};
use crate::plugin::validate_name;

/// Bookkeeping directory inside the plugins directory
pub const CAFFEINE_DIR: &str = ".caffeine";
const STAGING_DIR: &str = "staging";
const LOCKS_DIR: &str = "locks";
const SEPARATOR: char = '~';
const OLD_SUFFIX: &str = "~old";

pub struct StagingArea {
    plugins_dir: PathBuf,
}

impl StagingArea {
    pub fn new(plugins_dir: PathBuf) -> Self {
        Self { plugins_dir }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.plugins_dir.join(CAFFEINE_DIR).join(STAGING_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.plugins_dir.join(CAFFEINE_DIR).join(LOCKS_DIR)
    }

    /// Live installation path of a plugin
    pub fn live_path(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(name)
    }

    /// Live path of a plugin, refusing names that would leave the plugins directory
    pub fn checked_live_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let live = self.live_path(name);
        if live.parent() != Some(self.plugins_dir.as_path()) {
            return Err(CaffeineError::PathConflict {
                path: live,
                message: "not a direct child of the plugins directory".to_string(),
            });
        }
        Ok(live)
    }

    /// Take the advisory lock for `name`. `PathConflict` if another operation holds it.
    pub fn lock_plugin(&self, name: &str) -> Result<PluginLock> {
        validate_name(name)?;
        let locks_dir = self.locks_dir();
        fs::create_dir_all(&locks_dir)?;
        let path = locks_dir.join(format!("{}.lock", name));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                writeln!(file, "{}", Utc::now().to_rfc3339())?;
                Ok(PluginLock { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .ok()
                    .and_then(|content| content.lines().next().map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                Err(CaffeineError::PathConflict {
                    path,
                    message: format!("plugin '{}' is locked by process {}", name, holder),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create an empty staged directory for `name`
    pub fn acquire(&self, name: &str) -> Result<StagedDir> {
        let staging_dir = self.staging_dir();
        fs::create_dir_all(&staging_dir)?;

        let path = staging_dir.join(format!("{}{}{}", name, SEPARATOR, Uuid::new_v4()));
        fs::create_dir(&path)?;
        tracing::debug!(plugin = name, path = %path.display(), "staging acquired");

        Ok(StagedDir {
            name: name.to_string(),
            path,
            live: self.live_path(name),
        })
    }

    /// Staging leftovers whose plugin is not locked by a running operation
    pub fn orphans(&self) -> Result<Vec<PathBuf>> {
        let staging_dir = self.staging_dir();
        if !staging_dir.exists() {
            return Ok(Vec::new());
        }

        let locks_dir = self.locks_dir();
        let mut orphans = Vec::new();
        for entry in fs::read_dir(&staging_dir)? {
            let path = entry?.path();
            let Some(name) = staged_plugin_name(&path) else {
                continue;
            };
            if !locks_dir.join(format!("{}.lock", name)).exists() {
                orphans.push(path);
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    /// Delete orphaned staging directories, taking each plugin's lock first so
    /// work of a concurrent run is never touched. Previous trees of interrupted
    /// swaps are restored to their live path rather than deleted.
    pub fn reclaim_orphans(&self) -> Result<Vec<PathBuf>> {
        let mut reclaimed = Vec::new();
        for path in self.orphans()? {
            let Some(name) = staged_plugin_name(&path) else {
                continue;
            };
            let Ok(_lock) = self.lock_plugin(&name) else {
                continue;
            };

            let live = self.live_path(&name);
            if is_previous_tree(&path) && !live.exists() {
                match fs::rename(&path, &live) {
                    Ok(()) => {
                        tracing::warn!(plugin = %name, "restored previous installation after an interrupted swap");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not restore previous installation");
                    }
                }
                continue;
            }

            match remove_path(&path) {
                Ok(()) => reclaimed.push(path),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not reclaim staging directory");
                }
            }
        }
        if !reclaimed.is_empty() {
            tracing::info!(count = reclaimed.len(), "reclaimed orphaned staging directories");
        }
        Ok(reclaimed)
    }

    /// Remove every advisory lock file (left behind by crashed runs)
    pub fn clear_locks(&self) -> Result<usize> {
        let locks_dir = self.locks_dir();
        if !locks_dir.exists() {
            return Ok(0);
        }
        let mut cleared = 0;
        for entry in fs::read_dir(&locks_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "lock") {
                fs::remove_file(&path)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

/// Held advisory lock; released on drop
#[derive(Debug)]
pub struct PluginLock {
    path: PathBuf,
}

impl PluginLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PluginLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release plugin lock");
        }
    }
}

/// One staged plugin tree. Resolve with exactly one of [`commit`](Self::commit)
/// or [`discard`](Self::discard); dropping it leaves the directory for reclamation.
#[must_use = "a staged directory must be committed or discarded"]
#[derive(Debug)]
pub struct StagedDir {
    name: String,
    path: PathBuf,
    live: PathBuf,
}

impl StagedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    /// Swap the staged tree into the live path. Returns where the previous live
    /// tree was moved to, if there was one; deleting it is up to the caller.
    pub fn commit(self) -> Result<Option<PathBuf>> {
        if !self.live.exists() {
            if let Some(parent) = self.live.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&self.path, &self.live).map_err(|e| self.conflict(e))?;
            tracing::debug!(plugin = %self.name, "staging committed");
            return Ok(None);
        }

        let previous = PathBuf::from(format!("{}{}", self.path.display(), OLD_SUFFIX));
        fs::rename(&self.live, &previous).map_err(|e| self.conflict(e))?;

        if let Err(e) = fs::rename(&self.path, &self.live) {
            if let Err(restore) = fs::rename(&previous, &self.live) {
                tracing::error!(
                    plugin = %self.name,
                    previous = %previous.display(),
                    error = %restore,
                    "could not restore previous installation"
                );
            }
            return Err(self.conflict(e));
        }

        tracing::debug!(plugin = %self.name, "staging committed over previous installation");
        Ok(Some(previous))
    }

    /// Delete the staged tree, leaving the live installation untouched
    pub fn discard(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)?;
        }
        tracing::debug!(plugin = %self.name, "staging discarded");
        Ok(())
    }

    fn conflict(&self, e: std::io::Error) -> CaffeineError {
        CaffeineError::PathConflict {
            path: self.live.clone(),
            message: format!("swap failed: {}", e),
        }
    }
}

/// Plugin name encoded in a staging entry (`<name>~<uuid>[~old]`)
fn staged_plugin_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let (name, rest) = file_name.split_once(SEPARATOR)?;
    (!name.is_empty() && !rest.is_empty()).then(|| name.to_string())
}

fn is_previous_tree(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(OLD_SUFFIX))
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
