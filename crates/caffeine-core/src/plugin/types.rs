//! Plugin type definitions
//!
//! Declared specs, lock entries, on-disk facts and the per-run action/outcome types
//! that flow between the resolver, the scheduler and the transaction engine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CaffeineError, Result};

/// A plugin as declared by the user (one `[[plugins]]` table in plugins.toml)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Unique plugin name, also the installation directory name
    pub name: String,
    /// Source location: `owner/name` on GitHub, a git URL, or a local path
    #[serde(alias = "url")]
    pub repo: String,
    /// Version pin (tag or branch). `None` tracks the newest release tag.
    #[serde(default, rename = "ref", alias = "tag")]
    pub reference: Option<String>,
    /// Scripts (relative to the plugin root) run by tmux when the plugin is sourced
    #[serde(default, alias = "source")]
    pub scripts: Vec<String>,
    /// Never upgrade to newer upstream commits automatically
    #[serde(default)]
    pub skip_auto_update: bool,
    /// Initial enable flag, applied on first install only
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginSpec {
    pub fn new(name: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo: repo.into(),
            reference: None,
            scripts: Vec::new(),
            skip_auto_update: false,
            enabled: true,
        }
    }

    /// Pin to a tag or branch
    pub fn with_ref(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Add a source script
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.scripts.push(script.into());
        self
    }

    pub fn skip_auto_update(mut self) -> Self {
        self.skip_auto_update = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validate name and source location
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.repo.trim().is_empty() {
            return Err(CaffeineError::ConfigValue {
                key: format!("plugins.{}.repo", self.name),
                message: "source location is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Plugin names double as directory names, so keep them path-safe.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(CaffeineError::InvalidPluginName {
            name: name.to_string(),
        })
    }
}

/// Resolved git state recorded in the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    /// Tag or branch the commit was resolved from
    #[serde(default)]
    pub tag: Option<String>,
    pub commit_hash: String,
    /// Time of the last successful resolution
    pub last_pull: DateTime<Utc>,
}

/// One entry of caffeine-lock.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub scripts: Vec<String>,
    pub git: GitInfo,
}

impl LockEntry {
    pub fn new(spec: &PluginSpec, commit: impl Into<String>, tag: Option<String>) -> Self {
        Self {
            name: spec.name.clone(),
            repo: spec.repo.clone(),
            scripts: spec.scripts.clone(),
            git: GitInfo {
                tag,
                commit_hash: commit.into(),
                last_pull: Utc::now(),
            },
        }
    }

    pub fn commit(&self) -> &str {
        &self.git.commit_hash
    }

    pub fn reference(&self) -> Option<&str> {
        self.git.tag.as_deref()
    }

    /// Tag if known, otherwise the short commit
    pub fn version_label(&self) -> String {
        match &self.git.tag {
            Some(tag) => tag.clone(),
            None => short_commit(&self.git.commit_hash).to_string(),
        }
    }

    pub fn version(&self) -> TargetVersion {
        TargetVersion {
            reference: self.git.tag.clone(),
            commit: Some(self.git.commit_hash.clone()),
        }
    }
}

pub fn short_commit(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

/// A plugin directory found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub name: String,
    pub path: PathBuf,
    /// Checked-out commit, `None` when the git metadata is missing or corrupt
    pub commit: Option<String>,
}

/// A version an action moves from or to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetVersion {
    /// Tag or branch; `None` means "newest release tag, else default branch"
    pub reference: Option<String>,
    /// Exact commit to pin, when known
    pub commit: Option<String>,
}

impl TargetVersion {
    pub fn reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            commit: None,
        }
    }

    pub fn pinned(reference: Option<String>, commit: impl Into<String>) -> Self {
        Self {
            reference,
            commit: Some(commit.into()),
        }
    }

    pub fn from_spec(spec: &PluginSpec) -> Self {
        Self {
            reference: spec.reference.clone(),
            commit: None,
        }
    }
}

impl fmt::Display for TargetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.reference, &self.commit) {
            (Some(r), Some(c)) => write!(f, "{}@{}", r, short_commit(c)),
            (Some(r), None) => write!(f, "{}", r),
            (None, Some(c)) => write!(f, "{}", short_commit(c)),
            (None, None) => write!(f, "latest"),
        }
    }
}

/// Kind of action the resolver produced for a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Install,
    Upgrade,
    Remove,
    NoOp,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Remove => "remove",
            Self::NoOp => "noop",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an action needs explicit confirmation before it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Directory on disk with no declared spec and no lock entry
    Orphan,
    /// Declared plugin whose directory exists but was never recorded in the lock
    Unmanaged,
    /// Installed commit differs from the locked one
    Drift {
        installed: Option<String>,
        locked: String,
    },
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orphan => write!(f, "orphaned directory"),
            Self::Unmanaged => write!(f, "unmanaged directory would be replaced"),
            Self::Drift { installed, locked } => write!(
                f,
                "installed {} differs from locked {}",
                installed.as_deref().map(short_commit).unwrap_or("<unreadable>"),
                short_commit(locked)
            ),
        }
    }
}

/// One unit of work for one plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub from: Option<TargetVersion>,
    pub to: Option<TargetVersion>,
    /// Declared spec, present for Install/Upgrade/NoOp of declared plugins
    pub spec: Option<PluginSpec>,
    pub confirmation: Option<Confirmation>,
}

impl Action {
    pub fn install(spec: &PluginSpec, to: TargetVersion) -> Self {
        Self {
            name: spec.name.clone(),
            kind: ActionKind::Install,
            from: None,
            to: Some(to),
            spec: Some(spec.clone()),
            confirmation: None,
        }
    }

    pub fn upgrade(spec: &PluginSpec, from: TargetVersion, to: TargetVersion) -> Self {
        Self {
            name: spec.name.clone(),
            kind: ActionKind::Upgrade,
            from: Some(from),
            to: Some(to),
            spec: Some(spec.clone()),
            confirmation: None,
        }
    }

    pub fn remove(name: impl Into<String>, from: Option<TargetVersion>) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::Remove,
            from,
            to: None,
            spec: None,
            confirmation: None,
        }
    }

    pub fn noop(spec: &PluginSpec, current: TargetVersion) -> Self {
        Self {
            name: spec.name.clone(),
            kind: ActionKind::NoOp,
            from: Some(current.clone()),
            to: Some(current),
            spec: Some(spec.clone()),
            confirmation: None,
        }
    }

    pub fn requiring(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    pub fn needs_confirmation(&self) -> bool {
        self.confirmation.is_some()
    }

    /// Whether executing this action changes anything on disk
    pub fn is_change(&self) -> bool {
        self.kind != ActionKind::NoOp
    }
}

/// Lifecycle of a single transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Staged,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Staged => "staged",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal result of one plugin's transaction
#[derive(Debug)]
pub struct Outcome {
    pub name: String,
    pub kind: ActionKind,
    pub status: TransactionStatus,
    /// Commit now checked out, for committed installs and upgrades
    pub commit: Option<String>,
    pub error: Option<CaffeineError>,
}

impl Outcome {
    /// Committed on disk, but the lock file could not be persisted
    pub fn is_degraded(&self) -> bool {
        self.status == TransactionStatus::Committed
            && matches!(self.error, Some(CaffeineError::LockWrite { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Committed && self.error.is_none()
    }
}
