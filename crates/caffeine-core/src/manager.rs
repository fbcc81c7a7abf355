//! Plugin Manager
//!
//! High-level API used by the CLI: resolve, execute, enable/disable, state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::config::Config;
use crate::error::{CaffeineError, Result};
use crate::git::{GitOperator, SystemGit};
use crate::plugin::{
    dir_size, scan_installed, Action, InstalledPlugin, LockEntry, Outcome, PluginSpec,
};
use crate::resolver::{self, wants_upstream, Plan, UpstreamHeads};
use crate::scheduler::{ProgressSink, Scheduler};
use crate::sourcer::{enabled_scripts, SourceReport, Sourcer};
use crate::staging::StagingArea;
use crate::store::{LockSnapshot, LockStore, StateStore};
use crate::transaction::{CancelToken, TransactionEngine};

/// Everything known about one plugin, for display
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub name: String,
    pub lock: Option<LockEntry>,
    pub enabled: bool,
    pub installed: Option<InstalledPlugin>,
    /// Size of the installed directory in bytes
    pub size: Option<u64>,
}

impl PluginStatus {
    /// Installed commit differs from the locked one
    pub fn is_drifted(&self) -> bool {
        match (&self.lock, &self.installed) {
            (Some(lock), Some(installed)) => installed.commit.as_deref() != Some(lock.commit()),
            _ => false,
        }
    }

    pub fn version_label(&self) -> String {
        self.lock
            .as_ref()
            .map(LockEntry::version_label)
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Read-only view of lock, flags and plugins directory
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub plugins: Vec<PluginStatus>,
}

impl StateSnapshot {
    pub fn get(&self, name: &str) -> Option<&PluginStatus> {
        self.plugins.iter().find(|p| p.name == name)
    }
}

pub struct PluginManager {
    git: Box<dyn GitOperator>,
    staging: StagingArea,
    lock: LockStore,
    state: StateStore,
    cancel: CancelToken,
    concurrency: usize,
}

impl PluginManager {
    /// Open with the system `git`, using `base_dir` for the lock and state files
    pub fn open(base_dir: &Path, config: &Config) -> Result<Self> {
        let mut manager = Self::with_git(
            base_dir,
            config.plugins_dir(base_dir),
            Box::new(SystemGit::new()),
        )?;
        manager.concurrency = config.install.concurrency;
        Ok(manager)
    }

    /// Open with a custom git backend (for testing)
    pub fn with_git(
        state_dir: &Path,
        plugins_dir: PathBuf,
        git: Box<dyn GitOperator>,
    ) -> Result<Self> {
        Ok(Self {
            git,
            staging: StagingArea::new(plugins_dir),
            lock: LockStore::open_in(state_dir)?,
            state: StateStore::open_in(state_dir)?,
            cancel: CancelToken::new(),
            concurrency: crate::scheduler::DEFAULT_CONCURRENCY,
        })
    }

    pub fn plugins_dir(&self) -> &Path {
        self.staging.plugins_dir()
    }

    pub fn lock_store(&self) -> &LockStore {
        &self.lock
    }

    pub fn state_store(&self) -> &StateStore {
        &self.state
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Token that cancels the running and future batches of this manager
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ========== Commands ==========

    /// Compute the action list. Reads the lock, the plugins directory and
    /// upstream refs; changes nothing.
    pub fn resolve(&self, declared: &[PluginSpec]) -> Result<Plan> {
        resolver::validate_declared(declared)?;

        let lock = self.lock.snapshot();
        let installed = scan_installed(self.plugins_dir(), self.git.as_ref())?;
        let upstream = self.query_upstream(declared, &lock, &installed);

        let actions = resolver::resolve(declared, &lock, &installed, &upstream)?;
        let orphaned_staging = self.staging.orphans()?;

        tracing::debug!(
            actions = actions.len(),
            orphaned_staging = orphaned_staging.len(),
            "resolved"
        );
        Ok(Plan {
            actions,
            orphaned_staging,
        })
    }

    /// Run `actions` with at most `concurrency` workers (0 = configured default).
    /// Orphaned staging directories are reclaimed first.
    pub fn execute(
        &self,
        actions: Vec<Action>,
        concurrency: usize,
        sink: &dyn ProgressSink,
    ) -> Vec<Outcome> {
        if let Err(e) = self.reclaim_staging() {
            tracing::warn!(error = %e, "staging reclamation failed");
        }

        let concurrency = if concurrency == 0 {
            self.concurrency
        } else {
            concurrency
        };
        let engine = TransactionEngine::new(
            self.git.as_ref(),
            &self.staging,
            &self.lock,
            &self.state,
            &self.cancel,
        );
        let outcomes = Scheduler::new(engine, concurrency).run(actions, sink);

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(total = outcomes.len(), failed, "batch finished");
        outcomes
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        if self.lock.get(name).is_none() {
            return Err(CaffeineError::PluginNotFound {
                name: name.to_string(),
            });
        }
        self.state.set_enabled(name, enabled)
    }

    /// Snapshot of every plugin in the lock, the flags or the plugins directory
    pub fn current_state(&self) -> Result<StateSnapshot> {
        let lock = self.lock.snapshot();
        let flags = self.state.snapshot();
        let installed: HashMap<String, InstalledPlugin> =
            scan_installed(self.plugins_dir(), self.git.as_ref())?
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect();

        let names: BTreeSet<&String> = lock
            .keys()
            .chain(flags.keys())
            .chain(installed.keys())
            .collect();

        let plugins = names
            .into_iter()
            .map(|name| {
                let on_disk = installed.get(name).cloned();
                PluginStatus {
                    name: name.clone(),
                    lock: lock.get(name).cloned(),
                    enabled: flags.get(name).copied().unwrap_or(true),
                    size: on_disk.as_ref().map(|p| dir_size(&p.path)),
                    installed: on_disk,
                }
            })
            .collect();

        Ok(StateSnapshot { plugins })
    }

    /// Delete staging leftovers of earlier runs
    pub fn reclaim_staging(&self) -> Result<Vec<PathBuf>> {
        self.staging.reclaim_orphans()
    }

    /// Retry persisting lock and state after a degraded commit
    pub fn flush(&self) -> Result<()> {
        self.lock.flush()?;
        self.state.flush()
    }

    /// Run the scripts of every enabled plugin through tmux
    pub fn source_enabled(&self, sourcer: &Sourcer) -> SourceReport {
        let scripts = enabled_scripts(
            &self.lock.snapshot(),
            &self.state.snapshot(),
            self.plugins_dir(),
        );
        sourcer.source(&scripts)
    }

    /// Query upstream heads for plugins eligible for auto-update, in parallel.
    /// A failed query only means "no newer commit known".
    fn query_upstream(
        &self,
        declared: &[PluginSpec],
        lock: &LockSnapshot,
        installed: &[InstalledPlugin],
    ) -> UpstreamHeads {
        let installed: HashMap<&str, &InstalledPlugin> =
            installed.iter().map(|p| (p.name.as_str(), p)).collect();
        let candidates: Vec<&PluginSpec> = declared
            .iter()
            .filter(|spec| {
                wants_upstream(
                    spec,
                    lock.get(&spec.name),
                    installed.get(spec.name.as_str()).copied(),
                )
            })
            .collect();
        if candidates.is_empty() {
            return UpstreamHeads::new();
        }

        let queue = Mutex::new(candidates.into_iter());
        let heads = Mutex::new(BTreeMap::new());
        let git = self.git.as_ref();
        let workers = self.concurrency.max(1);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .next();
                    let Some(spec) = next else {
                        break;
                    };
                    match git.remote_head_commit(&spec.repo, spec.reference.as_deref()) {
                        Ok(head) => {
                            heads
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(spec.name.clone(), head);
                        }
                        Err(e) => {
                            tracing::warn!(plugin = %spec.name, error = %e, "upstream check failed");
                        }
                    }
                });
            }
        });

        heads
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
