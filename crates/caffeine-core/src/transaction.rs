//! Per-plugin transactions
//!
//! Install/Upgrade: lock plugin -> stage clone -> checkout -> confirm commit ->
//! verify scripts -> swap into place -> record lock entry.
//! Remove: lock plugin -> delete directory -> forget lock entry and flag.
//!
//! Every failure before the swap discards the staged tree, so the live
//! directory and the lock entry stay exactly as they were.

use std::fs;
use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CaffeineError, Result};
use crate::git::{latest_release_tag, GitOperator};
use crate::plugin::{
    Action, ActionKind, LockEntry, Outcome, PluginSpec, TargetVersion, TransactionStatus,
};
use crate::staging::{StagedDir, StagingArea};
use crate::store::{LockStore, StateStore};

/// Shared cancellation flag. Transactions observe it at their pre-commit
/// checkpoints and roll back; a swap in progress always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One action plus its status
#[derive(Debug)]
struct Transaction {
    action: Action,
    status: TransactionStatus,
}

impl Transaction {
    fn new(action: Action) -> Self {
        Self {
            action,
            status: TransactionStatus::Pending,
        }
    }

    fn advance(&mut self, status: TransactionStatus) {
        debug_assert!(
            !self.status.is_terminal(),
            "transaction {} already {}",
            self.action.name,
            self.status
        );
        tracing::debug!(plugin = %self.action.name, from = %self.status, to = %status, "transaction");
        self.status = status;
    }
}

/// Result of a successful staging run
struct StagedInstall {
    commit: String,
    reference: Option<String>,
}

/// Executes one action at a time against the shared stores
pub struct TransactionEngine<'a> {
    git: &'a dyn GitOperator,
    staging: &'a StagingArea,
    lock: &'a LockStore,
    state: &'a StateStore,
    cancel: &'a CancelToken,
}

impl<'a> TransactionEngine<'a> {
    pub fn new(
        git: &'a dyn GitOperator,
        staging: &'a StagingArea,
        lock: &'a LockStore,
        state: &'a StateStore,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            git,
            staging,
            lock,
            state,
            cancel,
        }
    }

    /// Run `action` to a terminal status
    pub fn execute(&self, action: Action) -> Outcome {
        let mut tx = Transaction::new(action);

        let result = match tx.action.kind {
            ActionKind::Install | ActionKind::Upgrade => self.install(&mut tx),
            ActionKind::Remove => self.remove(&mut tx),
            ActionKind::NoOp => Ok(Committed {
                commit: tx
                    .action
                    .to
                    .as_ref()
                    .and_then(|to| to.commit.clone()),
                store_error: None,
            }),
        };

        let (commit, error) = match result {
            Ok(committed) => {
                tx.advance(TransactionStatus::Committed);
                (committed.commit, committed.store_error)
            }
            Err(CaffeineError::Cancelled) => {
                tx.advance(TransactionStatus::RolledBack);
                (None, Some(CaffeineError::Cancelled))
            }
            Err(e) => {
                tracing::warn!(plugin = %tx.action.name, kind = %tx.action.kind, error = %e, "transaction failed");
                tx.advance(TransactionStatus::Failed);
                (None, Some(e))
            }
        };

        Outcome {
            name: tx.action.name,
            kind: tx.action.kind,
            status: tx.status,
            commit,
            error,
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(CaffeineError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn install(&self, tx: &mut Transaction) -> Result<Committed> {
        let spec = tx
            .action
            .spec
            .clone()
            .ok_or_else(|| CaffeineError::ConfigValue {
                key: tx.action.name.clone(),
                message: format!("{} action without a declared spec", tx.action.kind),
            })?;
        let target = tx
            .action
            .to
            .clone()
            .unwrap_or_else(|| TargetVersion::from_spec(&spec));

        self.checkpoint()?;
        let _guard = self.staging.lock_plugin(&spec.name)?;
        let staged = self.staging.acquire(&spec.name)?;

        let prepared = match self.stage(&spec, &target, &staged) {
            Ok(prepared) => prepared,
            Err(e) => {
                discard(staged);
                return Err(e);
            }
        };
        tx.advance(TransactionStatus::Staged);

        if let Err(e) = self.checkpoint() {
            discard(staged);
            return Err(e);
        }

        let previous = staged.commit()?;
        if let Some(previous) = previous {
            if let Err(e) = fs::remove_dir_all(&previous) {
                tracing::warn!(path = %previous.display(), error = %e, "previous installation left for reclamation");
            }
        }
        tracing::info!(plugin = %spec.name, commit = %prepared.commit, "installed");

        let entry = LockEntry::new(&spec, prepared.commit.clone(), prepared.reference);
        let mut store_error = self.lock.record(entry).err();
        if let Err(e) = self.state.init_flag(&spec.name, spec.enabled) {
            store_error.get_or_insert(e);
        }

        Ok(Committed {
            commit: Some(prepared.commit),
            store_error,
        })
    }

    fn stage(
        &self,
        spec: &PluginSpec,
        target: &TargetVersion,
        staged: &StagedDir,
    ) -> Result<StagedInstall> {
        let path = staged.path();
        self.git.clone_repo(&spec.repo, path)?;
        self.checkpoint()?;

        let (checkout, reference) = match (&target.commit, &target.reference) {
            (Some(commit), reference) => (Some(commit.clone()), reference.clone()),
            (None, Some(reference)) => (Some(reference.clone()), Some(reference.clone())),
            (None, None) => {
                let tags = self.git.list_tags(path)?;
                let latest = latest_release_tag(tags.iter().map(String::as_str));
                (latest.clone(), latest)
            }
        };
        self.git.checkout_ref(path, checkout.as_deref())?;

        let commit = self.git.current_commit(path)?;
        if let Some(expected) = &target.commit {
            if &commit != expected {
                return Err(CaffeineError::RefNotFound {
                    reference: expected.clone(),
                    message: format!("checked out {} instead", commit),
                });
            }
        }

        verify_scripts(spec, path)?;
        Ok(StagedInstall { commit, reference })
    }

    fn remove(&self, tx: &mut Transaction) -> Result<Committed> {
        let name = tx.action.name.clone();
        let _guard = self.staging.lock_plugin(&name)?;
        self.checkpoint()?;

        let live = self.staging.checked_live_path(&name)?;
        if live.exists() || live.is_symlink() {
            if !live.is_dir() {
                return Err(CaffeineError::PathConflict {
                    path: live,
                    message: "plugin path is not a directory".to_string(),
                });
            }
            // A partial delete leaves the lock entry in place
            fs::remove_dir_all(&live)?;
        }
        tracing::info!(plugin = %name, "removed");

        let mut store_error = self.lock.forget(&name).err();
        if let Err(e) = self.state.forget(&name) {
            store_error.get_or_insert(e);
        }

        Ok(Committed {
            commit: None,
            store_error,
        })
    }
}

/// Success of a transaction; `store_error` marks a degraded commit
struct Committed {
    commit: Option<String>,
    store_error: Option<CaffeineError>,
}

fn discard(staged: StagedDir) {
    let path = staged.path().to_path_buf();
    if let Err(e) = staged.discard() {
        tracing::warn!(path = %path.display(), error = %e, "staging left for reclamation");
    }
}

/// Every declared script must exist inside the staged tree
fn verify_scripts(spec: &PluginSpec, root: &Path) -> Result<()> {
    let missing: Vec<String> = spec
        .scripts
        .iter()
        .filter(|script| {
            let relative = Path::new(script.as_str());
            let escapes = relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            escapes || !root.join(relative).is_file()
        })
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CaffeineError::MissingSourceFiles {
            name: spec.name.clone(),
            paths: missing,
        })
    }
}
