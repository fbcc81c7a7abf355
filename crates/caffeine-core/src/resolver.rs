//! Reconciliation of declared plugins against the lock and the plugins directory
//!
//! [`resolve`] is a pure function: everything it needs (including upstream heads,
//! queried beforehand by the caller) is passed in, and it touches nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use crate::error::{CaffeineError, Result};
use crate::git::UpstreamHead;
use crate::plugin::{
    validate_name, Action, ActionKind, Confirmation, InstalledPlugin, LockEntry, PluginSpec,
    TargetVersion,
};
use crate::store::LockSnapshot;

/// Upstream heads keyed by plugin name
pub type UpstreamHeads = BTreeMap<String, UpstreamHead>;

/// Result of a resolve run
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Staging directories left behind by earlier runs
    pub orphaned_staging: Vec<PathBuf>,
}

impl Plan {
    /// Actions that change something on disk
    pub fn changes(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.is_change())
    }

    pub fn needing_confirmation(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.needs_confirmation())
    }

    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Actions safe to execute. Unless `confirmed`, actions that need
    /// confirmation are dropped.
    pub fn executable(&self, confirmed: bool) -> Vec<Action> {
        self.actions
            .iter()
            .filter(|a| confirmed || !a.needs_confirmation())
            .cloned()
            .collect()
    }
}

/// Reject invalid names and duplicates before anything runs
pub fn validate_declared(declared: &[PluginSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in declared {
        spec.validate()?;
        if !seen.insert(spec.name.as_str()) {
            return Err(CaffeineError::DuplicateName {
                name: spec.name.clone(),
            });
        }
    }
    Ok(())
}

/// Whether the resolver would consult upstream for this plugin: declared,
/// locked, installed at the locked commit, no new pin, auto-update allowed.
pub fn wants_upstream(
    spec: &PluginSpec,
    locked: Option<&LockEntry>,
    installed: Option<&InstalledPlugin>,
) -> bool {
    let (Some(locked), Some(installed)) = (locked, installed) else {
        return false;
    };
    !spec.skip_auto_update
        && installed.commit.as_deref() == Some(locked.commit())
        && !pin_changed(spec, locked)
}

fn pin_changed(spec: &PluginSpec, locked: &LockEntry) -> bool {
    spec.reference.is_some() && spec.reference.as_deref() != locked.reference()
}

/// Diff declared specs against the lock snapshot and installed listing.
///
/// Output order: declared plugins in declaration order, then lock-only plugins,
/// then orphaned directories (both sorted by name).
pub fn resolve(
    declared: &[PluginSpec],
    lock: &LockSnapshot,
    installed: &[InstalledPlugin],
    upstream: &UpstreamHeads,
) -> Result<Vec<Action>> {
    validate_declared(declared)?;

    let installed: HashMap<&str, &InstalledPlugin> =
        installed.iter().map(|p| (p.name.as_str(), p)).collect();
    let declared_names: HashSet<&str> = declared.iter().map(|s| s.name.as_str()).collect();

    let mut actions = Vec::with_capacity(declared.len());

    for spec in declared {
        let locked = lock.get(&spec.name);
        let on_disk = installed.get(spec.name.as_str()).copied();
        actions.push(resolve_declared(spec, locked, on_disk, upstream.get(&spec.name)));
    }

    for (name, entry) in lock {
        if !declared_names.contains(name.as_str()) {
            validate_name(name)?;
            actions.push(Action::remove(name.clone(), Some(entry.version())));
        }
    }

    let mut orphans: Vec<&InstalledPlugin> = installed
        .values()
        .filter(|p| !declared_names.contains(p.name.as_str()) && !lock.contains_key(&p.name))
        .copied()
        .collect();
    orphans.sort_by(|a, b| a.name.cmp(&b.name));
    for orphan in orphans {
        let from = orphan
            .commit
            .as_ref()
            .map(|commit| TargetVersion::pinned(None, commit.clone()));
        actions.push(Action::remove(orphan.name.clone(), from).requiring(Confirmation::Orphan));
    }

    Ok(actions)
}

fn resolve_declared(
    spec: &PluginSpec,
    locked: Option<&LockEntry>,
    installed: Option<&InstalledPlugin>,
    upstream: Option<&UpstreamHead>,
) -> Action {
    let Some(locked) = locked else {
        let action = Action::install(spec, TargetVersion::from_spec(spec));
        return match installed {
            Some(_) => action.requiring(Confirmation::Unmanaged),
            None => action,
        };
    };

    let Some(installed) = installed else {
        // Reproducible reinstall, unless the pin moved
        let to = if pin_changed(spec, locked) {
            TargetVersion::from_spec(spec)
        } else {
            locked.version()
        };
        return Action::install(spec, to);
    };

    if installed.commit.as_deref() != Some(locked.commit()) {
        let from = TargetVersion {
            reference: None,
            commit: installed.commit.clone(),
        };
        return Action::upgrade(spec, from, locked.version()).requiring(Confirmation::Drift {
            installed: installed.commit.clone(),
            locked: locked.commit().to_string(),
        });
    }

    if pin_changed(spec, locked) {
        return Action::upgrade(spec, locked.version(), TargetVersion::from_spec(spec));
    }

    if !spec.skip_auto_update {
        if let Some(head) = upstream.filter(|head| head.commit != locked.commit()) {
            let to = TargetVersion::pinned(
                head.reference.clone().or_else(|| spec.reference.clone()),
                head.commit.clone(),
            );
            return Action::upgrade(spec, locked.version(), to);
        }
    }

    Action::noop(spec, locked.version())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::commit;
    use std::path::PathBuf;

    fn locked(spec: &PluginSpec, commit_hash: &str, tag: Option<&str>) -> LockEntry {
        LockEntry::new(spec, commit_hash, tag.map(String::from))
    }

    fn on_disk(name: &str, commit_hash: Option<&str>) -> InstalledPlugin {
        InstalledPlugin {
            name: name.to_string(),
            path: PathBuf::from("/plugins").join(name),
            commit: commit_hash.map(String::from),
        }
    }

    fn snapshot(entries: &[LockEntry]) -> LockSnapshot {
        entries.iter().map(|e| (e.name.clone(), e.clone())).collect()
    }

    #[test]
    fn test_fresh_plugin_installs() {
        let spec = PluginSpec::new("a", "o/a").with_ref("v1.0.0");
        let actions = resolve(
            &[spec.clone()],
            &LockSnapshot::new(),
            &[],
            &UpstreamHeads::new(),
        )
        .unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Install);
        assert_eq!(actions[0].to, Some(TargetVersion::reference("v1.0.0")));
        assert!(!actions[0].needs_confirmation());
    }

    #[test]
    fn test_every_fresh_plugin_gets_exactly_one_install() {
        let declared: Vec<PluginSpec> = (0..5)
            .map(|i| PluginSpec::new(format!("p{}", i), format!("o/p{}", i)))
            .collect();
        let actions =
            resolve(&declared, &LockSnapshot::new(), &[], &UpstreamHeads::new()).unwrap();

        assert_eq!(actions.len(), 5);
        for (spec, action) in declared.iter().zip(&actions) {
            assert_eq!(action.name, spec.name);
            assert_eq!(action.kind, ActionKind::Install);
        }
    }

    #[test]
    fn test_locked_and_installed_is_noop() {
        let spec = PluginSpec::new("a", "o/a").with_ref("v1.0.0");
        let lock = snapshot(&[locked(&spec, &commit("x"), Some("v1.0.0"))]);
        let installed = [on_disk("a", Some(&commit("x")))];

        let actions = resolve(&[spec], &lock, &installed, &UpstreamHeads::new()).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::NoOp);
    }

    #[test]
    fn test_changed_pin_upgrades() {
        let spec = PluginSpec::new("a", "o/a").with_ref("v2.0.0");
        let lock = snapshot(&[locked(&spec, &commit("x"), Some("v1.0.0"))]);
        let installed = [on_disk("a", Some(&commit("x")))];

        let actions = resolve(&[spec], &lock, &installed, &UpstreamHeads::new()).unwrap();
        assert_eq!(actions[0].kind, ActionKind::Upgrade);
        assert_eq!(actions[0].to, Some(TargetVersion::reference("v2.0.0")));
    }

    #[test]
    fn test_newer_upstream_upgrades_unless_skipped() {
        let spec = PluginSpec::new("a", "o/a");
        let lock = snapshot(&[locked(&spec, &commit("x"), Some("v1.0.0"))]);
        let installed = [on_disk("a", Some(&commit("x")))];
        let mut upstream = UpstreamHeads::new();
        upstream.insert(
            "a".to_string(),
            UpstreamHead {
                reference: Some("v1.1.0".to_string()),
                commit: commit("y"),
            },
        );

        let actions = resolve(&[spec.clone()], &lock, &installed, &upstream).unwrap();
        assert_eq!(actions[0].kind, ActionKind::Upgrade);
        assert_eq!(
            actions[0].to,
            Some(TargetVersion::pinned(Some("v1.1.0".to_string()), commit("y")))
        );

        let pinned = spec.skip_auto_update();
        let actions = resolve(&[pinned], &lock, &installed, &upstream).unwrap();
        assert_eq!(actions[0].kind, ActionKind::NoOp);
    }

    #[test]
    fn test_upstream_at_locked_commit_is_noop() {
        let spec = PluginSpec::new("a", "o/a");
        let lock = snapshot(&[locked(&spec, &commit("x"), None)]);
        let installed = [on_disk("a", Some(&commit("x")))];
        let mut upstream = UpstreamHeads::new();
        upstream.insert(
            "a".to_string(),
            UpstreamHead {
                reference: None,
                commit: commit("x"),
            },
        );

        let actions = resolve(&[spec], &lock, &installed, &upstream).unwrap();
        assert_eq!(actions[0].kind, ActionKind::NoOp);
    }

    #[test]
    fn test_lock_only_is_removed() {
        let a = PluginSpec::new("a", "o/a");
        let b = PluginSpec::new("b", "o/b");
        let lock = snapshot(&[
            locked(&a, &commit("x"), None),
            locked(&b, &commit("y"), None),
        ]);
        let installed = [on_disk("a", Some(&commit("x"))), on_disk("b", Some(&commit("y")))];

        let actions = resolve(&[a], &lock, &installed, &UpstreamHeads::new()).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].name, "b");
        assert_eq!(actions[1].kind, ActionKind::Remove);
        assert!(!actions[1].needs_confirmation());
    }

    #[test]
    fn test_orphan_requires_confirmation() {
        let installed = [on_disk("stray", Some(&commit("z")))];
        let actions =
            resolve(&[], &LockSnapshot::new(), &installed, &UpstreamHeads::new()).unwrap();

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Remove);
        assert_eq!(actions[0].confirmation, Some(Confirmation::Orphan));

        let plan = Plan {
            actions,
            orphaned_staging: Vec::new(),
        };
        assert!(plan.executable(false).is_empty());
        assert_eq!(plan.executable(true).len(), 1);
    }

    #[test]
    fn test_missing_directory_reinstalls_locked_commit() {
        let spec = PluginSpec::new("a", "o/a").with_ref("v1.0.0");
        let lock = snapshot(&[locked(&spec, &commit("x"), Some("v1.0.0"))]);

        let actions = resolve(&[spec], &lock, &[], &UpstreamHeads::new()).unwrap();
        assert_eq!(actions[0].kind, ActionKind::Install);
        assert_eq!(
            actions[0].to,
            Some(TargetVersion::pinned(Some("v1.0.0".to_string()), commit("x")))
        );
    }

    #[test]
    fn test_drift_is_surfaced() {
        let spec = PluginSpec::new("a", "o/a");
        let lock = snapshot(&[locked(&spec, &commit("x"), None)]);
        let installed = [on_disk("a", Some(&commit("tampered")))];

        let actions = resolve(&[spec], &lock, &installed, &UpstreamHeads::new()).unwrap();
        assert_eq!(actions[0].kind, ActionKind::Upgrade);
        assert!(matches!(
            actions[0].confirmation,
            Some(Confirmation::Drift { .. })
        ));
    }

    #[test]
    fn test_unmanaged_directory_requires_confirmation() {
        let spec = PluginSpec::new("a", "o/a");
        let installed = [on_disk("a", None)];

        let actions =
            resolve(&[spec], &LockSnapshot::new(), &installed, &UpstreamHeads::new()).unwrap();
        assert_eq!(actions[0].kind, ActionKind::Install);
        assert_eq!(actions[0].confirmation, Some(Confirmation::Unmanaged));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let declared = [PluginSpec::new("a", "o/a"), PluginSpec::new("a", "o/other")];
        let result = resolve(&declared, &LockSnapshot::new(), &[], &UpstreamHeads::new());
        assert!(matches!(result, Err(CaffeineError::DuplicateName { name }) if name == "a"));
    }

    #[test]
    fn test_invalid_lock_only_name_aborts() {
        let mut entry = locked(&PluginSpec::new("a", "o/a"), &commit("1"), None);
        entry.name = "../victim".to_string();
        let lock: LockSnapshot = [(entry.name.clone(), entry)].into_iter().collect();

        let result = resolve(&[], &lock, &[], &UpstreamHeads::new());
        assert!(matches!(result, Err(CaffeineError::InvalidPluginName { .. })));
    }

    #[test]
    fn test_wants_upstream() {
        let spec = PluginSpec::new("a", "o/a");
        let entry = locked(&spec, &commit("x"), None);
        let installed = on_disk("a", Some(&commit("x")));

        assert!(wants_upstream(&spec, Some(&entry), Some(&installed)));
        assert!(!wants_upstream(&spec, None, Some(&installed)));
        assert!(!wants_upstream(&spec, Some(&entry), None));
        assert!(!wants_upstream(
            &spec.clone().skip_auto_update(),
            Some(&entry),
            Some(&installed)
        ));
    }

    #[test]
    fn test_ordering() {
        let c = PluginSpec::new("c", "o/c");
        let a = PluginSpec::new("a", "o/a");
        let lock = snapshot(&[
            locked(&PluginSpec::new("z", "o/z"), &commit("1"), None),
            locked(&PluginSpec::new("m", "o/m"), &commit("2"), None),
        ]);
        let installed = [on_disk("y", None), on_disk("b", None)];

        let actions = resolve(&[c, a], &lock, &installed, &UpstreamHeads::new()).unwrap();
        let names: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "m", "z", "b", "y"]);
    }
}
