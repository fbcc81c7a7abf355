//! Sourcing enabled plugins into a running tmux server

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{CaffeineError, Result};
use crate::store::LockSnapshot;

/// Outcome of a sourcing pass
#[derive(Debug, Default)]
pub struct SourceReport {
    pub sourced: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Scripts of enabled, locked plugins that exist on disk, in lock order.
/// Plugins without a flag count as enabled.
pub fn enabled_scripts(
    lock: &LockSnapshot,
    flags: &BTreeMap<String, bool>,
    plugins_dir: &Path,
) -> Vec<PathBuf> {
    lock.values()
        .filter(|entry| flags.get(&entry.name).copied().unwrap_or(true))
        .flat_map(|entry| {
            let root = plugins_dir.join(&entry.name);
            entry
                .scripts
                .iter()
                .map(move |script| root.join(script))
                .collect::<Vec<_>>()
        })
        .filter(|path| path.is_file())
        .collect()
}

/// Runs scripts through `tmux run-shell`
pub struct Sourcer {
    tmux: PathBuf,
}

impl Default for Sourcer {
    fn default() -> Self {
        Self {
            tmux: PathBuf::from("tmux"),
        }
    }
}

impl Sourcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(tmux: impl Into<PathBuf>) -> Self {
        Self { tmux: tmux.into() }
    }

    /// Source each script; one failing script does not stop the rest
    pub fn source(&self, scripts: &[PathBuf]) -> SourceReport {
        let mut report = SourceReport::default();
        for script in scripts {
            match self.run_shell(script) {
                Ok(()) => report.sourced.push(script.clone()),
                Err(e) => {
                    tracing::warn!(script = %script.display(), error = %e, "sourcing failed");
                    report.failed.push((script.clone(), e.to_string()));
                }
            }
        }
        report
    }

    fn run_shell(&self, script: &Path) -> Result<()> {
        let output = Command::new(&self.tmux)
            .arg("run-shell")
            .arg(script)
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(CaffeineError::Tmux(format!(
                "run-shell failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{LockEntry, PluginSpec};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_enabled_scripts() {
        let temp = TempDir::new().unwrap();
        let plugins = temp.path();
        fs::create_dir_all(plugins.join("a")).unwrap();
        fs::write(plugins.join("a/a.tmux"), "").unwrap();
        fs::create_dir_all(plugins.join("b")).unwrap();
        fs::write(plugins.join("b/b.tmux"), "").unwrap();

        let a = PluginSpec::new("a", "o/a")
            .with_script("a.tmux")
            .with_script("gone.tmux");
        let b = PluginSpec::new("b", "o/b").with_script("b.tmux");
        let lock: LockSnapshot = [LockEntry::new(&a, "1", None), LockEntry::new(&b, "2", None)]
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect();

        let mut flags = BTreeMap::new();
        flags.insert("b".to_string(), false);

        let scripts = enabled_scripts(&lock, &flags, plugins);
        assert_eq!(scripts, vec![plugins.join("a/a.tmux")]);

        flags.insert("b".to_string(), true);
        assert_eq!(enabled_scripts(&lock, &flags, plugins).len(), 2);
    }

    #[test]
    fn test_source_reports_failures() {
        let report = Sourcer::with_program("/nonexistent/tmux")
            .source(&[PathBuf::from("/tmp/script.tmux")]);
        assert!(report.sourced.is_empty());
        assert_eq!(report.failed.len(), 1);
    }
}
