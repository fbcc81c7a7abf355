//! Installed-directory listing

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::Result;
use crate::git::GitOperator;
use crate::plugin::types::InstalledPlugin;

/// List plugin directories under `plugins_dir` with their checked-out commit.
///
/// Hidden entries (the `.caffeine` bookkeeping directory among them) and plain
/// files are skipped. A directory whose git metadata cannot be read is still
/// listed, with `commit: None`.
pub fn scan_installed(plugins_dir: &Path, git: &dyn GitOperator) -> Result<Vec<InstalledPlugin>> {
    if !plugins_dir.exists() {
        return Ok(Vec::new());
    }

    let mut installed = Vec::new();
    for entry in fs::read_dir(plugins_dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }

        let commit = match git.current_commit(&path) {
            Ok(commit) => Some(commit),
            Err(e) => {
                tracing::debug!(plugin = %name, error = %e, "installed directory has no readable commit");
                None
            }
        };
        installed.push(InstalledPlugin { name, path, commit });
    }

    installed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(installed)
}

/// Total size in bytes of the files under `path`
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Human-readable size (`4.0K`, `1.2M`), like `du -sh`
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", size, UNITS[unit])
}
