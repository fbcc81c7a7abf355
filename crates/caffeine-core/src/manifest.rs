//! Declared plugin set (plugins.toml)
//!
//! ```toml
//! [[plugins]]
//! name = "tmux-sensible"
//! repo = "tmux-plugins/tmux-sensible"
//! scripts = ["sensible.tmux"]
//!
//! [[plugins]]
//! name = "tmux-resurrect"
//! repo = "tmux-plugins/tmux-resurrect"
//! ref = "v4.0.0"
//! scripts = ["resurrect.tmux"]
//! skip_auto_update = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CaffeineError, Result};
use crate::plugin::PluginSpec;
use crate::resolver::validate_declared;

pub const MANIFEST_FILE: &str = "plugins.toml";

const DEFAULT_MANIFEST_TEMPLATE: &str = r#"# caffeine plugin list
# Each [[plugins]] table declares one plugin:
#   name             directory name and unique key (required)
#   repo             "owner/name" on GitHub, a git URL or a local path (required)
#   ref              tag or branch to pin (default: newest release tag)
#   scripts          files run with `tmux run-shell` when sourcing
#   skip_auto_update never move to newer upstream commits (default: false)
#   enabled          initial enable flag on first install (default: true)
#
# [[plugins]]
# name = "tmux-sensible"
# repo = "tmux-plugins/tmux-sensible"
# scripts = ["sensible.tmux"]
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

impl Manifest {
    pub fn path(base_dir: &Path) -> PathBuf {
        base_dir.join(MANIFEST_FILE)
    }

    /// Load and validate the declared set. A missing file is an error rather
    /// than an empty set, which would resolve every installed plugin to Remove.
    pub fn load(base_dir: &Path) -> Result<Self> {
        Self::load_file(&Self::path(base_dir))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CaffeineError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let manifest: Manifest =
            toml::from_str(&content).map_err(|e| CaffeineError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        validate_declared(&manifest.plugins)?;
        Ok(manifest)
    }

    /// Write the commented template if no manifest exists yet
    pub fn init(base_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(base_dir);
        fs::create_dir_all(base_dir)?;
        if !path.exists() {
            fs::write(&path, DEFAULT_MANIFEST_TEMPLATE)?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(MANIFEST_FILE),
            r#"
            [[plugins]]
            name = "tmux-sensible"
            repo = "tmux-plugins/tmux-sensible"
            scripts = ["sensible.tmux"]

            [[plugins]]
            name = "tmux-resurrect"
            repo = "tmux-plugins/tmux-resurrect"
            ref = "v4.0.0"
            skip_auto_update = true
            enabled = false
            "#,
        )
        .unwrap();

        let manifest = Manifest::load(temp.path()).unwrap();
        assert_eq!(manifest.plugins.len(), 2);
        assert_eq!(manifest.plugins[0].name, "tmux-sensible");
        assert_eq!(manifest.plugins[1].reference.as_deref(), Some("v4.0.0"));
        assert!(manifest.plugins[1].skip_auto_update);
        assert!(!manifest.plugins[1].enabled);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(MANIFEST_FILE),
            r#"
            [[plugins]]
            name = "a"
            repo = "o/a"

            [[plugins]]
            name = "a"
            repo = "o/b"
            "#,
        )
        .unwrap();

        assert!(matches!(
            Manifest::load(temp.path()),
            Err(CaffeineError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_missing_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Manifest::load(temp.path()),
            Err(CaffeineError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_init_template_is_empty_set() {
        let temp = TempDir::new().unwrap();
        Manifest::init(temp.path()).unwrap();
        assert!(Manifest::load(temp.path()).unwrap().plugins.is_empty());
    }
}
