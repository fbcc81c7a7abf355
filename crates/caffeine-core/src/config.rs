use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CaffeineError, Result};
use crate::scheduler::DEFAULT_CONCURRENCY;

const CONFIG_FILE: &str = "config.toml";
const PLUGINS_SUBDIR: &str = "plugins";

/// Default config template with rich comments
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# caffeine configuration file
# Location: ~/.tmux/caffeine/config.toml

[paths]
# Where plugins are installed
# Default: <base dir>/plugins
# Example: plugins_dir = "~/.tmux/plugins"

[install]
# Number of plugins installed/upgraded/removed in parallel
# Default: 4
concurrency = 4
"#;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub install: InstallConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    /// Plugin installation directory (default: <base dir>/plugins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins_dir: Option<PathBuf>,
}

/// Batch execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Worker count for install/upgrade/remove batches
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Config {
    /// Load config from base directory
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content).map_err(|e| CaffeineError::ConfigParse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Save config to base directory
    pub fn save(&self, base_dir: &Path) -> Result<()> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir)?;

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Get config file path
    pub fn path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE)
    }

    /// Initialize config with default template (rich comments)
    pub fn init(base_dir: &Path) -> Result<PathBuf> {
        let path = base_dir.join(CONFIG_FILE);
        fs::create_dir_all(base_dir)?;

        if !path.exists() {
            fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        }

        Ok(path)
    }

    /// Default base directory (~/.tmux/caffeine)
    pub fn default_base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(CaffeineError::HomeNotFound)?;
        Ok(home.join(".tmux").join("caffeine"))
    }

    /// Resolved plugin installation directory
    pub fn plugins_dir(&self, base_dir: &Path) -> PathBuf {
        match &self.paths.plugins_dir {
            Some(dir) => expand_home(dir),
            None => base_dir.join(PLUGINS_SUBDIR),
        }
    }

    /// Get a config value by dot-notation key
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "paths.plugins_dir" => Some(
                self.paths
                    .plugins_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            "install.concurrency" => Some(self.install.concurrency.to_string()),
            _ => None,
        }
    }

    /// Set a config value by dot-notation key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "paths.plugins_dir" => {
                let trimmed = value.trim();
                self.paths.plugins_dir = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
                Ok(())
            }
            "install.concurrency" => {
                let concurrency: usize =
                    value
                        .trim()
                        .parse()
                        .map_err(|e: std::num::ParseIntError| CaffeineError::ConfigValue {
                            key: key.to_string(),
                            message: e.to_string(),
                        })?;
                if concurrency == 0 {
                    return Err(CaffeineError::ConfigValue {
                        key: key.to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                self.install.concurrency = concurrency;
                Ok(())
            }
            _ => Err(CaffeineError::ConfigKeyNotFound {
                key: key.to_string(),
            }),
        }
    }

    /// List all config keys with their current values
    pub fn list(&self) -> Vec<(String, String)> {
        ["paths.plugins_dir", "install.concurrency"]
            .iter()
            .map(|key| (key.to_string(), self.get(key).unwrap_or_default()))
            .collect()
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
