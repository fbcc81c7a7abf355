use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaffeineError {
    #[error("Duplicate plugin name in declared set: {name}")]
    DuplicateName { name: String },

    #[error("Invalid plugin name: '{name}' - must contain only alphanumeric, '.', '-', '_'")]
    InvalidPluginName { name: String },

    #[error("Failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Unknown config key: {key}")]
    ConfigKeyNotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    ConfigValue { key: String, message: String },

    #[error("Plugin not found: {name}")]
    PluginNotFound { name: String },

    #[error("Fetch failed for {source_location}: {message}")]
    Fetch {
        source_location: String,
        message: String,
    },

    #[error("Ref not found: {reference} ({message})")]
    RefNotFound { reference: String, message: String },

    #[error("Not a git repository: {path}")]
    NotARepository { path: PathBuf },

    #[error("Missing source files in {name}: {paths:?}")]
    MissingSourceFiles { name: String, paths: Vec<String> },

    #[error("Path conflict: {path} ({message})")]
    PathConflict { path: PathBuf, message: String },

    #[error("Installed but lock file not persisted: {message}")]
    LockWrite { message: String },

    #[error("Storage unavailable at {path}: {message}")]
    Storage { path: PathBuf, message: String },

    #[error("Operation cancelled before commit")]
    Cancelled,

    #[error("{failed} of {total} plugin operations failed")]
    BatchFailed { failed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Git error: {0}")]
    Git(String),

    #[error("tmux error: {0}")]
    Tmux(String),
}

pub type Result<T> = std::result::Result<T, CaffeineError>;

impl CaffeineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PluginNotFound { .. } => 2,
            Self::DuplicateName { .. }
            | Self::InvalidPluginName { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigKeyNotFound { .. }
            | Self::ConfigValue { .. } => 3,
            Self::Storage { .. } | Self::LockWrite { .. } => 4,
            Self::BatchFailed { .. } => 5,
            Self::PathConflict { .. } => 6,
            _ => 1,
        }
    }
}
