//! Plugin Module
//!
//! - `types`: declared specs, lock entries, actions and outcomes
//! - `installed`: what is actually on disk

pub mod installed;
pub mod types;

// Re-exports
pub use installed::{dir_size, format_size, scan_installed};
pub use types::{
    short_commit, validate_name, Action, ActionKind, Confirmation, GitInfo, InstalledPlugin,
    LockEntry, Outcome, PluginSpec, TargetVersion, TransactionStatus,
};
