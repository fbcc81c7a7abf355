pub mod config;
pub mod error;
pub mod git;
pub mod manager;
pub mod manifest;
pub mod plugin;
pub mod resolver;
pub mod scheduler;
pub mod sourcer;
pub mod staging;
pub mod store;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{CaffeineError, Result};
pub use git::{repo_url, GitOperator, SystemGit, UpstreamHead};
pub use manager::{PluginManager, PluginStatus, StateSnapshot};
pub use manifest::Manifest;
pub use plugin::{
    Action, ActionKind, Confirmation, InstalledPlugin, LockEntry, Outcome, PluginSpec,
    TargetVersion, TransactionStatus,
};
pub use resolver::{resolve, Plan, UpstreamHeads};
pub use scheduler::{NoProgress, ProgressEvent, ProgressSink, Scheduler, DEFAULT_CONCURRENCY};
pub use sourcer::{SourceReport, Sourcer};
pub use staging::{StagedDir, StagingArea};
pub use store::{LockSnapshot, LockStore, StateStore};
pub use transaction::{CancelToken, TransactionEngine};
