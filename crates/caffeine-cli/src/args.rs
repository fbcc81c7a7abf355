use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "caffeine")]
#[command(about = "Git-native plugin manager for tmux")]
#[command(version)]
pub struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Base directory (default: ~/.tmux/caffeine)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what sync would do, without changing anything
    Plan,

    /// Install, upgrade and remove plugins to match plugins.toml
    Sync {
        /// Print the plan and stop
        #[arg(short, long)]
        dry_run: bool,

        /// Also run actions that need confirmation (orphans, unmanaged dirs, drift)
        #[arg(short, long)]
        yes: bool,

        /// Parallel jobs (default: install.concurrency)
        #[arg(short, long, value_name = "N")]
        jobs: Option<usize>,
    },

    /// Show installed plugins, their locked versions and enable flags
    Status,

    /// Enable an installed plugin
    Enable {
        /// Plugin name
        name: String,
    },

    /// Disable an installed plugin (keeps it installed and locked)
    Disable {
        /// Plugin name
        name: String,
    },

    /// Run the scripts of every enabled plugin through tmux
    Source,

    /// Delete staging leftovers from interrupted runs
    Gc {
        /// Also remove stale per-plugin lock files (only when no other run is active)
        #[arg(long)]
        unlock: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g., install.concurrency)
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key (e.g., paths.plugins_dir)
        key: String,

        /// Value to set (e.g., "~/.tmux/plugins")
        value: String,
    },

    /// List all config values
    List,

    /// Show config file path
    Path,

    /// Create config.toml and plugins.toml templates
    Init,
}
