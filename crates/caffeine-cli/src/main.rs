use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use caffeine_core::config::Config;
use caffeine_core::manifest::Manifest;
use caffeine_core::plugin::format_size;
use caffeine_core::{
    Action, ActionKind, CaffeineError, Outcome, Plan, PluginManager, ProgressEvent, Result,
    Sourcer, TransactionStatus,
};

mod args;
mod interrupt;
use args::{Cli, Commands, ConfigAction, Shell};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let base_dir = resolve_base_dir(cli.base_dir);
    let quiet = cli.quiet;

    let result = match cli.command {
        Some(Commands::Plan) => handle_plan(&base_dir),
        Some(Commands::Sync { dry_run, yes, jobs }) => {
            handle_sync(&base_dir, dry_run, yes, jobs, quiet)
        }
        Some(Commands::Status) => handle_status(&base_dir),
        Some(Commands::Enable { name }) => handle_toggle(&base_dir, &name, true),
        Some(Commands::Disable { name }) => handle_toggle(&base_dir, &name, false),
        Some(Commands::Source) => handle_source(&base_dir, quiet),
        Some(Commands::Gc { unlock }) => handle_gc(&base_dir, unlock),
        Some(Commands::Config { action }) => handle_config(action, &base_dir),
        Some(Commands::Completions { shell }) => {
            handle_completions(shell);
            Ok(())
        }
        None => {
            Cli::command().print_help().ok();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over the flags
fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "caffeine_core=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
        Shell::Elvish => clap_complete::Shell::Elvish,
    };
    generate(shell, &mut cmd, "caffeine", &mut io::stdout());
}

fn resolve_base_dir(cli_base: Option<PathBuf>) -> PathBuf {
    if let Some(base) = cli_base {
        return base;
    }

    if let Ok(base) = std::env::var("CAFFEINE_BASE") {
        return PathBuf::from(base);
    }

    Config::default_base_dir().unwrap_or_else(|_| PathBuf::from(".caffeine"))
}

fn open_manager(base_dir: &Path) -> Result<PluginManager> {
    let config = Config::load(base_dir)?;
    tracing::debug!(base_dir = %base_dir.display(), plugins_dir = %config.plugins_dir(base_dir).display(), "opening plugin manager");
    PluginManager::open(base_dir, &config)
}

fn handle_plan(base_dir: &Path) -> Result<()> {
    let manifest = Manifest::load(base_dir)?;
    let manager = open_manager(base_dir)?;
    let plan = manager.resolve(&manifest.plugins)?;

    print_plan(&plan);
    Ok(())
}

fn handle_sync(
    base_dir: &Path,
    dry_run: bool,
    yes: bool,
    jobs: Option<usize>,
    quiet: bool,
) -> Result<()> {
    let manifest = Manifest::load(base_dir)?;
    let manager = open_manager(base_dir)?;
    let plan = manager.resolve(&manifest.plugins)?;

    if !quiet {
        print_plan(&plan);
    }
    if dry_run {
        if !quiet {
            println!("{}", "(dry run)".yellow());
        }
        return Ok(());
    }

    let held_back: Vec<&Action> = if yes {
        Vec::new()
    } else {
        plan.needing_confirmation().collect()
    };
    for action in &held_back {
        println!(
            "  {} {} {}",
            "[HELD]".yellow().bold(),
            action.name,
            "(re-run with --yes to apply)".dimmed()
        );
    }

    let actions: Vec<Action> = plan
        .executable(yes)
        .into_iter()
        .filter(Action::is_change)
        .collect();
    if actions.is_empty() {
        if !quiet {
            println!("{}", "Nothing to do.".green());
        }
        return Ok(());
    }

    let on_progress = |event: ProgressEvent| {
        if !quiet {
            print_progress(&event);
        }
    };
    let total = actions.len();
    let _interrupt = interrupt::cancel_on_interrupt(manager.cancel_token());
    let outcomes = manager.execute(actions, jobs.unwrap_or(0), &on_progress);

    summarize(&manager, &outcomes, total, quiet)
}

fn summarize(
    manager: &PluginManager,
    outcomes: &[Outcome],
    total: usize,
    quiet: bool,
) -> Result<()> {
    let committed = outcomes
        .iter()
        .filter(|o| o.status == TransactionStatus::Committed)
        .count();
    let degraded: Vec<&Outcome> = outcomes.iter().filter(|o| o.is_degraded()).collect();
    let failed = total - committed;

    if !quiet {
        println!();
        println!("Summary:");
        println!("  Committed: {}", committed);
        println!("  Failed: {}", failed);
    }

    if !degraded.is_empty() {
        for outcome in &degraded {
            eprintln!(
                "{} {} is installed but not recorded in the lock file",
                "[WARN]".yellow().bold(),
                outcome.name
            );
        }
        // The stores keep the committed state in memory; try once more
        manager.flush()?;
        if !quiet {
            println!("{}", "Lock file recovered on retry.".green());
        }
    }

    if failed > 0 {
        return Err(CaffeineError::BatchFailed { failed, total });
    }
    if !quiet {
        println!("{}", "Sync complete.".green());
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!();
    if plan.actions.is_empty() {
        println!("No plugins declared or installed.");
    }
    for action in &plan.actions {
        println!("  {}", describe_action(action));
    }
    if !plan.orphaned_staging.is_empty() {
        println!();
        println!(
            "{} staging leftover(s) will be reclaimed",
            plan.orphaned_staging.len()
        );
    }
    println!();
    println!(
        "Plan: {} to install, {} to upgrade, {} to remove, {} unchanged",
        plan.count(ActionKind::Install),
        plan.count(ActionKind::Upgrade),
        plan.count(ActionKind::Remove),
        plan.count(ActionKind::NoOp),
    );
}

fn describe_action(action: &Action) -> String {
    let tag = match action.kind {
        ActionKind::Install => "[INSTALL]".green(),
        ActionKind::Upgrade => "[UPGRADE]".cyan(),
        ActionKind::Remove => "[REMOVE]".red(),
        ActionKind::NoOp => "[OK]".normal(),
    };
    let version = match (&action.from, &action.to, action.kind) {
        (_, Some(to), ActionKind::Install) => to.to_string(),
        (Some(from), Some(to), ActionKind::Upgrade) => format!("{} -> {}", from, to),
        (Some(from), _, ActionKind::Remove) => from.to_string(),
        (_, Some(to), ActionKind::NoOp) => to.to_string(),
        _ => String::new(),
    };

    let mut line = format!("{} {} {}", tag, action.name.bold(), version.dimmed());
    if let Some(confirmation) = &action.confirmation {
        line.push_str(&format!(" {}", format!("(confirm: {})", confirmation).yellow()));
    }
    line
}

fn print_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::Started { name, kind } => {
            println!("  {} {} {}", "[RUN]".blue(), kind, name);
        }
        ProgressEvent::Finished {
            name,
            kind,
            status,
            error,
        } => {
            let tag = match (status, error) {
                (TransactionStatus::Committed, None) => "[OK]".green(),
                (TransactionStatus::Committed, Some(_)) => "[WARN]".yellow().bold(),
                (TransactionStatus::RolledBack, _) => "[SKIP]".yellow(),
                _ => "[FAIL]".red().bold(),
            };
            match error {
                Some(error) => println!("  {} {} {}: {}", tag, kind, name, error),
                None => println!("  {} {} {}", tag, kind, name),
            }
        }
    }
}

fn handle_status(base_dir: &Path) -> Result<()> {
    let manager = open_manager(base_dir)?;
    let state = manager.current_state()?;

    println!();
    println!("Plugins: {}", manager.plugins_dir().display());
    println!();

    if state.plugins.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }

    for plugin in &state.plugins {
        let enabled = if plugin.enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        let size = plugin.size.map(format_size).unwrap_or_else(|| "-".to_string());

        let mut notes = Vec::new();
        if plugin.lock.is_none() {
            notes.push("not in lock".red().to_string());
        }
        if plugin.installed.is_none() {
            notes.push("missing on disk".red().to_string());
        }
        if plugin.is_drifted() {
            notes.push("drifted".yellow().to_string());
        }

        println!(
            "  {:<24} {:<16} {:<9} {:>7} {}",
            plugin.name.cyan(),
            plugin.version_label(),
            enabled,
            size,
            notes.join(", ")
        );
    }
    println!();

    Ok(())
}

fn handle_toggle(base_dir: &Path, name: &str, enabled: bool) -> Result<()> {
    let manager = open_manager(base_dir)?;
    if enabled {
        manager.enable(name)?;
        println!("{} {}", "Enabled:".green(), name);
    } else {
        manager.disable(name)?;
        println!("{} {}", "Disabled:".yellow(), name);
    }
    Ok(())
}

fn handle_source(base_dir: &Path, quiet: bool) -> Result<()> {
    let manager = open_manager(base_dir)?;
    let report = manager.source_enabled(&Sourcer::new());

    if !quiet {
        for script in &report.sourced {
            println!("  {} {}", "[OK]".green(), script.display());
        }
    }
    for (script, error) in &report.failed {
        eprintln!("  {} {}: {}", "[FAIL]".red().bold(), script.display(), error);
    }

    if !report.failed.is_empty() {
        return Err(CaffeineError::Tmux(format!(
            "{} of {} scripts failed",
            report.failed.len(),
            report.failed.len() + report.sourced.len()
        )));
    }
    Ok(())
}

fn handle_gc(base_dir: &Path, unlock: bool) -> Result<()> {
    let manager = open_manager(base_dir)?;

    if unlock {
        let cleared = manager.staging().clear_locks()?;
        println!("{} {} lock file(s)", "Cleared:".green(), cleared);
    }

    let reclaimed = manager.reclaim_staging()?;
    for path in &reclaimed {
        println!("  {} {}", "[DEL]".red(), path.display());
    }
    println!("{} {} staging dir(s)", "Reclaimed:".green(), reclaimed.len());

    Ok(())
}

fn handle_config(action: ConfigAction, base_dir: &Path) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load(base_dir)?;
            match config.get(&key) {
                Some(value) => {
                    println!("{}", value);
                }
                None => {
                    return Err(CaffeineError::ConfigKeyNotFound { key });
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load(base_dir)?;
            config.set(&key, &value)?;
            config.save(base_dir)?;
            println!("{} {} = {}", "Set:".green(), key, value);
        }
        ConfigAction::List => {
            let config = Config::load(base_dir)?;
            println!();
            for (key, value) in config.list() {
                println!("{} = {}", key.cyan(), value);
            }
            println!();
        }
        ConfigAction::Path => {
            let path = Config::path(base_dir);
            println!("{}", path.display());
        }
        ConfigAction::Init => {
            let path = Config::init(base_dir)?;
            println!("{} {}", "Initialized:".green(), path.display());
            let manifest = Manifest::init(base_dir)?;
            println!("{} {}", "Initialized:".green(), manifest.display());
        }
    }

    Ok(())
}
