//! Time-boxed access restriction coordinator.
//!
//! All state lives under `.warden/` in a shared JSON store; every
//! command is an independent context that reads, computes, and writes.
//! `warden lock` opens a restriction window, `warden watch` polls it
//! down and handles expiry, the rest inspect or mutate the pieces.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use warden::core::phase::{FocusMode, LockState};
use warden::io::config::{WardenConfig, load_config};
use warden::io::enforcer::FileEnforcer;
use warden::io::init::{InitOptions, WardenPaths, init_warden};
use warden::io::store::FileStore;
use warden::lockout::{BeginOptions, CleanupReport, LockoutEngine};
use warden::redirect::RedirectResolver;
use warden::registry::RuleRegistry;
use warden::watch::{WatchOptions, run_watch};

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Time-boxed access restriction coordinator"
)]
struct Cli {
    /// Project root containing `.warden/`.
    #[arg(long, global = true, default_value = ".")]
    dir: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.warden/` scaffolding (store, config, rules file).
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the focus badge, window state, and time remaining.
    Status,
    /// Start a restriction window over the configured domains.
    Lock {
        /// Window length in minutes.
        #[arg(long)]
        minutes: u64,
        /// Goal substituted into the primed redirect message.
        #[arg(long)]
        reason: Option<String>,
        /// Custom text used when no reason is set.
        #[arg(long)]
        message: Option<String>,
        /// Overlay the window with relax/focus cycling.
        #[arg(long)]
        cycle: bool,
    },
    /// Set the focus mode setting shown by the badge.
    Mode {
        /// New setting.
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Poll until the window expires, then clean up and print the target.
    Watch {
        /// Encoded original URL to resolve at expiry.
        #[arg(long)]
        url: Option<String>,
        /// Tab id whose stored original URL serves as fallback.
        #[arg(long)]
        tab: Option<String>,
    },
    /// Run expiry cleanup now and print the step report.
    Expire,
    /// Resolve the navigation target for an encoded URL.
    Resolve {
        url: String,
        /// Tab id whose stored original URL serves as fallback.
        #[arg(long)]
        tab: Option<String>,
    },
    /// Inspect or mutate the active rule-id set.
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Off,
    On,
    Cycle,
}

impl ModeArg {
    fn as_str(self) -> &'static str {
        match self {
            ModeArg::Off => "off",
            ModeArg::On => "on",
            ModeArg::Cycle => "cycle",
        }
    }
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Print the active ids.
    List,
    /// Allocate fresh ids above everything active.
    Alloc { count: u32 },
    /// Release the given ids.
    Release {
        #[arg(required = true)]
        ids: Vec<u32>,
    },
    /// Clear the active set.
    Clear,
}

/// Everything a command needs from an initialized `.warden/`.
struct Workspace {
    config: WardenConfig,
    store: FileStore,
    enforcer: FileEnforcer,
}

fn main() {
    warden::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.dir, force),
        Command::Status => cmd_status(&open_workspace(&cli.dir)?),
        Command::Lock { minutes, reason, message, cycle } => cmd_lock(
            &open_workspace(&cli.dir)?,
            &BeginOptions { minutes, reason, custom_text: message, cycle },
        ),
        Command::Mode { mode } => cmd_mode(&open_workspace(&cli.dir)?, mode),
        Command::Watch { url, tab } => {
            cmd_watch(&open_workspace(&cli.dir)?, url.as_deref(), tab.as_deref())
        }
        Command::Expire => cmd_expire(&open_workspace(&cli.dir)?),
        Command::Resolve { url, tab } => {
            cmd_resolve(&open_workspace(&cli.dir)?, &url, tab.as_deref())
        }
        Command::Rules { command } => cmd_rules(&open_workspace(&cli.dir)?, &command),
    }
}

fn open_workspace(dir: &Path) -> Result<Workspace> {
    let paths = WardenPaths::new(dir);
    if !paths.warden_dir.is_dir() {
        bail!(
            "{} is not initialized (run `warden init` first)",
            paths.warden_dir.display()
        );
    }
    let config = load_config(&paths.config_path)?;
    let store = FileStore::new(&paths.store_path);
    let enforcer = FileEnforcer::new(&paths.rules_path);
    Ok(Workspace { config, store, enforcer })
}

fn cmd_init(dir: &Path, force: bool) -> Result<()> {
    let paths = init_warden(dir, &InitOptions { force })?;
    println!("initialized {}", paths.warden_dir.display());
    Ok(())
}

fn cmd_status(ws: &Workspace) -> Result<()> {
    let engine = LockoutEngine::new(&ws.store, &ws.enforcer, ws.config.clone());
    println!("{}", engine.status()?);
    match engine.state()? {
        LockState::Idle => println!("state: idle"),
        LockState::Active => println!("state: active{}", remaining_suffix(&engine)?),
        LockState::RelaxPhase => println!("state: relax phase{}", remaining_suffix(&engine)?),
        LockState::FocusPhase => println!("state: focus phase{}", remaining_suffix(&engine)?),
        LockState::Expired => println!("state: expired (cleanup pending)"),
    }
    Ok(())
}

fn remaining_suffix(engine: &LockoutEngine<'_>) -> Result<String> {
    Ok(match engine.remaining()? {
        Some(ms) => format!(" ({} remaining)", format_remaining(ms)),
        None => String::new(),
    })
}

fn cmd_lock(ws: &Workspace, options: &BeginOptions) -> Result<()> {
    let engine = LockoutEngine::new(&ws.store, &ws.enforcer, ws.config.clone());
    let outcome = engine.begin(options)?;
    let until = chrono::DateTime::from_timestamp_millis(outcome.until_ms)
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| outcome.until_ms.to_string());
    println!("locked until {until} ({} rules installed)", outcome.rule_ids.len());
    Ok(())
}

fn cmd_mode(ws: &Workspace, mode: ModeArg) -> Result<()> {
    let engine = LockoutEngine::new(&ws.store, &ws.enforcer, ws.config.clone());
    engine.set_mode(&FocusMode::parse(Some(mode.as_str())))?;
    println!("{}", engine.status()?);
    Ok(())
}

fn cmd_watch(ws: &Workspace, url: Option<&str>, tab: Option<&str>) -> Result<()> {
    let options = WatchOptions {
        url,
        tab_id: tab,
        poll: Duration::from_secs(ws.config.poll_interval_secs),
    };
    let outcome = run_watch(&ws.store, &ws.enforcer, &ws.config, &options, |badge, remaining| {
        match remaining {
            Some(ms) => println!("{badge} {} remaining", format_remaining(ms)),
            None => println!("{badge}"),
        }
    })?;

    match (&outcome.target, &outcome.report) {
        (Some(target), _) => println!("navigate: {target}"),
        (None, Some(_)) => println!("navigate: back"),
        (None, None) => println!("no restriction window"),
    }
    if let Some(report) = &outcome.report {
        print_report(report);
    }
    Ok(())
}

fn cmd_expire(ws: &Workspace) -> Result<()> {
    let engine = LockoutEngine::new(&ws.store, &ws.enforcer, ws.config.clone());
    let report = engine.expire_and_cleanup()?;
    print_report(&report);
    Ok(())
}

fn cmd_resolve(ws: &Workspace, url: &str, tab: Option<&str>) -> Result<()> {
    let resolver = RedirectResolver::new(&ws.store, ws.config.clone());
    match resolver.resolve(url, tab)? {
        Some(target) => println!("navigate: {target}"),
        None => println!("navigate: back"),
    }
    Ok(())
}

fn cmd_rules(ws: &Workspace, command: &RulesCommand) -> Result<()> {
    let registry =
        RuleRegistry::new(&ws.store, ws.config.mutex.clone(), ws.config.rule_start_id);
    match command {
        RulesCommand::List => {
            let active = registry.get_active()?;
            println!("{}", format_ids(&active));
        }
        RulesCommand::Alloc { count } => {
            let ids = registry.allocate(*count)?;
            println!("{}", format_ids(&ids.iter().copied().collect()));
        }
        RulesCommand::Release { ids } => {
            registry.release(ids)?;
            println!("{}", format_ids(&registry.get_active()?));
        }
        RulesCommand::Clear => {
            registry.update(&[])?;
            println!("none");
        }
    }
    Ok(())
}

fn print_report(report: &CleanupReport) {
    if report.skipped {
        println!("cleanup already ran in this context");
        return;
    }
    for step in &report.steps {
        match &step.error {
            Some(message) => println!("step {}: FAILED ({message})", step.name),
            None => println!("step {}: ok", step.name),
        }
    }
}

fn format_ids(ids: &BTreeSet<u32>) -> String {
    if ids.is_empty() {
        return "none".to_owned();
    }
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" ")
}

/// Render milliseconds as `MMm SSs` for countdown lines.
fn format_remaining(ms: i64) -> String {
    let total_secs = (ms.max(0) + 999) / 1_000;
    format!("{}m {:02}s", total_secs / 60, total_secs % 60)
}
