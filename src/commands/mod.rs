//! Command implementations for buslock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command resolves the configuration first, then
//! builds a [`BusLock`] for the requested device.

use crate::cli::{AcquireArgs, ClearArgs, Cli, Command, ReleaseArgs, RunArgs, StatusArgs};
use buslock::config::Config;
use buslock::error::{BusLockError, Result};
use buslock::exit_codes;
use buslock::locks::{BusLock, Owner, QueueEntry};
use buslock::probe::ProcfsProbe;
use chrono::{DateTime, Local};
use serde_json::json;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;
use tracing::{debug, info};

/// Dispatch a command to its implementation.
///
/// Returns the process exit code on success: `SUCCESS` for everything but
/// `run`, which passes the child's status through.
pub fn dispatch(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref(), cli.lock_dir.as_deref())?;

    match cli.command {
        Command::Run(args) => cmd_run(config, args),
        Command::Acquire(args) => cmd_acquire(config, args),
        Command::Release(args) => cmd_release(config, args),
        Command::Status(args) => cmd_status(config, args),
        Command::Clear(args) => cmd_clear(config, args),
    }
}

/// Resolve the config file and apply command-line overrides.
fn load_config(path: Option<&Path>, lock_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::resolve(path)?;
    if let Some(dir) = lock_dir {
        config.lock_dir = dir.display().to_string();
    }
    config.validate()?;
    debug!("Using config {:?}", config);
    Ok(config)
}

/// `-w` wins over the configured budget.
fn wait_budget(config: &Config, wait: Option<u64>) -> Duration {
    wait.map(Duration::from_secs)
        .unwrap_or_else(|| config.wait_budget())
}

fn default_pid(pid: Option<u32>) -> u32 {
    pid.unwrap_or_else(std::os::unix::process::parent_id)
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_run(config: Config, args: RunArgs) -> Result<i32> {
    let (program, program_args) = args
        .command
        .split_first()
        .ok_or_else(|| BusLockError::UserError("no command given to run".to_string()))?;

    let wait = wait_budget(&config, args.wait);
    let lock = BusLock::for_device(&args.device, config)?;
    let owner = Owner::current(lock.probe());

    let guard = lock.acquire(&owner, wait)?;

    debug!("Running {} {:?}", program, program_args);
    let status = std::process::Command::new(program)
        .args(program_args)
        .status()
        .map_err(|e| BusLockError::UserError(format!("failed to run '{}': {}", program, e)))?;

    guard.release();
    Ok(child_exit_code(status))
}

/// Map a child's exit status the way shells do: signals become 128 + N.
fn child_exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => exit_codes::USER_ERROR,
    }
}

fn cmd_acquire(config: Config, args: AcquireArgs) -> Result<i32> {
    let pid = default_pid(args.pid);
    let probe = ProcfsProbe::new();
    let owner = Owner::of_process(pid, &probe).ok_or_else(|| {
        BusLockError::UserError(format!("process {} is not running", pid))
    })?;

    let wait = wait_budget(&config, args.wait);
    let lock = BusLock::for_device(&args.device, config)?;

    // The entry outlives this process; `release` or staleness removes it.
    let holder = lock.acquire(&owner, wait)?.detach();

    info!("Serial port {} held for {}", args.device, owner);
    println!("Locked {} for {}", lock.queue().path().display(), holder);
    Ok(exit_codes::SUCCESS)
}

fn cmd_release(config: Config, args: ReleaseArgs) -> Result<i32> {
    let pid = default_pid(args.pid);
    let lock = BusLock::for_device(&args.device, config)?;
    lock.release(pid);
    Ok(exit_codes::SUCCESS)
}

fn cmd_status(config: Config, args: StatusArgs) -> Result<i32> {
    let lock = BusLock::for_device(&args.device, config)?;
    let entries = lock.entries()?;
    let modified = last_modified(lock.queue().path());

    if args.json {
        let report = json!({
            "device": lock.queue().device(),
            "path": lock.queue().path(),
            "modified": modified.map(|m| m.to_rfc3339()),
            "entries": entries,
        });
        let text = serde_json::to_string_pretty(&report).map_err(|e| {
            BusLockError::UserError(format!("failed to serialize status: {}", e))
        })?;
        println!("{}", text);
        return Ok(exit_codes::SUCCESS);
    }

    print_status(&lock, &entries, modified);
    Ok(exit_codes::SUCCESS)
}

fn last_modified(path: &Path) -> Option<DateTime<Local>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Local>::from)
}

fn print_status(lock: &BusLock, entries: &[QueueEntry], modified: Option<DateTime<Local>>) {
    let path = lock.queue().path();

    if entries.is_empty() {
        println!("No processes queued on {}.", lock.queue().device());
        return;
    }

    println!("Queue {} ({}):", path.display(), entries.len());
    if let Some(modified) = modified {
        println!("  Changed:    {}", modified.format("%Y-%m-%d %H:%M:%S %Z"));
    }
    println!();

    for entry in entries {
        let marker = if entry.is_head() { "*" } else { " " };
        let label = if entry.label.is_empty() {
            "-"
        } else {
            entry.label.as_str()
        };
        println!(
            "{} {:>3}  {:>8}  {:<30}  {}",
            marker, entry.position, entry.pid, label, entry.liveness
        );
    }

    let stale_count = entries.iter().filter(|e| e.liveness.is_stale()).count();
    if stale_count > 0 {
        println!();
        println!(
            "Note: {} entr(y/ies) are stale and will be purged by the next waiter. \
             Use `buslock clear {} <pid> --force` to remove one now.",
            stale_count,
            lock.queue().device()
        );
    }
}

fn cmd_clear(config: Config, args: ClearArgs) -> Result<i32> {
    // Require --force flag
    if !args.force {
        return Err(BusLockError::UserError(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a live entry lets another process on the bus while {pid} may still use it.\n\
             Only clear entries of processes you know have hung.\n\n\
             To clear the entry, run:\n  buslock clear {device} {pid} --force",
            pid = args.pid,
            device = args.device
        )));
    }

    let lock = BusLock::for_device(&args.device, config)?;
    let report = lock.vacuum(args.pid)?;

    if report.removed == 0 {
        println!(
            "{} is not queued on {}.",
            args.pid,
            lock.queue().path().display()
        );
    } else {
        println!(
            "Cleared {} entr(y/ies) of {} from {}",
            report.removed,
            args.pid,
            lock.queue().path().display()
        );
    }
    if report.dropped > 0 {
        println!("Dropped {} unreadable line(s).", report.dropped);
    }

    Ok(exit_codes::SUCCESS)
}
