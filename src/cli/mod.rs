//! CLI argument parsing for buslock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use buslock::config::MAX_WAIT_SECONDS;
use buslock::exit_codes;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Buslock: FIFO lock for processes sharing a serial bus.
///
/// Each participant appends itself to a queue file next to the device lock
/// files and may use the bus only while it is the first entry:
/// - Dead or replaced processes at the head are purged by the waiters
/// - Every change happens under an advisory file lock
#[derive(Parser, Debug)]
#[command(name = "buslock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase diagnostic output (-d debug, -dd trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub debug: u8,

    /// Read configuration from this file instead of /etc/buslock.yaml.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the queue files.
    #[arg(long, global = true, value_name = "DIR")]
    pub lock_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for buslock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command while holding the bus.
    ///
    /// Queues this process, waits for the head, runs the command and releases
    /// the bus when it exits. Exits with the command's status.
    Run(RunArgs),

    /// Take the bus on behalf of another process.
    ///
    /// The entry stays queued until `release` is called for the same PID or
    /// that process exits and becomes stale.
    Acquire(AcquireArgs),

    /// Remove a process from the queue.
    ///
    /// Never fails when the process is not queued.
    Release(ReleaseArgs),

    /// Show the queue of a device.
    ///
    /// Lists every entry in order with the liveness of its owner.
    Status(StatusArgs),

    /// Forcibly remove a process from the queue.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(ClearArgs),
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Serial device, e.g. /dev/ttyUSB0.
    pub device: String,

    /// Seconds to wait for the bus (0-30).
    #[arg(short, long, value_parser = parse_wait)]
    pub wait: Option<u64>,

    /// Command to run and its arguments.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

/// Arguments for the `acquire` command.
#[derive(Parser, Debug)]
pub struct AcquireArgs {
    /// Serial device, e.g. /dev/ttyUSB0.
    pub device: String,

    /// Seconds to wait for the bus (0-30).
    #[arg(short, long, value_parser = parse_wait)]
    pub wait: Option<u64>,

    /// Process to queue. Defaults to the parent process.
    #[arg(long)]
    pub pid: Option<u32>,
}

/// Arguments for the `release` command.
#[derive(Parser, Debug)]
pub struct ReleaseArgs {
    /// Serial device, e.g. /dev/ttyUSB0.
    pub device: String,

    /// Process to remove. Defaults to the parent process.
    #[arg(long)]
    pub pid: Option<u32>,
}

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Serial device, e.g. /dev/ttyUSB0.
    pub device: String,

    /// Print the queue as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `clear` command.
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Serial device, e.g. /dev/ttyUSB0.
    pub device: String,

    /// Process whose entries should be removed.
    pub pid: u32,

    /// Confirm removal even if the process may still be using the bus.
    #[arg(long)]
    pub force: bool,
}

/// Parse a wait budget in seconds, rejecting values above the maximum.
fn parse_wait(value: &str) -> Result<u64, String> {
    let seconds: u64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    if seconds > MAX_WAIT_SECONDS {
        return Err(format!(
            "wait time {} out of range, 0-{}",
            seconds, MAX_WAIT_SECONDS
        ));
    }
    Ok(seconds)
}

impl Cli {
    /// Parse command line arguments.
    ///
    /// Usage errors exit with `USER_ERROR` rather than clap's default of 2,
    /// which is taken by `IO_FAILURE`.
    pub fn parse_args() -> Self {
        Cli::try_parse().unwrap_or_else(|e| {
            let code = if e.use_stderr() {
                exit_codes::USER_ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code)
        })
    }
}
