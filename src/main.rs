//! Buslock: FIFO lock for processes sharing a serial bus.
//!
//! This is the main entry point for the `buslock` CLI. It parses arguments,
//! sets up logging, dispatches to the appropriate command handler, and
//! handles errors with proper exit codes.

mod cli;
mod commands;

use buslock::error::BusLockError;
use buslock::{exit_codes, logging};
use cli::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(cli.debug);

    match commands::dispatch(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(exit_codes::USER_ERROR as u8)),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);
            if matches!(err, BusLockError::LockTimeout { .. }) {
                eprintln!("Try a greater -w value");
            }

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
