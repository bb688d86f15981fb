//! Error types for buslock.
//!
//! Uses thiserror for derive macros. Contention and stale locks are handled
//! inside the acquire loop and never become errors; what surfaces here is a
//! timeout, a fatal I/O problem, or bad user input.

use crate::exit_codes;
use std::io;
use thiserror::Error;

/// Main error type for buslock operations.
#[derive(Error, Debug)]
pub enum BusLockError {
    /// User provided invalid arguments or configuration.
    #[error("{0}")]
    UserError(String),

    /// The wait budget ran out before this process reached the queue head.
    #[error(
        "unable to get lock on serial {device} for {pid} in {waited_secs}s: {}",
        holder_text(.holder)
    )]
    LockTimeout {
        device: String,
        pid: u32,
        holder: Option<u32>,
        waited_secs: u64,
    },

    /// The queue file could not be opened, locked, read or written.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn holder_text(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!("still locked by {}", pid),
        None => "queue head unreadable".to_string(),
    }
}

impl BusLockError {
    /// Wrap an I/O error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BusLockError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            BusLockError::UserError(_) => exit_codes::USER_ERROR,
            BusLockError::LockTimeout { .. } => exit_codes::LOCK_TIMEOUT,
            BusLockError::Io { .. } => exit_codes::IO_FAILURE,
        }
    }
}

/// Result type alias for buslock operations.
pub type Result<T> = std::result::Result<T, BusLockError>;
