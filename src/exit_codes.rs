//! Exit code constants for the buslock CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: Fatal I/O failure on the queue file
//! - 3: Lock wait budget exhausted
//!
//! `buslock run` exits with the child's own status instead.

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration, unknown process.
pub const USER_ERROR: i32 = 1;

/// Infrastructure failure: the queue file could not be opened, locked, read or written.
pub const IO_FAILURE: i32 = 2;

/// The bus stayed locked by another process for the whole wait budget.
pub const LOCK_TIMEOUT: i32 = 3;
