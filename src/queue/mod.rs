//! The shared queue file.
//!
//! One text file per serial device holds the waiting processes in order, one
//! record per line. The first record is the process entitled to the bus.
//!
//! # Format
//!
//! ```text
//! 2817 /usr/local/bin/sdm120c
//! 2903 /usr/local/bin/sdm120c
//! 3011
//! ```
//!
//! Each line is a decimal PID, optionally followed by one space and the
//! owner's command. There is no header.

mod backoff;
mod file;
mod record;

pub use backoff::Backoff;
pub use file::{Head, LockMode, LockedQueue, ParsedQueue, QueueFile};
pub use record::{LockRecord, RecordParseError, sanitize_label};
