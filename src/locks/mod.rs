//! The serial bus lock protocol.
//!
//! This module implements mutual exclusion on a shared serial bus between
//! unrelated processes:
//! - Enqueue: append `<pid> <label>` to the device's queue file
//! - Acquire: poll until the own record is the head, purging stale heads
//! - Vacuum: rewrite the queue without a given PID
//!
//! # Stale Heads
//!
//! A head whose PID no longer runs, or now runs a different command, is stale.
//! It is only purged after it has been seen stale on several consecutive polls,
//! since a single sighting may race with its owner writing the record.
//!
//! # RAII Guards
//!
//! [`BusLock::acquire`] returns a [`LockGuard`] that vacuums the owner's entry
//! when dropped. Release failures are logged and never abort the caller.

mod guard;
mod operations;
mod state;
mod types;
mod vacuum;


// Re-export public API
pub use guard::LockGuard;
pub use operations::BusLock;
pub use state::{AcquireState, AcquireTracker, Observation, Step, assess, classify};
pub use types::{Liveness, Owner, QueueEntry, VacuumReport};
