//! Buslock: queue-based mutual exclusion for processes sharing a serial bus.
//!
//! Every process that wants the bus appends `<pid> <label>` to a per-device
//! queue file (`/var/lock/LCK..<device>` by default) and talks to the device
//! only while its record is the first line. Entries of processes that died or
//! whose PID was reused are purged by the waiters themselves, so a crash
//! never wedges the bus.
//!
//! ```no_run
//! use buslock::{BusLock, Config, Owner, ProcfsProbe};
//!
//! # fn main() -> buslock::error::Result<()> {
//! let config = Config::resolve(None)?;
//! let lock = BusLock::for_device("/dev/ttyUSB0", config)?;
//! let owner = Owner::current(&ProcfsProbe::new());
//! let guard = lock.acquire(&owner, lock.config().wait_budget())?;
//! // talk to the meter
//! drop(guard);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod fs;
pub mod locks;
pub mod logging;
pub mod probe;
pub mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{BusLockError, Result};
pub use locks::{BusLock, Liveness, LockGuard, Owner, QueueEntry, VacuumReport};
pub use probe::{ProcessProbe, ProcessTable, ProcfsProbe};
pub use queue::{LockRecord, QueueFile};
