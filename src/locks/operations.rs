//! Enqueue, acquire, release and inspect operations on a device queue.

use super::guard::LockGuard;
use super::state::{AcquireTracker, Observation, Step, assess, classify};
use super::types::{Owner, QueueEntry, VacuumReport};
use super::vacuum::rewrite;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{BusLockError, Result};
use crate::probe::{ProcessProbe, ProcfsProbe};
use crate::queue::{Backoff, Head, QueueFile};
use std::fs;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// The serial bus lock for one device.
///
/// Holds the queue file location, the tuning from [`Config`], a liveness
/// probe and a clock. The defaults read `/proc` and the system clock; tests
/// swap in a [`crate::probe::ProcessTable`] and a [`crate::clock::ManualClock`].
#[derive(Debug, Clone)]
pub struct BusLock<P = ProcfsProbe, C = SystemClock> {
    queue: QueueFile,
    config: Config,
    contention: Backoff,
    probe: P,
    clock: C,
}

impl BusLock {
    pub fn new(queue: QueueFile, config: Config) -> Self {
        Self {
            contention: Backoff::contention(&config),
            queue,
            config,
            probe: ProcfsProbe::new(),
            clock: SystemClock,
        }
    }

    /// Lock for `device` with the queue file placed as `config` says.
    pub fn for_device(device: &str, config: Config) -> Result<Self> {
        let queue = QueueFile::from_config(device, &config)?;
        Ok(Self::new(queue, config))
    }
}

impl<P: ProcessProbe, C: Clock> BusLock<P, C> {
    pub fn with_probe<Q: ProcessProbe>(self, probe: Q) -> BusLock<Q, C> {
        BusLock {
            queue: self.queue,
            config: self.config,
            contention: self.contention,
            probe,
            clock: self.clock,
        }
    }

    pub fn with_clock<D: Clock>(self, clock: D) -> BusLock<P, D> {
        BusLock {
            queue: self.queue,
            config: self.config,
            contention: self.contention,
            probe: self.probe,
            clock,
        }
    }

    pub fn queue(&self) -> &QueueFile {
        &self.queue
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Append `owner` to the tail of the queue.
    ///
    /// Creates the lock directory and queue file when missing.
    pub fn enqueue(&self, owner: &Owner) -> Result<()> {
        debug!(
            "Attempting to get lock on serial port {}...",
            self.queue.device()
        );

        if let Some(parent) = self.queue.path().parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                BusLockError::io(
                    format!("failed to create lock directory '{}'", parent.display()),
                    e,
                )
            })?;
        }

        let mut locked = self.queue.open_append(&self.contention).inspect_err(|e| {
            error!(
                "Problem locking serial device, can't open lock file {} for write: {}",
                self.queue.path().display(),
                e
            );
        })?;
        locked.append(&owner.record())?;

        debug!("Queued {} on {}", owner, self.queue.path().display());
        Ok(())
    }

    /// Enqueue `owner` and wait until it reaches the head.
    ///
    /// The returned guard releases the queue entry when dropped.
    pub fn acquire(&self, owner: &Owner, wait: Duration) -> Result<LockGuard<'_, P, C>> {
        if let Err(e) = self.enqueue(owner) {
            self.release(owner.pid);
            return Err(e);
        }
        self.wait_for_head(owner, wait)?;
        Ok(LockGuard::new(self, owner.pid))
    }

    /// Poll the queue until `owner` is at the head or `wait` has passed.
    ///
    /// Stale heads are purged along the way. On timeout or any fatal error the
    /// owner's own entry is removed before the error is returned.
    pub fn wait_for_head(&self, owner: &Owner, wait: Duration) -> Result<()> {
        match self.poll_head(owner, wait) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.release(owner.pid);
                Err(e)
            }
        }
    }

    fn poll_head(&self, owner: &Owner, wait: Duration) -> Result<()> {
        let mut tracker = AcquireTracker::new(&self.config);
        let poll = Backoff::poll(&self.config);
        let start = self.clock.now();
        let mut last_head: Option<u32> = None;

        debug!("Checking for lock on {}", self.queue.device());
        loop {
            let head = self.queue.read_head(&self.contention)?;
            let observation = classify(&head, owner.pid, &self.probe);

            let head_pid = head.record().map(|r| r.pid);
            if head_pid != last_head {
                trace!("Head of {} is now {:?}", self.queue.path().display(), head);
                last_head = head_pid;
            }

            let step = tracker.observe(&observation);
            match (step, &observation) {
                (Step::Acquired, _) => {
                    info!("Serial port {} locked by {}", self.queue.device(), owner);
                    return Ok(());
                }
                (Step::Wait, Observation::Live(record)) => {
                    trace!("Serial port {} held by {}", self.queue.device(), record);
                }
                (Step::Wait, Observation::Stale(record)) => {
                    debug!(
                        "Stale pid lock? {} at head of {} ({})",
                        record,
                        self.queue.path().display(),
                        assess(record, &self.probe)
                    );
                }
                (Step::Wait, _) => {
                    debug!(
                        "{} misses a readable head ({:?}), retry {}",
                        self.queue.path().display(),
                        head,
                        tracker.missing()
                    );
                }
                (Step::Purge(pid), _) => {
                    warn!(
                        "Clearing stale serial port lock on {} ({})",
                        self.queue.device(),
                        pid
                    );
                    if let Err(e) = self.vacuum(pid) {
                        warn!("Failed to clear stale lock {}: {}", pid, e);
                    }
                }
                (Step::Heal, _) => {
                    warn!(
                        "{} misses process self PID {}, amending",
                        self.queue.path().display(),
                        owner.pid
                    );
                    self.heal(owner)?;
                }
            }

            let waited = self.clock.elapsed_since(start);
            if waited >= wait {
                tracker.time_out();
                let holder = match self.queue.read_head(&self.contention) {
                    Ok(Head::Record(record)) => Some(record.pid),
                    _ => head_pid,
                };
                error!(
                    "Unable to get lock on serial {} for {} in {}s: still locked by {:?}",
                    self.queue.device(),
                    owner.pid,
                    wait.as_secs(),
                    holder
                );
                return Err(BusLockError::LockTimeout {
                    device: self.queue.device().to_string(),
                    pid: owner.pid,
                    holder,
                    waited_secs: wait.as_secs(),
                });
            }

            if step == Step::Wait {
                self.clock.sleep(poll.delay());
            }
        }
    }

    /// Drop undecodable lines and put `owner` back in the queue if it went missing.
    fn heal(&self, owner: &Owner) -> Result<()> {
        if let Err(e) = rewrite(&self.queue, &self.contention, std::process::id(), |_| true) {
            warn!("Failed to repair {}: {}", self.queue.path().display(), e);
        }

        if !self.queue.read_all(&self.contention)?.contains(owner.pid) {
            self.enqueue(owner)?;
        }
        Ok(())
    }

    /// Remove every record of `pid`, preserving the order of the rest.
    ///
    /// Succeeds without touching the file when `pid` is not queued.
    pub fn vacuum(&self, pid: u32) -> Result<VacuumReport> {
        debug!(
            "Clearing serial port lock ({}) in {}",
            pid,
            self.queue.path().display()
        );
        let report = rewrite(&self.queue, &self.contention, std::process::id(), |r| {
            r.pid != pid
        })?;
        debug!("Clearing serial port lock ({}) done: {:?}", pid, report);
        Ok(report)
    }

    /// Best-effort removal of `pid` from the queue.
    ///
    /// Failures are logged and swallowed so shutdown paths never stall on them.
    pub fn release(&self, pid: u32) {
        match self.vacuum(pid) {
            Ok(report) if report.removed > 0 => {
                info!("Released serial port {} ({})", self.queue.device(), pid);
            }
            Ok(_) => {
                debug!("{} was not queued on {}", pid, self.queue.device());
            }
            Err(e) => {
                warn!(
                    "Problem clearing serial device lock for {} on {}: {}",
                    pid,
                    self.queue.device(),
                    e
                );
            }
        }
    }

    /// Snapshot of the queue with the liveness of every owner.
    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        let parsed = self.queue.read_all(&self.contention)?;
        Ok(parsed
            .records
            .into_iter()
            .enumerate()
            .map(|(position, record)| QueueEntry {
                position,
                liveness: assess(&record, &self.probe),
                pid: record.pid,
                label: record.label,
            })
            .collect())
    }

    /// PID currently entitled to the bus, if the head is readable.
    pub fn holder(&self) -> Result<Option<u32>> {
        Ok(self
            .queue
            .read_head(&self.contention)?
            .record()
            .map(|r| r.pid))
    }
}
