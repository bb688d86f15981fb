//! RAII lock guard implementation.

use super::operations::BusLock;
use crate::clock::Clock;
use crate::probe::ProcessProbe;

/// Proof that a process sits at the head of the queue.
///
/// When dropped, the owner's queue entry is vacuumed so the next waiter can
/// proceed. Failures during drop are logged, never raised.
#[derive(Debug)]
pub struct LockGuard<'a, P: ProcessProbe, C: Clock> {
    lock: &'a BusLock<P, C>,
    pid: u32,
    released: bool,
}

impl<'a, P: ProcessProbe, C: Clock> LockGuard<'a, P, C> {
    pub(super) fn new(lock: &'a BusLock<P, C>, pid: u32) -> Self {
        Self {
            lock,
            pid,
            released: false,
        }
    }

    /// PID holding the bus.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Release the lock now instead of at the end of the scope.
    pub fn release(mut self) {
        self.released = true;
        self.lock.release(self.pid);
    }

    /// Give up the guard but keep the queue entry.
    ///
    /// Used when the lock is taken on behalf of another process, which is
    /// then responsible for releasing it (or for dying, which makes the entry
    /// stale).
    pub fn detach(mut self) -> u32 {
        self.released = true;
        self.pid
    }
}

impl<P: ProcessProbe, C: Clock> Drop for LockGuard<'_, P, C> {
    fn drop(&mut self) {
        if !self.released {
            self.lock.release(self.pid);
        }
    }
}
