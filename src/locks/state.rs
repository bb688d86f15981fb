//! Head classification and the acquire state machine.
//!
//! Each poll of the queue yields an [`Observation`] of the head record; the
//! [`AcquireTracker`] folds observations into an [`AcquireState`] and tells the
//! loop what to do next. Nothing here touches the filesystem or the clock.

use super::types::Liveness;
use crate::config::Config;
use crate::probe::ProcessProbe;
use crate::queue::{Head, LockRecord};

/// What one look at the queue head found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The head could not be decoded (missing, empty or corrupt file).
    Unreadable,
    /// The head is this process.
    Own,
    /// The head belongs to a running process with a matching label.
    Live(LockRecord),
    /// The head belongs to a process that is gone or was replaced.
    Stale(LockRecord),
}

/// Where the acquire loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireState {
    /// Own record appended, head not looked at yet.
    Enqueued,
    /// Another process legitimately holds the head.
    Waiting,
    /// `pid` at the head has looked stale on `seen` consecutive polls.
    StaleCandidate { pid: u32, seen: u32 },
    /// This process is at the head.
    Acquired,
    /// The wait budget ran out.
    TimedOut,
}

/// What the loop should do after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Stop: the bus is ours.
    Acquired,
    /// Sleep and poll again.
    Wait,
    /// Remove the stale head `pid` from the queue, then poll again.
    Purge(u32),
    /// Our record seems lost; repair the file and re-enqueue.
    Heal,
}

/// Classify the head record from the point of view of `own_pid`.
pub fn classify<P: ProcessProbe + ?Sized>(head: &Head, own_pid: u32, probe: &P) -> Observation {
    let Some(record) = head.record() else {
        return Observation::Unreadable;
    };

    if record.pid == own_pid {
        return Observation::Own;
    }

    match assess(record, probe) {
        Liveness::Alive => Observation::Live(record.clone()),
        Liveness::Dead | Liveness::Reused { .. } => Observation::Stale(record.clone()),
    }
}

/// Decide whether the owner of `record` is still the process that enqueued it.
///
/// A record without a label can only be checked for liveness.
pub fn assess<P: ProcessProbe + ?Sized>(record: &LockRecord, probe: &P) -> Liveness {
    match probe.label(record.pid) {
        None => Liveness::Dead,
        Some(live) if live.is_empty() => Liveness::Dead,
        Some(_) if record.label.is_empty() => Liveness::Alive,
        Some(live) if live == record.label => Liveness::Alive,
        Some(live) => Liveness::Reused { live_label: live },
    }
}

/// Folds head observations into an [`AcquireState`].
#[derive(Debug, Clone)]
pub struct AcquireTracker {
    state: AcquireState,
    stale_confirmations: u32,
    missing_head_retries: u32,
    missing: u32,
}

impl AcquireTracker {
    pub fn new(config: &Config) -> Self {
        Self::with_limits(config.stale_confirmations, config.missing_head_retries)
    }

    /// `stale_confirmations` is clamped to at least 2.
    pub fn with_limits(stale_confirmations: u32, missing_head_retries: u32) -> Self {
        Self {
            state: AcquireState::Enqueued,
            stale_confirmations: stale_confirmations.max(2),
            missing_head_retries,
            missing: 0,
        }
    }

    pub fn state(&self) -> AcquireState {
        self.state
    }

    /// Consecutive unreadable heads seen so far.
    pub fn missing(&self) -> u32 {
        self.missing
    }

    pub fn observe(&mut self, observation: &Observation) -> Step {
        if !matches!(observation, Observation::Unreadable) {
            self.missing = 0;
        }

        match observation {
            Observation::Unreadable => {
                if self.state == AcquireState::Enqueued {
                    self.state = AcquireState::Waiting;
                }
                self.missing += 1;
                if self.missing > self.missing_head_retries {
                    self.missing = 0;
                    Step::Heal
                } else {
                    Step::Wait
                }
            }
            Observation::Own => {
                self.state = AcquireState::Acquired;
                Step::Acquired
            }
            Observation::Live(_) => {
                self.state = AcquireState::Waiting;
                Step::Wait
            }
            Observation::Stale(record) => {
                let seen = match self.state {
                    AcquireState::StaleCandidate { pid, seen } if pid == record.pid => seen + 1,
                    _ => 1,
                };

                if seen >= self.stale_confirmations {
                    self.state = AcquireState::Waiting;
                    Step::Purge(record.pid)
                } else {
                    self.state = AcquireState::StaleCandidate {
                        pid: record.pid,
                        seen,
                    };
                    Step::Wait
                }
            }
        }
    }

    pub fn time_out(&mut self) {
        self.state = AcquireState::TimedOut;
    }
}
