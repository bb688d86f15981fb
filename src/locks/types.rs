//! Lock participant and queue inspection types.

use crate::probe::ProcessProbe;
use crate::queue::{LockRecord, sanitize_label};
use serde::Serialize;
use std::fmt;

/// A process taking part in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub pid: u32,
    /// Command of the process, stored next to the PID for stale detection.
    pub label: String,
}

impl Owner {
    pub fn new(pid: u32, label: &str) -> Self {
        Self {
            pid,
            label: sanitize_label(label),
        }
    }

    /// The running process, labelled as the probe sees it.
    pub fn current<P: ProcessProbe + ?Sized>(probe: &P) -> Self {
        let pid = std::process::id();
        let label = probe.label(pid).unwrap_or_default();
        Self::new(pid, &label)
    }

    /// Another running process. `None` when the probe cannot see it.
    pub fn of_process<P: ProcessProbe + ?Sized>(pid: u32, probe: &P) -> Option<Self> {
        probe.label(pid).map(|label| Self::new(pid, &label))
    }

    pub fn record(&self) -> LockRecord {
        LockRecord::new(self.pid, self.label.clone())
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "{}", self.pid)
        } else {
            write!(f, "{} ({})", self.pid, self.label)
        }
    }
}

/// Whether the owner of a record is still around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Liveness {
    /// Running, and running what it recorded.
    Alive,
    /// The PID now belongs to a different command.
    Reused { live_label: String },
    /// No such process.
    Dead,
}

impl Liveness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Liveness::Alive)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Alive => write!(f, "alive"),
            Liveness::Reused { live_label } => write!(f, "stale (pid now runs {})", live_label),
            Liveness::Dead => write!(f, "stale (not running)"),
        }
    }
}

/// One record of the queue together with the state of its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    /// Zero-based queue position; 0 holds the bus.
    pub position: usize,
    pub pid: u32,
    pub label: String,
    pub liveness: Liveness,
}

impl QueueEntry {
    pub fn is_head(&self) -> bool {
        self.position == 0
    }
}

/// Outcome of a queue rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumReport {
    /// Records removed because they matched the target.
    pub removed: usize,
    /// Records written back.
    pub kept: usize,
    /// Undecodable lines dropped along the way.
    pub dropped: usize,
    /// Whether the file was replaced at all.
    pub rewritten: bool,
}
