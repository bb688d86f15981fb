//! Process liveness probing.
//!
//! The acquire loop asks one question about the PID at the queue head: is it
//! running, and if so what command is it? [`ProcfsProbe`] answers from
//! `/proc/<pid>/cmdline`; [`ProcessTable`] is an in-memory stand-in for tests
//! and simulations.

use crate::queue::sanitize_label;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Answers whether a process is alive and what it is running.
pub trait ProcessProbe {
    /// The label of `pid`, or `None` when no such process can be seen.
    fn label(&self, pid: u32) -> Option<String>;

    /// Whether `pid` is currently running.
    fn is_alive(&self, pid: u32) -> bool {
        self.label(pid).is_some()
    }
}

impl<P: ProcessProbe + ?Sized> ProcessProbe for &P {
    fn label(&self, pid: u32) -> Option<String> {
        (**self).label(pid)
    }
}

/// Probe backed by the procfs `cmdline` entries.
///
/// The label is argv[0] of the process. Exited processes, zombies and kernel
/// threads have no readable argv[0] and are reported as not running.
#[derive(Debug, Clone)]
pub struct ProcfsProbe {
    root: PathBuf,
}

impl ProcfsProbe {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Use a different procfs mount point.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for ProcfsProbe {
    fn label(&self, pid: u32) -> Option<String> {
        let path = self.root.join(pid.to_string()).join("cmdline");
        let raw = fs::read(&path).ok()?;
        parse_cmdline(&raw)
    }
}

/// Extract argv[0] from a NUL-separated `cmdline` buffer.
fn parse_cmdline(raw: &[u8]) -> Option<String> {
    let argv0 = raw.split(|&b| b == 0).next()?;
    if argv0.is_empty() {
        return None;
    }
    Some(sanitize_label(&String::from_utf8_lossy(argv0)))
}

/// Shared in-memory process table.
///
/// Clones share the same table, so a test can "kill" or "restart" a process
/// while several queue participants hold their own copy.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    entries: Arc<Mutex<HashMap<u32, String>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `pid` as running `label`, replacing any previous occupant.
    pub fn spawn(&self, pid: u32, label: impl Into<String>) -> &Self {
        self.lock().insert(pid, label.into());
        self
    }

    /// Mark `pid` as exited.
    pub fn kill(&self, pid: u32) -> &Self {
        self.lock().remove(&pid);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl ProcessProbe for ProcessTable {
    fn label(&self, pid: u32) -> Option<String> {
        self.lock().get(&pid).cloned()
    }
}
