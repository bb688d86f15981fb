//! End-to-end tests spawning the `buslock` binary as real processes.

#![cfg(target_os = "linux")]

use buslock::{ProcessProbe, ProcfsProbe};
use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// PID far above anything a test machine hands out.
const GHOST_PID: u32 = 4_194_000;

struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("buslock.yaml"),
            "poll_interval_ms: 2\nbackoff_ms: 1\njitter_max: 3\n",
        )
        .unwrap();
        Self { dir }
    }

    fn lock_dir(&self) -> &Path {
        self.dir.path()
    }

    fn queue(&self) -> PathBuf {
        self.lock_dir().join("LCK..ttyS0")
    }

    fn command(&self) -> Command {
        self.command_in(self.lock_dir())
    }

    fn command_in(&self, lock_dir: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_buslock"));
        cmd.arg("--config")
            .arg(self.dir.path().join("buslock.yaml"))
            .arg("--lock-dir")
            .arg(lock_dir)
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().unwrap()
    }

    fn queue_content(&self) -> String {
        fs::read_to_string(self.queue()).unwrap_or_default()
    }
}

fn own_record() -> String {
    let pid = std::process::id();
    let label = ProcfsProbe::new().label(pid).unwrap_or_default();
    if label.is_empty() {
        format!("{}\n", pid)
    } else {
        format!("{} {}\n", pid, label)
    }
}

#[test]
fn run_executes_and_releases() {
    let harness = Harness::new();

    let output = harness.run(&["run", "/dev/ttyS0", "--", "true"]);

    assert!(output.status.success(), "{:?}", output);
    assert_eq!(harness.queue_content(), "");
}

#[test]
fn run_passes_child_exit_code_through() {
    let harness = Harness::new();

    let output = harness.run(&["run", "ttyS0", "--", "sh", "-c", "exit 7"]);

    assert_eq!(output.status.code(), Some(7));
    assert_eq!(harness.queue_content(), "");
}

#[test]
fn live_holder_causes_timeout() {
    let harness = Harness::new();
    let held = own_record();
    fs::write(harness.queue(), &held).unwrap();

    let output = harness.run(&["run", "ttyS0", "-w", "0", "--", "true"]);

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("still locked by"), "{}", stderr);
    assert!(stderr.contains("Try a greater -w value"), "{}", stderr);
    assert_eq!(harness.queue_content(), held);
}

#[test]
fn dead_holder_is_purged() {
    let harness = Harness::new();
    fs::write(harness.queue(), format!("{} ghost\n", GHOST_PID)).unwrap();

    let output = harness.run(&["run", "ttyS0", "-w", "5", "--", "true"]);

    assert!(output.status.success(), "{:?}", output);
    assert_eq!(harness.queue_content(), "");
}

#[test]
fn acquire_and_release_on_behalf_of_pid() {
    let harness = Harness::new();
    let pid = std::process::id().to_string();

    let output = harness.run(&["acquire", "ttyS0", "--pid", &pid]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(harness.queue_content(), own_record());

    let output = harness.run(&["release", "ttyS0", "--pid", &pid]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(harness.queue_content(), "");
}

#[test]
fn acquire_for_missing_process_is_user_error() {
    let harness = Harness::new();

    let output = harness.run(&["acquire", "ttyS0", "--pid", &GHOST_PID.to_string()]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!harness.queue().exists());
}

#[test]
fn release_of_unqueued_pid_succeeds() {
    let harness = Harness::new();

    let output = harness.run(&["release", "ttyS0", "--pid", "12345"]);

    assert!(output.status.success());
}

#[test]
fn wait_out_of_range_is_user_error() {
    let harness = Harness::new();

    let output = harness.run(&["run", "ttyS0", "-w", "31", "--", "true"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("out of range"));
}

#[test]
fn status_reports_liveness_as_json() {
    let harness = Harness::new();
    fs::write(
        harness.queue(),
        format!("{}{} ghost\n", own_record(), GHOST_PID),
    )
    .unwrap();

    let output = harness.run(&["status", "ttyS0", "--json"]);
    assert!(output.status.success(), "{:?}", output);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = report["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["pid"], std::process::id());
    assert_eq!(entries[0]["liveness"]["state"], "alive");
    assert_eq!(entries[1]["liveness"]["state"], "dead");
    assert!(report["modified"].is_string());
}

#[test]
fn clear_needs_force() {
    let harness = Harness::new();
    fs::write(harness.queue(), "77 stuck\n").unwrap();

    let output = harness.run(&["clear", "ttyS0", "77"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(harness.queue_content(), "77 stuck\n");

    let output = harness.run(&["clear", "ttyS0", "77", "--force"]);
    assert!(output.status.success());
    assert_eq!(harness.queue_content(), "");
}

#[test]
fn unwritable_lock_dir_is_io_failure() {
    let harness = Harness::new();
    let blocker = harness.lock_dir().join("not-a-dir");
    fs::write(&blocker, "").unwrap();

    let output = harness
        .command_in(&blocker)
        .args(["run", "ttyS0", "--", "true"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
}

#[test]
#[serial]
fn concurrent_processes_take_turns() {
    let harness = Harness::new();
    let marker = harness.lock_dir().join("inside");
    // mkdir fails if another holder is inside at the same time
    let script = format!(
        "mkdir {m} || exit 99; sleep 0.05; rmdir {m}",
        m = marker.display()
    );

    let children: Vec<_> = (0..5)
        .map(|_| {
            harness
                .command()
                .args(["run", "ttyS0", "-w", "30", "--", "sh", "-c", &script])
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .unwrap()
        })
        .collect();

    for child in children {
        let output = child.wait_with_output().unwrap();
        assert!(output.status.success(), "{:?}", output);
    }

    assert_eq!(harness.queue_content(), "");
    assert!(!marker.exists());
}
