//! Queue file access under `flock(2)`.
//!
//! Every read of the queue file happens under a shared lock and every rewrite
//! under an exclusive one. Shared locks are taken non-blocking and retried
//! with randomized backoff; the exclusive lock blocks until all shared holders
//! have let go.
//!
//! A rewrite replaces the file by rename, so a process that opened the old
//! file just before the rename would otherwise lock (and append to) an unlinked
//! inode. After every successful lock the handle is compared against the path
//! and reopened when they no longer match.

use super::backoff::Backoff;
use super::record::{LockRecord, RecordParseError};
use crate::config::Config;
use crate::error::{BusLockError, Result};
use crate::fs::sibling_path;
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// The queue file belonging to one serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFile {
    device: String,
    path: PathBuf,
}

impl QueueFile {
    /// Derive the queue file for `device` as `<lock_dir>/<prefix><basename>`.
    pub fn for_device(device: &str, lock_dir: &Path, prefix: &str) -> Result<Self> {
        let basename = Path::new(device)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                BusLockError::UserError(format!("invalid serial device '{}'", device))
            })?;

        Ok(Self {
            device: device.to_string(),
            path: lock_dir.join(format!("{}{}", prefix, basename)),
        })
    }

    pub fn from_config(device: &str, config: &Config) -> Result<Self> {
        Self::for_device(device, &config.lock_dir(), &config.lock_prefix)
    }

    /// The device name as given by the caller.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staging file used by `pid` while rewriting the queue.
    pub fn staging_path(&self, pid: u32) -> Result<PathBuf> {
        sibling_path(&self.path, &pid.to_string())
    }

    /// Open for appending under a shared lock, creating the file if needed.
    pub fn open_append(&self, backoff: &Backoff) -> Result<LockedQueue> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);

        self.open_locked(&options, LockMode::Shared, backoff)?
            .ok_or_else(|| {
                BusLockError::io(
                    format!("failed to create queue file '{}'", self.path.display()),
                    io::Error::from(io::ErrorKind::NotFound),
                )
            })
    }

    /// Open for reading under a shared lock. `None` when the file does not exist.
    pub fn open_read(&self, backoff: &Backoff) -> Result<Option<LockedQueue>> {
        let mut options = OpenOptions::new();
        options.read(true);
        self.open_locked(&options, LockMode::Shared, backoff)
    }

    /// Open for reading under an exclusive lock. `None` when the file does not exist.
    pub fn open_exclusive(&self, backoff: &Backoff) -> Result<Option<LockedQueue>> {
        let mut options = OpenOptions::new();
        options.read(true);
        self.open_locked(&options, LockMode::Exclusive, backoff)
    }

    /// Read and decode only the first record.
    pub fn read_head(&self, backoff: &Backoff) -> Result<Head> {
        let Some(mut locked) = self.open_read(backoff)? else {
            return Ok(Head::Missing);
        };

        // Raw bytes: a label is whatever argv[0] held, not necessarily UTF-8.
        let mut line = Vec::new();
        let read = BufReader::new(locked.file_mut())
            .read_until(b'\n', &mut line)
            .map_err(|e| self.io_error("failed to read queue head from", e))?;

        if read == 0 {
            return Ok(Head::Empty);
        }

        Ok(match LockRecord::parse_bytes(&line) {
            Ok(record) => Head::Record(record),
            Err(e) => Head::Corrupt(e),
        })
    }

    /// Read every record in queue order, skipping lines that do not decode.
    pub fn read_all(&self, backoff: &Backoff) -> Result<ParsedQueue> {
        match self.open_read(backoff)? {
            Some(mut locked) => locked.read_records(),
            None => Ok(ParsedQueue::default()),
        }
    }

    fn open_locked(
        &self,
        options: &OpenOptions,
        mode: LockMode,
        backoff: &Backoff,
    ) -> Result<Option<LockedQueue>> {
        loop {
            let file = match options.open(&self.path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(self.io_error("failed to open queue file", e)),
            };

            trace!("Acquiring {} lock on {}...", mode, self.path.display());
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::lock_exclusive(&file),
            };

            match attempt {
                Ok(()) => {}
                Err(e) if is_contended(&e) => {
                    let delay = backoff.delay();
                    debug!(
                        "Would block on {}, retrying in {:?}",
                        self.path.display(),
                        delay
                    );
                    drop(file);
                    std::thread::sleep(delay);
                    continue;
                }
                Err(e) => {
                    return Err(self.io_error(&format!("failed to take {} lock on", mode), e));
                }
            }

            if !self.is_current(&file)? {
                debug!(
                    "{} was replaced while waiting for the lock, reopening",
                    self.path.display()
                );
                continue;
            }

            trace!("{} lock on {} acquired", mode, self.path.display());
            return Ok(Some(LockedQueue {
                file,
                mode,
                path: self.path.clone(),
            }));
        }
    }

    /// Whether `file` is still the inode found at the queue path.
    fn is_current(&self, file: &File) -> Result<bool> {
        let held = file
            .metadata()
            .map_err(|e| self.io_error("failed to stat locked queue file", e))?;

        match fs::metadata(&self.path) {
            Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error("failed to stat queue file", e)),
        }
    }

    fn io_error(&self, what: &str, e: io::Error) -> BusLockError {
        BusLockError::io(format!("{} '{}'", what, self.path.display()), e)
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.kind() == io::ErrorKind::Interrupted
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Advisory lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers and appenders at once.
    Shared,
    /// A single rewriter, excluding everybody else.
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// An open queue file holding an advisory lock.
///
/// The lock is released when the handle is closed on drop.
#[derive(Debug)]
pub struct LockedQueue {
    file: File,
    mode: LockMode,
    path: PathBuf,
}

impl LockedQueue {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Permissions of the locked file, for carrying over to a replacement.
    pub fn permissions(&self) -> Result<fs::Permissions> {
        self.file
            .metadata()
            .map(|m| m.permissions())
            .map_err(|e| {
                BusLockError::io(format!("failed to stat '{}'", self.path.display()), e)
            })
    }

    /// Append one record and flush it.
    pub fn append(&mut self, record: &LockRecord) -> Result<()> {
        self.file
            .write_all(record.to_line().as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| {
                BusLockError::io(
                    format!("failed to write lock file '{}'", self.path.display()),
                    e,
                )
            })
    }

    /// Read the whole file from the current position.
    pub fn read_records(&mut self) -> Result<ParsedQueue> {
        let mut content = Vec::new();
        self.file.read_to_end(&mut content).map_err(|e| {
            BusLockError::io(
                format!("failed to read queue file '{}'", self.path.display()),
                e,
            )
        })?;
        Ok(ParsedQueue::parse_bytes(&content))
    }
}

impl Drop for LockedQueue {
    fn drop(&mut self) {
        trace!("Released {} lock on {}", self.mode, self.path.display());
    }
}

/// What the first line of the queue file holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// No queue file at all.
    Missing,
    /// The file exists but is empty.
    Empty,
    /// The first line does not decode.
    Corrupt(RecordParseError),
    /// A well-formed record.
    Record(LockRecord),
}

impl Head {
    pub fn record(&self) -> Option<&LockRecord> {
        match self {
            Head::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Decoded queue contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedQueue {
    /// Records in file order.
    pub records: Vec<LockRecord>,
    /// Lines that did not decode, with the reason.
    pub rejected: Vec<(String, RecordParseError)>,
}

impl ParsedQueue {
    pub fn parse(content: &str) -> Self {
        Self::parse_bytes(content.as_bytes())
    }

    /// Decode raw file content line by line. Lines that are not UTF-8 are
    /// rejected like any other undecodable line.
    pub fn parse_bytes(content: &[u8]) -> Self {
        let mut parsed = Self::default();
        for raw in content.split_inclusive(|&b| b == b'\n') {
            let line = raw.strip_suffix(b"\n").unwrap_or(raw);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            match LockRecord::parse_bytes(line) {
                Ok(record) => parsed.records.push(record),
                Err(e) => parsed
                    .rejected
                    .push((String::from_utf8_lossy(line).into_owned(), e)),
            }
        }
        parsed
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.records.iter().any(|r| r.pid == pid)
    }

    /// Serialize the records back into file content.
    pub fn to_content(&self) -> String {
        self.records.iter().map(LockRecord::to_line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), 2)
    }

    fn queue_in(dir: &TempDir) -> QueueFile {
        QueueFile::for_device("/dev/ttyUSB0", dir.path(), "LCK..").unwrap()
    }

    #[test]
    fn path_uses_device_basename() {
        let queue =
            QueueFile::for_device("/dev/serial/by-id/usb-FTDI", Path::new("/var/lock"), "LCK..")
                .unwrap();
        assert_eq!(queue.path(), Path::new("/var/lock/LCK..usb-FTDI"));
        assert_eq!(queue.device(), "/dev/serial/by-id/usb-FTDI");
    }

    #[test]
    fn path_accepts_bare_device_name() {
        let queue = QueueFile::for_device("ttyS0", Path::new("/run/lock"), "LCK..").unwrap();
        assert_eq!(queue.path(), Path::new("/run/lock/LCK..ttyS0"));
    }

    #[test]
    fn path_rejects_unnamed_device() {
        assert!(QueueFile::for_device("", Path::new("/var/lock"), "LCK..").is_err());
        assert!(QueueFile::for_device("/dev/..", Path::new("/var/lock"), "LCK..").is_err());
    }

    #[test]
    fn staging_path_appends_pid() {
        let queue = QueueFile::for_device("/dev/ttyUSB0", Path::new("/var/lock"), "LCK..").unwrap();
        assert_eq!(
            queue.staging_path(311).unwrap(),
            PathBuf::from("/var/lock/LCK..ttyUSB0.311")
        );
    }

    #[test]
    fn read_head_of_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        assert_eq!(queue.read_head(&fast_backoff()).unwrap(), Head::Missing);
    }

    #[test]
    fn read_head_of_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "").unwrap();
        assert_eq!(queue.read_head(&fast_backoff()).unwrap(), Head::Empty);
    }

    #[test]
    fn read_head_returns_first_record_only() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "100 procA\n200 procB\n").unwrap();

        let head = queue.read_head(&fast_backoff()).unwrap();
        assert_eq!(head.record(), Some(&LockRecord::new(100, "procA")));
    }

    #[test]
    fn read_head_reports_corrupt_line() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "garbage\n200 procB\n").unwrap();

        assert!(matches!(
            queue.read_head(&fast_backoff()).unwrap(),
            Head::Corrupt(RecordParseError::InvalidPid(_))
        ));
    }

    #[test]
    fn append_creates_and_extends() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);

        queue
            .open_append(&fast_backoff())
            .unwrap()
            .append(&LockRecord::new(1, "a"))
            .unwrap();
        queue
            .open_append(&fast_backoff())
            .unwrap()
            .append(&LockRecord::new(2, ""))
            .unwrap();

        assert_eq!(fs::read_to_string(queue.path()).unwrap(), "1 a\n2\n");
    }

    #[test]
    fn read_all_skips_bad_lines() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "1 a\n\nxx\n3 c\n").unwrap();

        let parsed = queue.read_all(&fast_backoff()).unwrap();
        assert_eq!(
            parsed.records,
            vec![LockRecord::new(1, "a"), LockRecord::new(3, "c")]
        );
        assert_eq!(parsed.rejected.len(), 2);
        assert!(parsed.contains(3));
        assert!(!parsed.contains(2));
        assert_eq!(parsed.to_content(), "1 a\n3 c\n");
    }

    #[test]
    fn non_utf8_head_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), b"100 /opt/m\xe9ter\n200 procB\n").unwrap();

        assert!(matches!(
            queue.read_head(&fast_backoff()).unwrap(),
            Head::Corrupt(RecordParseError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn read_all_rejects_non_utf8_lines() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), b"1 a\n2 \xff\xfe\n3 c\r\n").unwrap();

        let parsed = queue.read_all(&fast_backoff()).unwrap();
        assert_eq!(
            parsed.records,
            vec![LockRecord::new(1, "a"), LockRecord::new(3, "c")]
        );
        assert_eq!(parsed.rejected.len(), 1);
        assert!(matches!(
            parsed.rejected[0].1,
            RecordParseError::InvalidUtf8(_)
        ));
    }

    #[test]
    fn shared_locks_coexist() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "1\n").unwrap();

        let first = queue.open_read(&fast_backoff()).unwrap().unwrap();
        let second = queue.open_read(&fast_backoff()).unwrap().unwrap();
        assert_eq!(first.mode(), LockMode::Shared);
        assert_eq!(second.mode(), LockMode::Shared);
    }

    #[test]
    fn exclusive_lock_blocks_shared_until_released() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "1\n").unwrap();

        let exclusive = queue.open_exclusive(&fast_backoff()).unwrap().unwrap();
        assert_eq!(exclusive.mode(), LockMode::Exclusive);

        let reader_queue = queue.clone();
        let reader = std::thread::spawn(move || {
            let started = std::time::Instant::now();
            let locked = reader_queue.open_read(&fast_backoff()).unwrap();
            assert!(locked.is_some());
            started.elapsed()
        });

        std::thread::sleep(Duration::from_millis(100));
        drop(exclusive);

        let waited = reader.join().unwrap();
        assert!(waited >= Duration::from_millis(50));
    }

    #[test]
    fn reopens_after_file_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let queue = queue_in(&temp_dir);
        fs::write(queue.path(), "1 old\n").unwrap();

        let exclusive = queue.open_exclusive(&fast_backoff()).unwrap().unwrap();

        // The appender opens the old inode and waits on its lock.
        let appender_queue = queue.clone();
        let appender = std::thread::spawn(move || {
            appender_queue
                .open_append(&fast_backoff())
                .unwrap()
                .append(&LockRecord::new(9, "late"))
                .unwrap();
        });

        std::thread::sleep(Duration::from_millis(50));
        let staging = queue.staging_path(1).unwrap();
        crate::fs::atomic_write_via(queue.path(), &staging, b"2 new\n", None).unwrap();
        drop(exclusive);
        appender.join().unwrap();

        assert_eq!(
            fs::read_to_string(queue.path()).unwrap(),
            "2 new\n9 late\n"
        );
    }
}
