//! Atomic whole-file replacement.
//!
//! # Implementation Strategy
//!
//! 1. Write content to a sibling file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Give it the permissions of the file it replaces
//! 4. `rename()` it over the target and sync the directory
//!
//! `rename()` is atomic when source and destination share a filesystem, so a
//! reader opening the target sees either the old file or the new one, never a
//! partial write. On crash only the sibling can be left behind.

use crate::error::{BusLockError, Result};
use std::ffi::OsString;
use std::fs::{self, File, Permissions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sibling of `target` named `<file name>.<suffix>`.
pub fn sibling_path(target: &Path, suffix: &str) -> Result<PathBuf> {
    let filename = target.file_name().ok_or_else(|| {
        BusLockError::UserError(format!("invalid file path '{}'", target.display()))
    })?;

    let mut name = OsString::from(filename);
    name.push(".");
    name.push(suffix);
    Ok(target.with_file_name(name))
}

/// Replace `target` with `content`, staging it in `staging`.
///
/// `staging` is created or truncated. When `permissions` is given the staged
/// file gets them before it becomes visible. On failure the staged file is
/// removed and `target` is left untouched.
pub fn atomic_write_via(
    target: &Path,
    staging: &Path,
    content: &[u8],
    permissions: Option<Permissions>,
) -> Result<()> {
    write_and_sync(staging, content)?;

    if let Some(permissions) = permissions
        && let Err(e) = fs::set_permissions(staging, permissions)
    {
        let _ = fs::remove_file(staging);
        return Err(BusLockError::io(
            format!("failed to set permissions on '{}'", staging.display()),
            e,
        ));
    }

    atomic_replace(staging, target)
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        BusLockError::io(
            format!("failed to create replacement file '{}'", path.display()),
            e,
        )
    })?;

    if let Err(e) = file.write_all(content).and_then(|()| file.sync_all()) {
        let _ = fs::remove_file(path);
        return Err(BusLockError::io(
            format!("failed to write replacement file '{}'", path.display()),
            e,
        ));
    }

    Ok(())
}

/// Atomically replace the target file with the source file.
fn atomic_replace(source: &Path, target: &Path) -> Result<()> {
    fs::rename(source, target).map_err(|e| {
        let _ = fs::remove_file(source);
        BusLockError::io(format!("failed to replace '{}'", target.display()), e)
    })?;

    // Persist the directory entry as well
    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_sibling_path() {
        let target = Path::new("/var/lock/LCK..ttyUSB0");
        let sibling = sibling_path(target, "4242").unwrap();
        assert_eq!(sibling, PathBuf::from("/var/lock/LCK..ttyUSB0.4242"));
    }

    #[test]
    fn test_sibling_path_rejects_root() {
        assert!(sibling_path(Path::new("/"), "1").is_err());
    }

    #[test]
    fn test_atomic_write_replace_existing() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("queue");
        let staging = temp_dir.path().join("queue.1");

        fs::write(&file_path, "1 a\n2 b\n").unwrap();
        atomic_write_via(&file_path, &staging, b"2 b\n", None).unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "2 b\n");
        assert!(!staging.exists());
    }

    #[test]
    fn test_atomic_write_empty_content() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("queue");
        let staging = temp_dir.path().join("queue.1");

        fs::write(&file_path, "1 a\n").unwrap();
        atomic_write_via(&file_path, &staging, b"", None).unwrap();

        assert!(fs::read(&file_path).unwrap().is_empty());
    }

    #[test]
    fn test_atomic_write_truncates_leftover_staging() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("queue");
        let staging = temp_dir.path().join("queue.9");

        // Left over from a crashed rewrite
        fs::write(&staging, "77 ghost\n").unwrap();
        atomic_write_via(&file_path, &staging, b"5 x\n", None).unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "5 x\n");
    }

    #[test]
    fn test_atomic_write_applies_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("queue");
        let staging = temp_dir.path().join("queue.3");

        fs::write(&file_path, "").unwrap();
        atomic_write_via(
            &file_path,
            &staging,
            b"3\n",
            Some(Permissions::from_mode(0o640)),
        )
        .unwrap();

        let mode = fs::metadata(&file_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_failed_replace_keeps_target() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("queue");
        fs::write(&file_path, "1 keep\n").unwrap();

        // Staging in a directory that does not exist cannot be created
        let staging = temp_dir.path().join("missing").join("queue.1");
        let result = atomic_write_via(&file_path, &staging, b"", None);

        assert!(matches!(result, Err(BusLockError::Io { .. })));
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "1 keep\n");
    }
}
