//! Whole-file rewrite of the queue under an exclusive lock.

use super::types::VacuumReport;
use crate::error::Result;
use crate::fs::atomic_write_via;
use crate::queue::{Backoff, LockRecord, QueueFile};
use tracing::{debug, warn};

/// Rewrite `queue` keeping only records accepted by `keep`.
///
/// Undecodable lines are always dropped. The file is left alone when there
/// is nothing to remove, which makes repeated calls cheap and idempotent.
/// `staging_pid` names the sibling file the new content is staged in.
pub(super) fn rewrite<F>(
    queue: &QueueFile,
    backoff: &Backoff,
    staging_pid: u32,
    mut keep: F,
) -> Result<VacuumReport>
where
    F: FnMut(&LockRecord) -> bool,
{
    debug!("Acquiring exclusive lock on {}...", queue.path().display());
    let Some(mut locked) = queue.open_exclusive(backoff)? else {
        debug!("{} does not exist, nothing to rewrite", queue.path().display());
        return Ok(VacuumReport::default());
    };
    debug!("Exclusive lock on {} acquired", queue.path().display());

    let parsed = locked.read_records()?;
    for (line, e) in &parsed.rejected {
        warn!(
            "Dropping unreadable line '{}' from {}: {}",
            line,
            queue.path().display(),
            e
        );
    }

    let (kept, removed): (Vec<LockRecord>, Vec<LockRecord>) =
        parsed.records.into_iter().partition(|r| keep(r));

    let mut report = VacuumReport {
        removed: removed.len(),
        kept: kept.len(),
        dropped: parsed.rejected.len(),
        rewritten: false,
    };

    if report.removed == 0 && report.dropped == 0 {
        return Ok(report);
    }

    let content: String = kept.iter().map(LockRecord::to_line).collect();
    let staging = queue.staging_path(staging_pid)?;
    let permissions = locked.permissions().ok();

    if let Err(e) = atomic_write_via(queue.path(), &staging, content.as_bytes(), permissions) {
        warn!(
            "Problem rewriting serial device lock, can't update lock file {}: {}",
            queue.path().display(),
            e
        );
        return Err(e);
    }

    // The lock goes with the replaced inode; release it only after the rename.
    drop(locked);

    report.rewritten = true;
    Ok(report)
}
