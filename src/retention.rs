use crate::errors::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a sweep did
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    /// Directories deleted for being older than the cutoff
    pub removed: Vec<PathBuf>,
    /// Directories young enough to keep
    pub retained: usize,
    /// Directories that could not be inspected or deleted
    pub failed: usize,
}

/// Delete output directories last modified more than `max_age` ago.
///
/// Only directly nested directories are considered. Failures on individual
/// directories are logged and counted, never fatal.
pub fn sweep(output_root: &Path, max_age: Duration) -> Result<SweepReport> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    sweep_older_than(output_root, cutoff)
}

pub fn sweep_older_than(output_root: &Path, cutoff: SystemTime) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let entries = match std::fs::read_dir(output_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = match entry {
            Ok(v) => v,
            Err(e) => {
                warn!("[RETENTION] Failed to read entry in {:?}: {}", output_root, e);
                report.failed += 1;
                continue;
            }
        };
        let path = entry.path();
        let modified = match entry.metadata() {
            Ok(meta) if meta.is_dir() => meta.modified(),
            Ok(_) => continue,
            Err(e) => Err(e),
        };

        match modified {
            Ok(modified) if modified < cutoff => match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("[RETENTION] Removed old output dir {:?}", path);
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!("[RETENTION] Failed to remove {:?}: {}", path, e);
                    report.failed += 1;
                }
            },
            Ok(_) => report.retained += 1,
            Err(e) => {
                warn!("[RETENTION] Failed to stat {:?}: {}", path, e);
                report.failed += 1;
            }
        }
    }

    debug!(
        "[RETENTION] Sweep of {:?}: {} removed, {} retained, {} failed",
        output_root,
        report.removed.len(),
        report.retained,
        report.failed
    );
    Ok(report)
}

/// Sweep `output_root` every `every`, starting immediately
pub fn spawn_periodic_sweeper(output_root: PathBuf, max_age: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let root = output_root.clone();
            match tokio::task::spawn_blocking(move || sweep(&root, max_age)).await {
                Ok(Ok(report)) if !report.removed.is_empty() => info!(
                    "[RETENTION] Periodic sweep removed {} dir(s)",
                    report.removed.len()
                ),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("[RETENTION] Periodic sweep failed: {}", e),
                Err(e) => warn!("[RETENTION] Periodic sweep task failed: {}", e),
            }
            // `sleep` clamps deadlines past the end of time instead of overflowing
            tokio::time::sleep(every).await;
        }
    })
}
