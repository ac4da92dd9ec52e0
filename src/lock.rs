//! Exclusive scan-directory lock.
//!
//! Two concurrent runs against the same scan id would interleave writes in
//! the same directory tree. The lock is a JSON info file under the scan
//! directory; an fd-lock write lease narrows the race window during
//! acquisition, and a TTL lets a crashed run's lock go stale.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use thiserror::Error;

const LOCK_FILE: &str = ".lock";

/// A lock older than this is considered abandoned and may be overridden.
const LOCK_TTL_SECONDS: i64 = 900;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another verax run is already active for scan '{scan_id}' (started {acquired_at})")]
    AlreadyLocked {
        scan_id: String,
        acquired_at: String,
    },

    #[error("Failed to acquire lock for scan '{scan_id}': {reason}")]
    AcquisitionFailed { scan_id: String, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    scan_id: String,
    run_id: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Holds the scan directory lock until dropped.
pub struct ScanLock {
    lock_path: Utf8PathBuf,
}

impl ScanLock {
    /// Acquire the lock, failing fast if a live lock file is present.
    pub fn acquire(scan_dir: &Utf8Path, scan_id: &str, run_id: &str) -> Result<Self, LockError> {
        crate::atomic_write::ensure_dir_all(scan_dir).map_err(|e| LockError::AcquisitionFailed {
            scan_id: scan_id.to_string(),
            reason: format!("cannot create scan directory {scan_dir}: {e}"),
        })?;
        let lock_path = scan_dir.join(LOCK_FILE);

        if let Some(existing) = read_lock_info(&lock_path) {
            let age = crate::clock::now()
                .signed_duration_since(existing.acquired_at)
                .num_seconds();
            if age < LOCK_TTL_SECONDS {
                return Err(LockError::AlreadyLocked {
                    scan_id: scan_id.to_string(),
                    acquired_at: existing.acquired_at.to_rfc3339(),
                });
            }
            // Stale lock: fall through and take over.
        }

        let info = LockInfo {
            scan_id: scan_id.to_string(),
            run_id: run_id.to_string(),
            pid: std::process::id(),
            acquired_at: crate::clock::now(),
        };
        let payload =
            serde_json::to_string_pretty(&info).map_err(|e| LockError::AcquisitionFailed {
                scan_id: scan_id.to_string(),
                reason: format!("cannot serialize lock info: {e}"),
            })?;

        let file =
            fs::File::create(lock_path.as_std_path()).map_err(|e| LockError::AcquisitionFailed {
                scan_id: scan_id.to_string(),
                reason: format!("cannot create lock file: {e}"),
            })?;

        // fd-lock write lease narrows the create/write race; the info file
        // itself is the durable lock.
        let mut rw_lock = RwLock::new(file);
        {
            let guard = rw_lock
                .try_write()
                .map_err(|_| LockError::AlreadyLocked {
                    scan_id: scan_id.to_string(),
                    acquired_at: "unknown".to_string(),
                })?;
            let mut file_ref = &*guard;
            file_ref
                .write_all(payload.as_bytes())
                .and_then(|()| file_ref.sync_all())
                .map_err(|e| LockError::AcquisitionFailed {
                    scan_id: scan_id.to_string(),
                    reason: format!("cannot write lock info: {e}"),
                })?;
        }

        Ok(Self { lock_path })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.lock_path
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        // Best-effort: a leftover lock file expires via TTL anyway.
        let _ = fs::remove_file(self.lock_path.as_std_path());
    }
}

fn read_lock_info(path: &Utf8Path) -> Option<LockInfo> {
    let content = fs::read_to_string(path.as_std_path()).ok()?;
    serde_json::from_str(&content).ok()
}
