//! Run lock shared by migration and rollback.
//!
//! The lock is a file created with `create_new`, so only one process can
//! hold it. It records who holds it and why. The guard removes the file when
//! dropped, which covers success, abort and early-return paths alike.
//!
//! There is no expiry: a lock left behind by a crashed process has to be
//! removed by the operator after confirming the recorded PID is gone.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LockError;

/// Lock file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// PID of the holder.
    pub holder_pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// What the holder is doing.
    pub operation: String,
}

/// Exclusive run lock.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    /// Acquire the lock at `path` for `operation`.
    pub fn acquire(path: impl Into<PathBuf>, operation: impl Into<String>) -> Result<Self, LockError> {
        let path = path.into();
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let info = LockInfo {
            holder_pid: std::process::id(),
            acquired_at: Utc::now(),
            operation: operation.into(),
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Self::held_error(&path));
            }
            Err(source) => return Err(io_err(source)),
        };

        let body = serde_json::to_vec_pretty(&info).map_err(|e| io_err(e.into()))?;
        if let Err(source) = file.write_all(&body).and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(io_err(source));
        }

        tracing::debug!(path = %path.display(), operation = %info.operation, "run lock acquired");
        Ok(Self { path, info })
    }

    fn held_error(path: &Path) -> LockError {
        let holder = fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockInfo>(&bytes).ok());
        match holder {
            Some(info) => LockError::Held {
                path: path.to_path_buf(),
                holder_pid: info.holder_pid,
                operation: info.operation,
                acquired_at: info.acquired_at.to_rfc3339(),
            },
            None => LockError::Unreadable {
                path: path.to_path_buf(),
            },
        }
    }

    /// Read the current holder without acquiring.
    pub fn holder(path: &Path) -> Option<LockInfo> {
        let bytes = fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "run lock released"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock"),
        }
    }
}
