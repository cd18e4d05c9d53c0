//! Backup and rollback error types.

use std::path::PathBuf;

use cutover_core::error::{DbError, LockError, StateError};
use thiserror::Error;

/// Errors that stop a snapshot, rollback or prune before it mutates anything.
#[derive(Debug, Error)]
pub enum BackupError {
    /// No manifest exists in the backup directory.
    #[error("no backup manifests found in {dir}; cannot roll back")]
    NoManifest {
        /// Backup directory searched.
        dir: PathBuf,
    },

    /// The newest manifest is older than the rollback window.
    #[error(
        "backup {manifest} is {age_hours:.1} hours old, outside the {window_hours} hour rollback window; \
         manual restoration is required"
    )]
    WindowExpired {
        /// Manifest that was rejected.
        manifest: PathBuf,
        /// Age of the manifest in hours.
        age_hours: f64,
        /// The configured window.
        window_hours: i64,
    },

    /// A manifest file is not valid JSON.
    #[error("manifest {path} is corrupted: {source}")]
    CorruptManifest {
        /// Path of the manifest.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// I/O error on a manifest or the backup directory.
    #[error("{path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No tables are configured for snapshotting.
    #[error("no tables configured for snapshot")]
    NoTables,

    /// Snapshotting a table failed; no manifest was written.
    #[error("snapshot of {table} failed: {source}")]
    Snapshot {
        /// Table being snapshotted.
        table: String,
        /// Underlying database error.
        #[source]
        source: DbError,
    },

    /// The database did not answer the reachability check.
    #[error("database unreachable: {source}")]
    DatabaseUnreachable {
        /// Underlying database error.
        #[source]
        source: DbError,
    },

    /// Run lock error.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Migration state file error.
    #[error(transparent)]
    State(#[from] StateError),

    /// Reading operator input failed.
    #[error("failed to read confirmation: {0}")]
    Prompt(#[source] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure restoring one table. Collected into a rollback result; never stops sibling tables.
#[derive(Debug, Error)]
pub enum TableRestoreError {
    /// The backup table no longer exists.
    #[error("backup table {backup} not found")]
    BackupMissing {
        /// Name of the backup table.
        backup: String,
    },

    /// No restorable columns could be determined.
    #[error("no restorable columns for {table}")]
    NoColumns {
        /// Table being restored.
        table: String,
    },

    /// The backup table does not hold the manifest's generation in full.
    /// Checked before the target is truncated.
    #[error("backup table {backup} holds {available} rows for generation {generation}, expected {expected}")]
    IncompleteGeneration {
        /// Name of the backup table.
        backup: String,
        /// Snapshot generation from the manifest.
        generation: String,
        /// Rows tagged with that generation.
        available: u64,
        /// Rows recorded in the manifest.
        expected: u64,
    },

    /// The restored row count differs from the manifest.
    #[error("row count mismatch: restored {restored}, expected {expected}")]
    CountMismatch {
        /// Rows present after the restore.
        restored: u64,
        /// Rows recorded in the manifest.
        expected: u64,
    },

    /// A database call failed; the table's transaction was rolled back.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Failure of the structural (DDL) rollback step.
#[derive(Debug, Error)]
pub enum StructuralRollbackError {
    /// The script could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Script path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The script failed to execute.
    #[error("structural rollback {path} failed: {source}")]
    Execute {
        /// Script path.
        path: PathBuf,
        /// Underlying database error.
        #[source]
        source: DbError,
    },
}
