//! Cutover Backup - Table snapshots and time-boxed emergency rollback.
//!
//! A snapshot copies each configured table into a sibling `<table>_backup`
//! table, tagging rows with a generation marker, and records the result in a
//! [`BackupManifest`]. The [`RollbackEngine`] restores the newest manifest
//! while it is inside the rollback window.

pub mod error;
pub mod manifest;
pub mod prune;
pub mod rollback;
pub mod snapshot;

pub use error::{BackupError, StructuralRollbackError, TableRestoreError};
pub use manifest::{find_latest, list_manifests, BackupManifest, TableBackup};
pub use prune::{apply_prune, plan_prune, PrunePlan, RetentionPolicy};
pub use rollback::{
    validate_window, RollbackEngine, RollbackReport, RollbackResult, RollbackState, RollbackStatus,
    StructuralOutcome, ROLLBACK_PHRASE,
};
pub use snapshot::BackupManager;
