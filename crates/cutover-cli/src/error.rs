//! CLI errors and the next action shown with each.

use cutover_backup::BackupError;
use cutover_core::error::{ConfigError, DbError, LockError, MigrationError, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to read confirmation: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// What the operator should do next.
    pub fn next_action(&self) -> Option<&'static str> {
        match self {
            CliError::Config(ConfigError::MissingEnv { .. }) => {
                Some("Set DATABASE_URL and DATABASE_PASSWORD, then re-run. Nothing was changed.")
            }
            CliError::Config(_) => Some("Fix the run file and re-run. Nothing was changed."),
            CliError::Migration(MigrationError::CriticalAbort { .. }) => Some(
                "Run `cutover rollback` now to restore the pre-migration snapshot, \
                 or fix the failure and re-run `cutover run` to resume from the failed phase.",
            ),
            CliError::Migration(MigrationError::Prerequisite(_)) => {
                Some("Fix the prerequisites above and re-run. Nothing was changed.")
            }
            CliError::Migration(MigrationError::Lock(_)) | CliError::Backup(BackupError::Lock(_)) | CliError::Lock(_) => {
                Some("Wait for the other run to finish. Remove the lock file only if its process is gone.")
            }
            CliError::Backup(BackupError::WindowExpired { .. }) => {
                Some("Manual restoration is required: restore from the full database backup.")
            }
            CliError::Backup(BackupError::NoManifest { .. }) => {
                Some("Manual restoration is required: no snapshot manifest exists.")
            }
            CliError::Backup(BackupError::Snapshot { .. }) => {
                Some("Do not start the migration without a complete snapshot. Fix the error and re-run `cutover snapshot`.")
            }
            CliError::Database(_) | CliError::Backup(BackupError::DatabaseUnreachable { .. }) => {
                Some("Check database connectivity and credentials, then re-run. Nothing was changed.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::error::PhaseError;
    use std::path::PathBuf;

    #[test]
    fn test_critical_abort_points_to_rollback() {
        let err = CliError::from(MigrationError::CriticalAbort {
            phase_id: "schema".to_string(),
            phase_name: "Schema Changes".to_string(),
            source: PhaseError::StatementErrors { count: 2 },
        });
        assert!(err.next_action().unwrap().contains("cutover rollback"));
    }

    #[test]
    fn test_expired_window_requires_manual_restore() {
        let err = CliError::from(BackupError::WindowExpired {
            manifest: PathBuf::from("m.json"),
            age_hours: 50.0,
            window_hours: 48,
        });
        assert!(err.next_action().unwrap().starts_with("Manual restoration"));
    }

    #[test]
    fn test_unreachable_rollback_points_to_connectivity() {
        let err = CliError::from(BackupError::DatabaseUnreachable {
            source: DbError::Rejected("connection refused".to_string()),
        });
        assert!(err.next_action().unwrap().starts_with("Check database connectivity"));
    }

    #[test]
    fn test_missing_env_names_variables() {
        let err = CliError::from(ConfigError::MissingEnv { name: "DATABASE_URL" });
        assert!(err.next_action().unwrap().contains("DATABASE_PASSWORD"));
    }
}
