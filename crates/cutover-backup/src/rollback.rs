//! Emergency rollback - restores the newest snapshot within the rollback window.
//!
//! Tables are restored in reverse of their manifest order, each in its own
//! transaction, from the rows tagged with the manifest's generation. A
//! failing table is recorded and the engine moves on to the next one. The
//! structural (DDL) rollback runs afterwards regardless of table failures,
//! and the outcome is recorded in the migration state file.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use cutover_core::config::CutoverConfig;
use cutover_core::db::{Database, Ident, BACKUP_MARKER_COLUMN};
use cutover_core::{ConfirmationGate, EventLog, RunLock, StateStore};
use serde_json::json;

use crate::error::{BackupError, StructuralRollbackError, TableRestoreError};
use crate::manifest::{find_latest, BackupManifest, TableBackup};

/// Phrase the operator must type to confirm a rollback.
pub const ROLLBACK_PHRASE: &str = "EMERGENCY_ROLLBACK";

/// Lock operation name recorded by rollbacks.
pub const ROLLBACK_OPERATION: &str = "rollback";

/// Where the engine is in a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackState {
    Idle,
    LocatingManifest,
    ValidatingWindow,
    AwaitingConfirmation,
    RestoringTables,
    StructuralRollback,
    Verifying,
    Succeeded,
    PartiallyFailed,
    /// The operator declined; nothing was mutated.
    Cancelled,
}

impl fmt::Display for RollbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RollbackState::Idle => "idle",
            RollbackState::LocatingManifest => "locating_manifest",
            RollbackState::ValidatingWindow => "validating_window",
            RollbackState::AwaitingConfirmation => "awaiting_confirmation",
            RollbackState::RestoringTables => "restoring_tables",
            RollbackState::StructuralRollback => "structural_rollback",
            RollbackState::Verifying => "verifying",
            RollbackState::Succeeded => "succeeded",
            RollbackState::PartiallyFailed => "partially_failed",
            RollbackState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of restoring one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    pub table: String,
    pub success: bool,
    /// Rows present after a successful restore.
    pub records_restored: Option<u64>,
    /// Rows recorded in the manifest.
    pub expected_records: u64,
    pub error: Option<String>,
}

/// Outcome of the structural rollback step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralOutcome {
    /// The script ran to completion.
    Applied { path: PathBuf },
    /// No script is configured.
    Skipped,
    /// The script failed. Restored table data is kept.
    Failed { path: PathBuf, error: String },
}

impl StructuralOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StructuralOutcome::Failed { .. })
    }
}

/// Terminal status of a rollback that passed its preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    Succeeded,
    PartiallyFailed,
    Cancelled,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::Succeeded => write!(f, "succeeded"),
            RollbackStatus::PartiallyFailed => write!(f, "partially_failed"),
            RollbackStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub status: RollbackStatus,
    pub manifest_path: PathBuf,
    pub manifest_timestamp: DateTime<Utc>,
    /// Per-table results, in restore order.
    pub results: Vec<RollbackResult>,
    pub structural: StructuralOutcome,
}

impl RollbackReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &RollbackResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &RollbackResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RollbackStatus::PartiallyFailed => 1,
            RollbackStatus::Succeeded | RollbackStatus::Cancelled => 0,
        }
    }
}

/// Check that `manifest` is still within `window` at `now`.
///
/// The window is inclusive: a manifest exactly `window` old may still be
/// rolled back.
pub fn validate_window(
    manifest_path: &Path,
    manifest: &BackupManifest,
    window: TimeDelta,
    now: DateTime<Utc>,
) -> Result<TimeDelta, BackupError> {
    let age = manifest.age(now);
    if age > window {
        return Err(BackupError::WindowExpired {
            manifest: manifest_path.to_path_buf(),
            age_hours: age.num_seconds() as f64 / 3600.0,
            window_hours: window.num_hours(),
        });
    }
    Ok(age)
}

/// Drives an emergency rollback.
pub struct RollbackEngine<'a> {
    config: &'a CutoverConfig,
    db: &'a dyn Database,
    log: &'a EventLog,
    state: RollbackState,
    now: Option<DateTime<Utc>>,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(config: &'a CutoverConfig, db: &'a dyn Database, log: &'a EventLog) -> Self {
        Self {
            config,
            db,
            log,
            state: RollbackState::Idle,
            now: None,
        }
    }

    /// Evaluate the rollback window at a fixed instant instead of the wall clock.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn state(&self) -> RollbackState {
        self.state
    }

    fn transition(&mut self, next: RollbackState) {
        tracing::debug!(from = %self.state, to = %next, "rollback transition");
        self.state = next;
    }

    /// Run the rollback against the newest manifest.
    pub async fn run(&mut self, gate: &mut ConfirmationGate) -> Result<RollbackReport, BackupError> {
        let config = self.config;
        let _lock = RunLock::acquire(&config.paths.lock_file, ROLLBACK_OPERATION)?;
        let mut store = StateStore::open(&config.paths.state_file)?;
        self.log.info("Starting emergency rollback");

        self.transition(RollbackState::LocatingManifest);
        let (manifest_path, manifest) = match find_latest(&config.paths.backup_dir) {
            Ok(found) => found,
            Err(e) => {
                self.log.error_with("No usable backup manifest", json!({ "error": e.to_string() }));
                return Err(e);
            }
        };
        self.log.info_with(
            "Found backup manifest",
            json!({
                "manifest": manifest_path.display().to_string(),
                "timestamp": manifest.timestamp.to_rfc3339(),
                "tables": manifest.table_backups.len(),
            }),
        );

        self.transition(RollbackState::ValidatingWindow);
        let now = self.now.unwrap_or_else(Utc::now);
        let age = match validate_window(&manifest_path, &manifest, config.rollback.window(), now) {
            Ok(age) => age,
            Err(e) => {
                self.log.critical_with("Rollback window expired", json!({ "error": e.to_string() }));
                return Err(e);
            }
        };
        self.log.info_with(
            "Backup is within the rollback window",
            json!({ "ageMinutes": age.num_minutes(), "windowHours": config.rollback.window_hours }),
        );

        self.check_reachable(&manifest).await?;

        self.transition(RollbackState::AwaitingConfirmation);
        let tables: Vec<&str> = manifest.table_backups.iter().map(|t| t.original_table.as_str()).collect();
        let prompt = format!(
            "This will DELETE current data and restore {} table(s) [{}] from the backup taken at {}.",
            tables.len(),
            tables.join(", "),
            manifest.timestamp.to_rfc3339()
        );
        if !gate.confirm_phrase(&prompt, ROLLBACK_PHRASE).map_err(BackupError::Prompt)? {
            self.log.info("Rollback cancelled by operator");
            self.transition(RollbackState::Cancelled);
            return Ok(RollbackReport {
                status: RollbackStatus::Cancelled,
                manifest_path,
                manifest_timestamp: manifest.timestamp,
                results: Vec::new(),
                structural: StructuralOutcome::Skipped,
            });
        }

        self.transition(RollbackState::RestoringTables);
        let results = self.restore_tables(&manifest).await;

        self.transition(RollbackState::StructuralRollback);
        let structural = self.apply_structural_rollback().await;

        self.transition(RollbackState::Verifying);
        let status = self.verify(&results, &structural);
        self.transition(match status {
            RollbackStatus::Succeeded => RollbackState::Succeeded,
            _ => RollbackState::PartiallyFailed,
        });

        // Tables are restored by now; a failed state write is logged, not returned.
        if let Err(e) = store.record_rollback(manifest.timestamp, status.to_string()) {
            self.log.critical_with(
                "Failed to record rollback in migration state",
                json!({ "state": config.paths.state_file.display().to_string(), "error": e.to_string() }),
            );
        }

        Ok(RollbackReport {
            status,
            manifest_path,
            manifest_timestamp: manifest.timestamp,
            results,
            structural,
        })
    }

    /// Restore every table in reverse manifest order, continuing past failures.
    pub async fn restore_tables(&self, manifest: &BackupManifest) -> Vec<RollbackResult> {
        let mut results = Vec::with_capacity(manifest.table_backups.len());
        for backup in manifest.table_backups.iter().rev() {
            self.log.info_with(
                "Restoring table",
                json!({ "table": backup.original_table, "backupTable": backup.backup_table }),
            );
            let result = match self.restore_table(backup, manifest.timestamp).await {
                Ok(restored) => {
                    self.log.info_with(
                        "Table restored",
                        json!({ "table": backup.original_table, "records": restored }),
                    );
                    RollbackResult {
                        table: backup.original_table.clone(),
                        success: true,
                        records_restored: Some(restored),
                        expected_records: backup.record_count,
                        error: None,
                    }
                }
                Err(e) => {
                    self.log.error_with(
                        "Table restore failed",
                        json!({ "table": backup.original_table, "error": e.to_string() }),
                    );
                    RollbackResult {
                        table: backup.original_table.clone(),
                        success: false,
                        records_restored: None,
                        expected_records: backup.record_count,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        results
    }

    async fn restore_table(&self, backup: &TableBackup, generation: DateTime<Utc>) -> Result<u64, TableRestoreError> {
        let target = Ident::new(backup.original_table.as_str())?;
        let source = Ident::new(backup.backup_table.as_str())?;

        if !self.db.table_exists(&source).await? {
            return Err(TableRestoreError::BackupMissing {
                backup: backup.backup_table.clone(),
            });
        }

        let columns = self.restorable_columns(&target, &source).await?;
        if columns.is_empty() {
            return Err(TableRestoreError::NoColumns {
                table: backup.original_table.clone(),
            });
        }

        let available = self.db.count_generation(&source, generation).await?;
        if available != backup.record_count {
            return Err(TableRestoreError::IncompleteGeneration {
                backup: backup.backup_table.clone(),
                generation: generation.to_rfc3339(),
                available,
                expected: backup.record_count,
            });
        }

        self.db.restore_table(&target, &source, &columns, generation).await?;

        let restored = self.db.count_rows(&target).await?;
        if restored != backup.record_count {
            return Err(TableRestoreError::CountMismatch {
                restored,
                expected: backup.record_count,
            });
        }
        Ok(restored)
    }

    /// Fail before confirmation if the database does not answer.
    async fn check_reachable(&self, manifest: &BackupManifest) -> Result<(), BackupError> {
        let Some(first) = manifest.table_backups.first() else {
            return Ok(());
        };
        let target = Ident::new(first.backup_table.as_str())
            .map_err(|source| BackupError::DatabaseUnreachable { source })?;
        if let Err(source) = self.db.table_exists(&target).await {
            self.log.error_with("Database connection failed", json!({ "error": source.to_string() }));
            return Err(BackupError::DatabaseUnreachable { source });
        }
        Ok(())
    }

    /// Configured columns, or the live columns also present in the backup.
    async fn restorable_columns(&self, target: &Ident, source: &Ident) -> Result<Vec<Ident>, TableRestoreError> {
        let names = match self.config.table_columns(target.as_str()) {
            Some(columns) => columns.to_vec(),
            None => {
                let live = self.db.columns(target).await?;
                let backed_up = self.db.columns(source).await?;
                live.into_iter()
                    .filter(|c| c != BACKUP_MARKER_COLUMN && backed_up.contains(c))
                    .collect()
            }
        };
        Ok(Ident::all(names)?)
    }

    /// Apply the structural rollback script, if one is configured.
    pub async fn apply_structural_rollback(&self) -> StructuralOutcome {
        let Some(path) = self.config.paths.structural_rollback.clone() else {
            self.log.warn("No structural rollback script configured, skipping");
            return StructuralOutcome::Skipped;
        };

        self.log.info_with(
            "Applying structural rollback",
            json!({ "script": path.display().to_string() }),
        );
        match self.run_structural_script(&path).await {
            Ok(()) => {
                self.log.info("Structural rollback applied");
                StructuralOutcome::Applied { path }
            }
            Err(e) => {
                self.log.critical_with("Structural rollback failed", json!({ "error": e.to_string() }));
                StructuralOutcome::Failed {
                    path,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_structural_script(&self, path: &Path) -> Result<(), StructuralRollbackError> {
        let script = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StructuralRollbackError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        self.db
            .execute_script(&script)
            .await
            .map_err(|source| StructuralRollbackError::Execute {
                path: path.to_path_buf(),
                source,
            })
    }

    fn verify(&self, results: &[RollbackResult], structural: &StructuralOutcome) -> RollbackStatus {
        let failed: Vec<&str> = results.iter().filter(|r| !r.success).map(|r| r.table.as_str()).collect();
        let succeeded = results.len() - failed.len();

        if failed.is_empty() && !structural.is_failed() {
            self.log.info_with(
                "Rollback verified",
                json!({ "tablesRestored": succeeded }),
            );
            RollbackStatus::Succeeded
        } else {
            self.log.critical_with(
                "Rollback partially failed",
                json!({
                    "tablesRestored": succeeded,
                    "failedTables": failed,
                    "structuralFailed": structural.is_failed(),
                }),
            );
            RollbackStatus::PartiallyFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_at(timestamp: DateTime<Utc>) -> BackupManifest {
        BackupManifest::new(timestamp)
    }

    #[test]
    fn test_window_boundaries() {
        let created = Utc::now();
        let manifest = manifest_at(created);
        let path = Path::new("backup-manifest.json");
        let window = TimeDelta::hours(48);

        let just_inside = created + TimeDelta::hours(47) + TimeDelta::minutes(59);
        assert!(validate_window(path, &manifest, window, just_inside).is_ok());

        let exactly = created + TimeDelta::hours(48);
        assert!(validate_window(path, &manifest, window, exactly).is_ok());

        let just_outside = created + TimeDelta::hours(48) + TimeDelta::minutes(1);
        assert!(matches!(
            validate_window(path, &manifest, window, just_outside),
            Err(BackupError::WindowExpired { window_hours: 48, .. })
        ));
    }

    #[test]
    fn test_exit_codes() {
        let report = RollbackReport {
            status: RollbackStatus::PartiallyFailed,
            manifest_path: PathBuf::from("m.json"),
            manifest_timestamp: Utc::now(),
            results: Vec::new(),
            structural: StructuralOutcome::Skipped,
        };
        assert_eq!(report.exit_code(), 1);
        assert_eq!(
            RollbackReport {
                status: RollbackStatus::Cancelled,
                ..report
            }
            .exit_code(),
            0
        );
    }
}
