//! Output formatters for run, rollback and status reports.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use comfy_table::{Cell, Table};
use cutover_backup::{
    find_latest, validate_window, BackupError, BackupManifest, PrunePlan, RollbackReport, RollbackStatus,
    StructuralOutcome,
};
use cutover_core::{render_plan, CutoverConfig, LockInfo, MigrationState, RunLock, RunReport, RunStatus};
use serde::Serialize;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Summary printed after `run`.
pub fn format_run_report(report: &RunReport, window_hours: i64) -> String {
    match report.status {
        RunStatus::AlreadyComplete => "All phases already complete. Nothing to do.".to_string(),
        RunStatus::Cancelled => "Migration cancelled. Nothing was changed.".to_string(),
        RunStatus::DryRun => format!(
            "Dry run finished: {} phase(s) logged, nothing executed.",
            report.executed.len()
        ),
        RunStatus::Completed => {
            let mut out = format!(
                "Migration completed: {} phase(s) executed, {} already complete.",
                report.executed.len(),
                report.skipped.len()
            );
            if !report.failed_optional.is_empty() {
                out.push_str(&format!(
                    "\nOptional phases failed: {}. Re-run `cutover run` to retry them.",
                    report.failed_optional.join(", ")
                ));
            }
            out.push_str(&format!(
                "\nNext: verify the application. Keep rollback ready for {window_hours} hours; \
                 run `cutover rollback` within that window if problems appear."
            ));
            out
        }
    }
}

/// Summary printed after `rollback`.
pub fn format_rollback_report(report: &RollbackReport) -> String {
    if report.status == RollbackStatus::Cancelled {
        return "Rollback cancelled. Nothing was changed.".to_string();
    }

    let mut table = Table::new();
    table.set_header(vec!["Table", "Restored", "Expected", "Result"]);
    for result in &report.results {
        let restored = result.records_restored.map_or_else(|| "-".to_string(), |n| n.to_string());
        let outcome = match &result.error {
            Some(e) => format!("FAILED: {e}"),
            None => "ok".to_string(),
        };
        table.add_row(vec![
            Cell::new(&result.table),
            Cell::new(restored),
            Cell::new(result.expected_records),
            Cell::new(outcome),
        ]);
    }

    let structural = match &report.structural {
        StructuralOutcome::Applied { path } => format!("Structural rollback applied: {}", path.display()),
        StructuralOutcome::Skipped => "Structural rollback skipped: no script configured".to_string(),
        StructuralOutcome::Failed { path, error } => {
            format!("Structural rollback FAILED ({}): {error}", path.display())
        }
    };

    let mut out = format!(
        "Rolled back to snapshot {} ({})\n{table}\n{structural}\n",
        report.manifest_timestamp.to_rfc3339(),
        report.manifest_path.display()
    );

    match report.status {
        RollbackStatus::Succeeded => out.push_str(&format!(
            "Rollback succeeded: {} table(s) restored. Verify the application before resuming traffic.",
            report.succeeded().count()
        )),
        _ => {
            let failed: Vec<&str> = report.failed().map(|r| r.table.as_str()).collect();
            out.push_str("Rollback partially failed. Manual restoration required");
            if !failed.is_empty() {
                out.push_str(&format!(" for: {}", failed.join(", ")));
            }
            if report.structural.is_failed() {
                out.push_str(if failed.is_empty() {
                    " for the schema changes"
                } else {
                    "; the schema changes were not reverted"
                });
            }
            out.push('.');
        }
    }
    out
}

/// Prune plan listing.
pub fn format_prune_plan(plan: &PrunePlan) -> String {
    if plan.delete.is_empty() {
        return format!("Nothing to prune ({} manifest(s) kept).", plan.keep.len());
    }
    let mut out = format!(
        "{} manifest(s) to delete, {} kept:\n",
        plan.delete.len(),
        plan.keep.len()
    );
    for path in &plan.delete {
        out.push_str(&format!("  - {}\n", path.display()));
    }
    out
}

/// Latest manifest as reported by `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStatus {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub tables: usize,
    pub age_hours: f64,
    pub rollback_eligible: bool,
}

/// Everything `status` reports. Reads files only; no database access.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    #[serde(skip)]
    pub plan: String,
    pub state: MigrationState,
    pub pending_phases: Vec<String>,
    pub latest_manifest: Option<ManifestStatus>,
    pub lock: Option<LockInfo>,
}

impl StatusView {
    pub fn collect(config: &CutoverConfig, state: MigrationState, now: DateTime<Utc>) -> Result<Self, BackupError> {
        let latest_manifest = match find_latest(&config.paths.backup_dir) {
            Ok((path, manifest)) => Some(manifest_status(config, path, &manifest, now)),
            Err(BackupError::NoManifest { .. }) => None,
            Err(e) => return Err(e),
        };
        let pending_phases = config
            .catalog
            .iter()
            .filter(|p| !state.is_phase_complete(&p.id))
            .map(|p| p.id.clone())
            .collect();

        Ok(Self {
            plan: render_plan(&config.catalog, &state),
            state,
            pending_phases,
            latest_manifest,
            lock: RunLock::holder(&config.paths.lock_file),
        })
    }

    pub fn render(&self, format: OutputFormat) -> Result<String, serde_json::Error> {
        match format {
            OutputFormat::Json => serde_json::to_string_pretty(self),
            OutputFormat::Text => Ok(self.render_text()),
        }
    }

    fn render_text(&self) -> String {
        let mut out = self.plan.trim_end().to_string();
        out.push('\n');

        if let Some(rollback) = self.state.last_rollback() {
            out.push_str(&format!(
                "Rolled back at {} to snapshot {} ({}). Run `cutover run` to re-apply the migration.\n",
                rollback.rolled_back_at.to_rfc3339(),
                rollback.snapshot.to_rfc3339(),
                rollback.status
            ));
        }

        match &self.latest_manifest {
            Some(m) => {
                out.push_str(&format!(
                    "Latest snapshot: {} ({} table(s), {:.1} hours old)\n",
                    m.timestamp.to_rfc3339(),
                    m.tables,
                    m.age_hours
                ));
                out.push_str(if m.rollback_eligible {
                    "Rollback: available\n"
                } else {
                    "Rollback: window expired, manual restoration required\n"
                });
            }
            None => out.push_str("Latest snapshot: none\n"),
        }

        if let Some(lock) = &self.lock {
            out.push_str(&format!(
                "Lock held by pid {} ({}) since {}\n",
                lock.holder_pid,
                lock.operation,
                lock.acquired_at.to_rfc3339()
            ));
        }
        out
    }
}

fn manifest_status(config: &CutoverConfig, path: PathBuf, manifest: &BackupManifest, now: DateTime<Utc>) -> ManifestStatus {
    let age = manifest.age(now);
    let rollback_eligible = validate_window(&path, manifest, config.rollback.window(), now).is_ok();
    ManifestStatus {
        path,
        timestamp: manifest.timestamp,
        tables: manifest.table_backups.len(),
        age_hours: age.num_minutes() as f64 / 60.0,
        rollback_eligible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use cutover_backup::RollbackResult;

    fn result(table: &str, error: Option<&str>) -> RollbackResult {
        RollbackResult {
            table: table.to_string(),
            success: error.is_none(),
            records_restored: error.is_none().then_some(10),
            expected_records: 10,
            error: error.map(str::to_string),
        }
    }

    fn rollback_report(status: RollbackStatus, results: Vec<RollbackResult>) -> RollbackReport {
        RollbackReport {
            status,
            manifest_path: PathBuf::from("backups/backup-manifest-2024-03-01T22-00-00.000Z.json"),
            manifest_timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap(),
            results,
            structural: StructuralOutcome::Skipped,
        }
    }

    #[test]
    fn test_completed_run_mentions_window() {
        let report = RunReport {
            status: RunStatus::Completed,
            executed: vec!["backup".into(), "schema".into()],
            skipped: vec![],
            failed_optional: vec!["reindex".into()],
            completed_phases: vec!["backup".into(), "schema".into()],
        };
        let text = format_run_report(&report, 48);
        assert!(text.contains("2 phase(s) executed"));
        assert!(text.contains("Optional phases failed: reindex"));
        assert!(text.contains("48 hours"));
    }

    #[test]
    fn test_partial_rollback_names_failed_tables() {
        let report = rollback_report(
            RollbackStatus::PartiallyFailed,
            vec![result("c", None), result("b", Some("boom")), result("a", None)],
        );
        let text = format_rollback_report(&report);
        assert!(text.contains("FAILED: boom"));
        assert!(text.contains("Manual restoration required for: b."));
    }

    #[test]
    fn test_cancelled_rollback_is_short() {
        let report = rollback_report(RollbackStatus::Cancelled, vec![]);
        assert_eq!(format_rollback_report(&report), "Rollback cancelled. Nothing was changed.");
    }

    #[test]
    fn test_status_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = CutoverConfig::new(dir.path());
        let view = StatusView::collect(&config, MigrationState::default(), Utc::now()).unwrap();
        assert!(view.latest_manifest.is_none());
        assert!(view.render(OutputFormat::Text).unwrap().contains("Latest snapshot: none"));
    }

    #[test]
    fn test_status_reports_expired_window() {
        let dir = tempfile::tempdir().unwrap();
        let config = CutoverConfig::new(dir.path());
        let now = Utc::now();
        BackupManifest::new(now - TimeDelta::hours(49))
            .write(&config.paths.backup_dir)
            .unwrap();

        let view = StatusView::collect(&config, MigrationState::default(), now).unwrap();
        let manifest = view.latest_manifest.as_ref().unwrap();
        assert!(!manifest.rollback_eligible);

        let json: serde_json::Value = serde_json::from_str(&view.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["latestManifest"]["rollbackEligible"], false);
        assert!(json.get("plan").is_none());
    }

    #[test]
    fn test_status_shows_last_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let config = CutoverConfig::new(dir.path());
        let snapshot = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();
        let state = MigrationState::default()
            .with_phase_complete("schema", snapshot + TimeDelta::hours(1))
            .with_rollback(snapshot, "succeeded", snapshot + TimeDelta::hours(2));

        let view = StatusView::collect(&config, state, snapshot + TimeDelta::hours(3)).unwrap();
        let text = view.render(OutputFormat::Text).unwrap();
        assert!(text.contains("Rolled back at 2024-03-02T00:00:00+00:00 to snapshot 2024-03-01T22:00:00+00:00 (succeeded)"));

        let json: serde_json::Value = serde_json::from_str(&view.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["state"]["rollbacks"][0]["status"], "succeeded");
    }
}
