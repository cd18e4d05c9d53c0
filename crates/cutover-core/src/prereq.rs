//! Checks run before any mutation.

use std::path::PathBuf;

use serde_json::json;

use crate::catalog::{PhaseAction, PhaseCatalog};
use crate::db::{Database, Ident};
use crate::error::PrerequisiteError;
use crate::event_log::EventLog;

/// Non-fatal findings from a successful check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerequisiteReport {
    /// Script phases whose program is missing, as `(phase id, path)`.
    pub missing_scripts: Vec<(String, PathBuf)>,
}

impl PrerequisiteReport {
    /// Warning messages suitable for the state file.
    pub fn warnings(&self) -> Vec<String> {
        self.missing_scripts
            .iter()
            .map(|(id, path)| format!("script for phase {id} not found: {}", path.display()))
            .collect()
    }
}

/// Validates phase artifacts and database reachability.
pub struct PrerequisiteChecker<'a> {
    db: &'a dyn Database,
    log: &'a EventLog,
}

impl<'a> PrerequisiteChecker<'a> {
    pub fn new(db: &'a dyn Database, log: &'a EventLog) -> Self {
        Self { db, log }
    }

    /// Check every phase artifact, then check the database is reachable.
    ///
    /// Every missing SQL file is collected before failing. A missing script
    /// is only reported. The reachability check runs only once the files are in place.
    pub async fn verify(&self, catalog: &PhaseCatalog, check_table: &str) -> Result<PrerequisiteReport, PrerequisiteError> {
        self.log.info("Verifying prerequisites");

        let mut missing_sql = Vec::new();
        let mut report = PrerequisiteReport::default();

        for phase in catalog {
            let path = phase.action.path();
            if path.exists() {
                continue;
            }
            match &phase.action {
                PhaseAction::Sql { .. } => {
                    self.log.error_with(
                        "Required migration file missing",
                        json!({ "phase": phase.id, "file": path.display().to_string() }),
                    );
                    missing_sql.push(path.to_path_buf());
                }
                PhaseAction::Script { .. } => {
                    self.log.warn_with(
                        "Phase script not found",
                        json!({ "phase": phase.id, "file": path.display().to_string() }),
                    );
                    report.missing_scripts.push((phase.id.clone(), path.to_path_buf()));
                }
            }
        }

        if !missing_sql.is_empty() {
            return Err(PrerequisiteError::MissingFiles { files: missing_sql });
        }

        let target = Ident::new(check_table).map_err(|source| PrerequisiteError::DatabaseUnreachable { source })?;
        if let Err(source) = self.db.ping(&target).await {
            self.log.error_with(
                "Database connection failed",
                json!({ "checkTable": check_table, "error": source.to_string() }),
            );
            return Err(PrerequisiteError::DatabaseUnreachable { source });
        }

        self.log.info("Database connection verified");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PhaseDescriptor;
    use crate::db::MemoryDatabase;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_collects_every_missing_sql_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("present.sql"), "SELECT 1;").unwrap();
        let catalog = PhaseCatalog::new(vec![
            PhaseDescriptor::sql("a", "A", dir.path().join("missing-a.sql")),
            PhaseDescriptor::sql("b", "B", dir.path().join("present.sql")),
            PhaseDescriptor::sql("c", "C", dir.path().join("missing-c.sql")),
        ])
        .unwrap();
        let db = MemoryDatabase::new().with_table("companies", &["id"], 1);
        let log = EventLog::console_only();

        let err = PrerequisiteChecker::new(&db, &log)
            .verify(&catalog, "companies")
            .await
            .unwrap_err();
        match err {
            PrerequisiteError::MissingFiles { files } => {
                assert_eq!(
                    files,
                    vec![dir.path().join("missing-a.sql"), dir.path().join("missing-c.sql")]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_script_is_warning() {
        let dir = tempdir().unwrap();
        let catalog = PhaseCatalog::new(vec![PhaseDescriptor::script(
            "reindex",
            "Reindex",
            dir.path().join("reindex.sh"),
        )
        .optional()])
        .unwrap();
        let db = MemoryDatabase::new().with_table("companies", &["id"], 1);
        let log = EventLog::console_only();

        let report = PrerequisiteChecker::new(&db, &log)
            .verify(&catalog, "companies")
            .await
            .unwrap();
        assert_eq!(report.missing_scripts.len(), 1);
        assert!(report.warnings()[0].contains("reindex"));
    }

    #[tokio::test]
    async fn test_unreachable_database_is_distinct() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("001.sql"), "SELECT 1;").unwrap();
        let catalog = PhaseCatalog::new(vec![PhaseDescriptor::sql("schema", "Schema", dir.path().join("001.sql"))]).unwrap();
        let db = MemoryDatabase::new().with_table("companies", &["id"], 1).unreachable();
        let log = EventLog::console_only();

        let err = PrerequisiteChecker::new(&db, &log)
            .verify(&catalog, "companies")
            .await
            .unwrap_err();
        assert!(matches!(err, PrerequisiteError::DatabaseUnreachable { .. }));
    }
}
