//! Table snapshots.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use cutover_core::config::TableConfig;
use cutover_core::db::{Database, Ident};
use cutover_core::error::DbError;
use cutover_core::EventLog;
use serde_json::json;

use crate::error::BackupError;
use crate::manifest::{BackupManifest, TableBackup};

/// Copies tables into their backup siblings and records a manifest.
pub struct BackupManager<'a> {
    db: &'a dyn Database,
    log: &'a EventLog,
    backup_dir: PathBuf,
}

impl<'a> BackupManager<'a> {
    pub fn new(db: &'a dyn Database, log: &'a EventLog, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            log,
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Snapshot every table in order and write the manifest.
    ///
    /// Every row copied is tagged with `generation`, truncated to
    /// microseconds. The manifest is only written once all tables succeed;
    /// rows copied before a failure stay under a generation no manifest
    /// names, and rollback never selects them.
    pub async fn create_snapshot(
        &self,
        tables: &[TableConfig],
        generation: DateTime<Utc>,
    ) -> Result<(PathBuf, BackupManifest), BackupError> {
        if tables.is_empty() {
            return Err(BackupError::NoTables);
        }
        // Backup tables store microsecond timestamps; the manifest must match exactly.
        let generation = generation.trunc_subsecs(6);

        self.log.info_with(
            "Creating table snapshot",
            json!({ "tables": tables.len(), "generation": generation.to_rfc3339() }),
        );

        let mut manifest = BackupManifest::new(generation);
        for table in tables {
            let entry = self
                .snapshot_table(table, generation)
                .await
                .map_err(|source| {
                    self.log.error_with(
                        "Table snapshot failed",
                        json!({ "table": table.name, "error": source.to_string() }),
                    );
                    BackupError::Snapshot {
                        table: table.name.clone(),
                        source,
                    }
                })?;
            self.log.info_with(
                "Table snapshot complete",
                json!({ "table": entry.original_table, "backupTable": entry.backup_table, "records": entry.record_count }),
            );
            manifest.table_backups.push(entry);
        }

        let path = manifest.write(&self.backup_dir)?;
        self.log.info_with(
            "Backup manifest written",
            json!({ "manifest": path.display().to_string() }),
        );
        Ok((path, manifest))
    }

    async fn snapshot_table(&self, table: &TableConfig, generation: DateTime<Utc>) -> Result<TableBackup, DbError> {
        let source = Ident::new(table.name.as_str())?;
        let backup = source.backup_table()?;

        let column_names = match &table.columns {
            Some(columns) => columns.clone(),
            None => self.db.columns(&source).await?,
        };
        if column_names.is_empty() {
            return Err(DbError::TableNotFound(table.name.clone()));
        }
        let columns = Ident::all(column_names)?;

        let record_count = self.db.snapshot_table(&source, &backup, &columns, generation).await?;
        Ok(TableBackup {
            original_table: source.to_string(),
            backup_table: backup.to_string(),
            record_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::list_manifests;
    use cutover_core::MemoryDatabase;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_snapshot_writes_manifest_in_table_order() {
        let dir = tempdir().unwrap();
        let db = MemoryDatabase::new()
            .with_table("opportunities", &["id", "title"], 150)
            .with_table("contacts", &["id", "name"], 300);
        let log = EventLog::console_only();
        let manager = BackupManager::new(&db, &log, dir.path());

        let tables = vec![TableConfig::new("opportunities"), TableConfig::new("contacts")];
        let (path, manifest) = manager.create_snapshot(&tables, Utc::now()).await.unwrap();

        assert!(path.exists());
        assert_eq!(BackupManifest::load(&path).unwrap(), manifest);
        let names: Vec<_> = manifest.table_backups.iter().map(|t| t.original_table.as_str()).collect();
        assert_eq!(names, vec!["opportunities", "contacts"]);
        assert_eq!(manifest.table_backups[0].record_count, 150);
        assert_eq!(manifest.table_backups[1].backup_table, "contacts_backup");
        assert_eq!(db.row_count("contacts_backup"), Some(300));
    }

    #[tokio::test]
    async fn test_failed_table_writes_no_manifest() {
        let dir = tempdir().unwrap();
        let db = MemoryDatabase::new().with_table("opportunities", &["id"], 3);
        let log = EventLog::console_only();
        let manager = BackupManager::new(&db, &log, dir.path());

        let tables = vec![TableConfig::new("opportunities"), TableConfig::new("missing")];
        let err = manager.create_snapshot(&tables, Utc::now()).await.unwrap_err();

        assert!(matches!(err, BackupError::Snapshot { ref table, .. } if table == "missing"));
        assert!(list_manifests(dir.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_table_list_rejected() {
        let dir = tempdir().unwrap();
        let db = MemoryDatabase::new();
        let log = EventLog::console_only();
        let manager = BackupManager::new(&db, &log, dir.path());
        assert!(matches!(
            manager.create_snapshot(&[], Utc::now()).await,
            Err(BackupError::NoTables)
        ));
    }
}
