//! Backup manifests.
//!
//! A manifest lists the tables captured by one snapshot, in creation order.
//! Its file name embeds the creation time in a fixed-width form, so sorting
//! file names sorts manifests by age.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// Manifest file name prefix.
pub const MANIFEST_PREFIX: &str = "backup-manifest-";

/// Manifest file name suffix.
pub const MANIFEST_SUFFIX: &str = ".json";

/// Timestamp format embedded in manifest file names.
const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

/// One snapshotted table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableBackup {
    /// The live table.
    pub original_table: String,
    /// The sibling table holding snapshot rows.
    pub backup_table: String,
    /// Rows copied by this snapshot.
    pub record_count: u64,
}

/// Record of one snapshot. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    /// When the snapshot was taken; also the generation marker of its rows.
    pub timestamp: DateTime<Utc>,
    /// Tables in creation order.
    pub table_backups: Vec<TableBackup>,
}

impl BackupManifest {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            table_backups: Vec::new(),
        }
    }

    /// File name for this manifest.
    pub fn file_name(&self) -> String {
        format!(
            "{MANIFEST_PREFIX}{}{MANIFEST_SUFFIX}",
            self.timestamp.format(FILE_TIMESTAMP_FORMAT)
        )
    }

    /// Age of the manifest at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.timestamp
    }

    /// Read a manifest file.
    pub fn load(path: &Path) -> Result<Self, BackupError> {
        let bytes = fs::read(path).map_err(|source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| BackupError::CorruptManifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the manifest into `dir` atomically. Returns its path.
    ///
    /// The body goes to a hidden temp file first, so a reader never sees a
    /// partially written manifest under the canonical name.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, BackupError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| BackupError::Io { path, source }
        };
        fs::create_dir_all(dir).map_err(io_err(dir))?;

        let name = self.file_name();
        let path = dir.join(&name);
        let tmp = dir.join(format!(".{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(self)?;
        {
            let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&bytes).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(path)
    }
}

/// Whether `name` is a manifest file name.
pub fn is_manifest_name(name: &str) -> bool {
    name.starts_with(MANIFEST_PREFIX) && name.ends_with(MANIFEST_SUFFIX)
}

/// Creation time encoded in a manifest file name.
pub fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(MANIFEST_PREFIX)?.strip_suffix(MANIFEST_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, FILE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Manifest files in `dir`, newest first. A missing directory has none.
pub fn list_manifests(dir: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(BackupError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| BackupError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        if let Some(name) = entry.file_name().to_str() {
            if is_manifest_name(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// The newest manifest in `dir`.
pub fn find_latest(dir: &Path) -> Result<(PathBuf, BackupManifest), BackupError> {
    let path = list_manifests(dir)?
        .into_iter()
        .next()
        .ok_or_else(|| BackupError::NoManifest {
            dir: dir.to_path_buf(),
        })?;
    let manifest = BackupManifest::load(&path)?;
    Ok((path, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn manifest_at(secs: i64) -> BackupManifest {
        let mut manifest = BackupManifest::new(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap());
        manifest.table_backups.push(TableBackup {
            original_table: "opportunities".to_string(),
            backup_table: "opportunities_backup".to_string(),
            record_count: 150,
        });
        manifest
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(manifest_at(0)).unwrap();
        assert!(value["timestamp"].is_string());
        assert_eq!(value["tableBackups"][0]["originalTable"], "opportunities");
        assert_eq!(value["tableBackups"][0]["backupTable"], "opportunities_backup");
        assert_eq!(value["tableBackups"][0]["recordCount"], 150);
    }

    #[test]
    fn test_file_name_round_trips_timestamp() {
        let manifest = manifest_at(0);
        let name = manifest.file_name();
        assert!(is_manifest_name(&name));
        assert_eq!(timestamp_from_name(&name), Some(manifest.timestamp));
        assert_eq!(timestamp_from_name("backup-manifest-latest.json"), None);
    }

    #[test]
    fn test_find_latest_picks_newest() {
        let dir = tempdir().unwrap();
        let older = manifest_at(0);
        let newer = manifest_at(3600);
        newer.write(dir.path()).unwrap();
        older.write(dir.path()).unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();
        fs::write(dir.path().join(".backup-manifest-x.json.tmp"), "").unwrap();

        let listed = list_manifests(dir.path()).unwrap();
        assert_eq!(listed.len(), 2);

        let (path, latest) = find_latest(dir.path()).unwrap();
        assert_eq!(latest, newer);
        assert_eq!(path, dir.path().join(newer.file_name()));
    }

    #[test]
    fn test_no_manifest_is_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(find_latest(dir.path()), Err(BackupError::NoManifest { .. })));
        assert!(matches!(
            find_latest(&dir.path().join("missing")),
            Err(BackupError::NoManifest { .. })
        ));
    }

    #[test]
    fn test_corrupt_manifest() {
        let dir = tempdir().unwrap();
        let name = manifest_at(0).file_name();
        fs::write(dir.path().join(name), "{not json").unwrap();
        assert!(matches!(
            find_latest(dir.path()),
            Err(BackupError::CorruptManifest { .. })
        ));
    }
}
