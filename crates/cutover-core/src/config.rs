//! Run configuration.
//!
//! A run file (`cutover.toml`) describes where state, logs and backups live,
//! the timeouts applied to blocking calls, the ordered phase catalog and the
//! tables to snapshot. Database credentials never live in the run file; they
//! come from the environment (see [`DatabaseSettings`]).
//!
//! ```toml
//! [paths]
//! sql_dir = "migrations/stage1"
//! structural_rollback = "migrations/rollback/stage1.sql"
//!
//! [database]
//! check_table = "companies"
//!
//! [[phases]]
//! id = "backup"
//! name = "Database Backup"
//! script = "backup.sh"
//!
//! [[phases]]
//! id = "schema"
//! name = "Schema Changes"
//! sql = "001_foundation.sql"
//!
//! [[tables]]
//! name = "opportunities"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::catalog::{PhaseAction, PhaseCatalog, PhaseDescriptor};
use crate::error::ConfigError;

/// Default run file name.
pub const DEFAULT_CONFIG_FILE: &str = "cutover.toml";

/// Environment variable holding the database URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Environment variable holding the database password.
pub const DATABASE_PASSWORD_ENV: &str = "DATABASE_PASSWORD";

/// Default timeout for establishing a connection, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a single SQL statement, in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 300;

/// Default timeout for a script phase, in seconds.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 1800;

/// Default rollback eligibility window, in hours.
pub const DEFAULT_ROLLBACK_WINDOW_HOURS: i64 = 48;

/// Filesystem locations used by a run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Checkpoint document.
    pub state_file: PathBuf,
    /// Append-only event log.
    pub log_file: PathBuf,
    /// Run lock shared by migration and rollback.
    pub lock_file: PathBuf,
    /// Directory holding backup manifests.
    pub backup_dir: PathBuf,
    /// Base directory for script phases.
    pub scripts_dir: PathBuf,
    /// Base directory for SQL phases.
    pub sql_dir: PathBuf,
    /// DDL script applied by the structural rollback step.
    pub structural_rollback: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("logs/migration-state.json"),
            log_file: PathBuf::from("logs/migration.log"),
            lock_file: PathBuf::from("logs/cutover.lock"),
            backup_dir: PathBuf::from("backups"),
            scripts_dir: PathBuf::from("scripts"),
            sql_dir: PathBuf::from("migrations"),
            structural_rollback: None,
        }
    }
}

impl PathsConfig {
    /// Place every path under `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        Self::default().resolve(root.as_ref())
    }

    fn resolve(self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        Self {
            state_file: join(self.state_file),
            log_file: join(self.log_file),
            lock_file: join(self.lock_file),
            backup_dir: join(self.backup_dir),
            scripts_dir: join(self.scripts_dir),
            sql_dir: join(self.sql_dir),
            structural_rollback: self.structural_rollback.map(join),
        }
    }
}

/// Database settings that are not secrets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Table read by the reachability check.
    pub check_table: String,
    /// Maximum pool connections. One keeps session state coherent across statements.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            check_table: "companies".to_string(),
            max_connections: 1,
        }
    }
}

/// Deadlines for blocking calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Connection establishment.
    pub connect_secs: u64,
    /// Each SQL statement or DB round-trip.
    pub statement_secs: u64,
    /// Each script phase, from spawn to exit.
    pub script_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            statement_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
            script_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn statement(&self) -> Duration {
        Duration::from_secs(self.statement_secs)
    }

    pub fn script(&self) -> Duration {
        Duration::from_secs(self.script_secs)
    }
}

/// Rollback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollbackConfig {
    /// Hours after manifest creation during which rollback is permitted.
    pub window_hours: i64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            window_hours: DEFAULT_ROLLBACK_WINDOW_HOURS,
        }
    }
}

impl RollbackConfig {
    /// The window as a signed duration.
    pub fn window(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::hours(self.window_hours)
    }
}

/// A table covered by snapshots and rollback.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Table name.
    pub name: String,
    /// Restorable columns. When absent, columns are introspected at restore time.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: None,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PhaseSpec {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_critical")]
    critical: bool,
    #[serde(default)]
    script: Option<PathBuf>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    sql: Option<PathBuf>,
}

fn default_critical() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    paths: PathsConfig,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    timeouts: TimeoutConfig,
    #[serde(default)]
    rollback: RollbackConfig,
    #[serde(default)]
    phases: Vec<PhaseSpec>,
    #[serde(default)]
    tables: Vec<TableConfig>,
}

/// Fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct CutoverConfig {
    /// Resolved filesystem locations.
    pub paths: PathsConfig,
    /// Non-secret database settings.
    pub database: DatabaseConfig,
    /// Deadlines for blocking calls.
    pub timeouts: TimeoutConfig,
    /// Rollback policy.
    pub rollback: RollbackConfig,
    /// Ordered phase catalog.
    pub catalog: PhaseCatalog,
    /// Tables to snapshot, in creation order.
    pub tables: Vec<TableConfig>,
    /// Run statements and scripts for real. When false, SQL is split and logged only.
    pub execute: bool,
}

impl CutoverConfig {
    /// Create a configuration with default settings rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            paths: PathsConfig::under(root),
            database: DatabaseConfig::default(),
            timeouts: TimeoutConfig::default(),
            rollback: RollbackConfig::default(),
            catalog: PhaseCatalog::default(),
            tables: Vec::new(),
            execute: true,
        }
    }

    /// Load a run file. Relative paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&text, base)
    }

    /// Parse a run file body, resolving relative paths against `base`.
    pub fn from_toml_str(text: &str, base: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        let paths = raw.paths.resolve(base.as_ref());

        let phases = raw
            .phases
            .into_iter()
            .map(|spec| phase_from_spec(spec, &paths))
            .collect::<Result<Vec<_>, _>>()?;

        for table in &raw.tables {
            if table.name.trim().is_empty() {
                return Err(ConfigError::Invalid("table with an empty name".to_string()));
            }
        }

        Ok(Self {
            paths,
            database: raw.database,
            timeouts: raw.timeouts,
            rollback: raw.rollback,
            catalog: PhaseCatalog::new(phases)?,
            tables: raw.tables,
            execute: true,
        })
    }

    /// Replace the phase catalog.
    pub fn with_catalog(mut self, catalog: PhaseCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the snapshot table list.
    pub fn with_tables(mut self, tables: Vec<TableConfig>) -> Self {
        self.tables = tables;
        self
    }

    /// Set the reachability check table.
    pub fn with_check_table(mut self, table: impl Into<String>) -> Self {
        self.database.check_table = table.into();
        self
    }

    /// Set the structural rollback script.
    pub fn with_structural_rollback(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.structural_rollback = Some(path.into());
        self
    }

    /// Log SQL without executing it and skip scripts.
    pub fn dry_run(mut self) -> Self {
        self.execute = false;
        self
    }

    /// Typed column metadata for a table, if configured.
    pub fn table_columns(&self, table: &str) -> Option<&[String]> {
        self.tables
            .iter()
            .find(|t| t.name == table)
            .and_then(|t| t.columns.as_deref())
    }
}

fn phase_from_spec(spec: PhaseSpec, paths: &PathsConfig) -> Result<PhaseDescriptor, ConfigError> {
    let join = |base: &Path, p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

    let action = match (spec.script, spec.sql) {
        (Some(program), None) => PhaseAction::Script {
            program: join(&paths.scripts_dir, program),
            args: spec.args,
        },
        (None, Some(path)) => {
            if !spec.args.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "phase {:?}: args are only valid for script phases",
                    spec.id
                )));
            }
            PhaseAction::Sql {
                path: join(&paths.sql_dir, path),
            }
        }
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(format!(
                "phase {:?} names both a script and a sql file",
                spec.id
            )))
        }
        (None, None) => {
            return Err(ConfigError::Invalid(format!(
                "phase {:?} names neither a script nor a sql file",
                spec.id
            )))
        }
    };

    Ok(PhaseDescriptor {
        id: spec.id,
        name: spec.name,
        description: spec.description,
        critical: spec.critical,
        action,
    })
}

/// Database connection settings sourced from the environment.
#[derive(Clone)]
pub struct DatabaseSettings {
    url: String,
    password: String,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("url", &self.url)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DatabaseSettings {
    /// Read [`DATABASE_URL_ENV`] and [`DATABASE_PASSWORD_ENV`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingEnv { name })
        };
        Ok(Self {
            url: fetch(DATABASE_URL_ENV)?,
            password: fetch(DATABASE_PASSWORD_ENV)?,
        })
    }

    /// Connection options with the password applied.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let options = PgConnectOptions::from_str(&self.url)
            .map_err(|e| ConfigError::DatabaseUrl(e.to_string()))?;
        Ok(options.password(&self.password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[paths]
sql_dir = "sql"
structural_rollback = "/opt/rollback/stage1.sql"

[database]
check_table = "accounts"

[timeouts]
script_secs = 60

[[phases]]
id = "backup"
name = "Database Backup"
script = "backup.sh"
args = ["--full"]

[[phases]]
id = "schema"
name = "Schema Changes"
sql = "001_schema.sql"

[[phases]]
id = "reindex"
name = "Rebuild Search Indexes"
critical = false
script = "reindex.sh"

[[tables]]
name = "opportunities"

[[tables]]
name = "contacts"
columns = ["id", "name"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = CutoverConfig::from_toml_str(SAMPLE, "/srv/crm").unwrap();

        assert_eq!(config.catalog.len(), 3);
        assert_eq!(
            config.catalog.get("backup").unwrap().action,
            PhaseAction::Script {
                program: PathBuf::from("/srv/crm/scripts/backup.sh"),
                args: vec!["--full".to_string()],
            }
        );
        assert_eq!(
            config.catalog.get("schema").unwrap().action,
            PhaseAction::Sql {
                path: PathBuf::from("/srv/crm/sql/001_schema.sql"),
            }
        );
        assert!(!config.catalog.get("reindex").unwrap().critical);

        assert_eq!(config.database.check_table, "accounts");
        assert_eq!(config.timeouts.script(), Duration::from_secs(60));
        assert_eq!(
            config.timeouts.statement(),
            Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS)
        );
        assert_eq!(
            config.paths.state_file,
            PathBuf::from("/srv/crm/logs/migration-state.json")
        );
        assert_eq!(
            config.paths.structural_rollback,
            Some(PathBuf::from("/opt/rollback/stage1.sql"))
        );
        assert_eq!(config.table_columns("contacts"), Some(&["id".to_string(), "name".to_string()][..]));
        assert_eq!(config.table_columns("opportunities"), None);
        assert_eq!(config.rollback.window(), chrono::TimeDelta::hours(48));
    }

    #[test]
    fn test_phase_with_both_actions_rejected() {
        let text = r#"
[[phases]]
id = "bad"
name = "Bad"
script = "a.sh"
sql = "a.sql"
"#;
        let err = CutoverConfig::from_toml_str(text, ".").unwrap_err();
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn test_phase_without_action_rejected() {
        let text = r#"
[[phases]]
id = "bad"
name = "Bad"
"#;
        let err = CutoverConfig::from_toml_str(text, ".").unwrap_err();
        assert!(err.to_string().contains("neither"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = r#"
[paths]
stat_file = "typo.json"
"#;
        assert!(matches!(
            CutoverConfig::from_toml_str(text, "."),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_database_settings_require_both_variables() {
        let err = DatabaseSettings::from_lookup(|name| {
            (name == DATABASE_URL_ENV).then(|| "postgres://localhost/crm".to_string())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnv { name } if name == DATABASE_PASSWORD_ENV
        ));

        let err = DatabaseSettings::from_lookup(|_| Some("  ".to_string())).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnv { name } if name == DATABASE_URL_ENV
        ));
    }

    #[test]
    fn test_database_settings_connect_options() {
        let settings = DatabaseSettings::from_lookup(|name| match name {
            DATABASE_URL_ENV => Some("postgres://migrator@db.internal:5432/crm".to_string()),
            DATABASE_PASSWORD_ENV => Some("s3cret".to_string()),
            _ => None,
        })
        .unwrap();

        let options = settings.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_database(), Some("crm"));
        assert!(!format!("{settings:?}").contains("s3cret"));
    }
}
