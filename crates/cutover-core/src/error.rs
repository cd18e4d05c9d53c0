//! Error types for the migration orchestrator.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable {name}")]
    MissingEnv {
        /// Name of the variable.
        name: &'static str,
    },

    /// The run file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The run file is not valid TOML for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The run file parsed but describes an invalid catalog.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// The database URL could not be parsed.
    #[error("invalid database url: {0}")]
    DatabaseUrl(String),
}

/// State file errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the state file failed.
    #[error("state file {path}: {source}")]
    Io {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but is not valid JSON.
    #[error("state file {path} is corrupted: {source}")]
    Corrupted {
        /// Path of the state file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Run lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error(
        "another cutover process holds {path} (pid {holder_pid}, {operation}, since {acquired_at}); \
         remove the file only if that process is gone"
    )]
    Held {
        /// Path of the lock file.
        path: PathBuf,
        /// PID recorded by the holder.
        holder_pid: u32,
        /// Operation recorded by the holder.
        operation: String,
        /// When the holder acquired the lock.
        acquired_at: String,
    },

    /// The lock file exists but could not be interpreted.
    #[error("lock file {path} exists and is unreadable; remove it manually if no run is active")]
    Unreadable {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// I/O error while creating the lock file.
    #[error("lock file {path}: {source}")]
    Io {
        /// Path of the lock file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Driver error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The statement was rejected by the backend.
    #[error("statement rejected: {0}")]
    Rejected(String),

    /// The call did not complete before its deadline.
    #[error("database call timed out after {0:?}")]
    Timeout(Duration),

    /// An identifier cannot be used in SQL.
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    /// The referenced table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),
}

/// Errors raised while executing a single phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The script could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program path.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The script did not exit before its deadline and was killed.
    #[error("{program} timed out after {after:?}")]
    Timeout {
        /// Program path.
        program: PathBuf,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The script exited unsuccessfully.
    #[error("{program} exited with {}", .exit_code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    ExitStatus {
        /// Program path.
        program: PathBuf,
        /// Exit code, or `None` if terminated by a signal.
        exit_code: Option<i32>,
    },

    /// The SQL file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadSql {
        /// Path of the SQL file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A DDL statement failed, halting the phase.
    #[error("DDL statement failed ({statement}): {source}")]
    DdlFailed {
        /// Preview of the failing statement.
        statement: String,
        /// Underlying database error.
        #[source]
        source: DbError,
    },

    /// One or more non-DDL statements failed.
    #[error("SQL execution had {count} errors")]
    StatementErrors {
        /// Number of failed statements.
        count: usize,
    },
}

/// Errors detected before any mutation.
#[derive(Debug, Error)]
pub enum PrerequisiteError {
    /// Required SQL files are missing.
    #[error("required migration files missing: {}", display_paths(.files))]
    MissingFiles {
        /// Every missing file.
        files: Vec<PathBuf>,
    },

    /// The reachability check failed.
    #[error("database unreachable: {source}")]
    DatabaseUnreachable {
        /// Underlying database error.
        #[source]
        source: DbError,
    },
}

fn display_paths(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Top-level orchestrator errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State persistence error.
    #[error(transparent)]
    State(#[from] StateError),

    /// Run lock error.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Prerequisites not met; nothing was mutated.
    #[error("prerequisite check failed: {0}")]
    Prerequisite(#[from] PrerequisiteError),

    /// A critical phase failed and the run stopped.
    #[error("critical phase {phase_id} ({phase_name}) failed: {source}")]
    CriticalAbort {
        /// ID of the failed phase.
        phase_id: String,
        /// Display name of the failed phase.
        phase_name: String,
        /// The phase failure.
        #[source]
        source: PhaseError,
    },

    /// Reading operator input failed.
    #[error("failed to read confirmation: {0}")]
    Prompt(#[source] std::io::Error),

    /// Event log error.
    #[error("event log {path}: {source}")]
    Log {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Database error outside of a phase.
    #[error(transparent)]
    Database(#[from] DbError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_lists_every_path() {
        let err = PrerequisiteError::MissingFiles {
            files: vec![PathBuf::from("a.sql"), PathBuf::from("b.sql")],
        };
        assert_eq!(
            err.to_string(),
            "required migration files missing: a.sql, b.sql"
        );
    }

    #[test]
    fn test_exit_status_display() {
        let err = PhaseError::ExitStatus {
            program: PathBuf::from("clear-caches"),
            exit_code: Some(2),
        };
        assert_eq!(err.to_string(), "clear-caches exited with code 2");

        let err = PhaseError::ExitStatus {
            program: PathBuf::from("clear-caches"),
            exit_code: None,
        };
        assert_eq!(err.to_string(), "clear-caches exited with signal");
    }

    #[test]
    fn test_critical_abort_names_phase() {
        let err = MigrationError::CriticalAbort {
            phase_id: "schema".to_string(),
            phase_name: "Schema Changes".to_string(),
            source: PhaseError::StatementErrors { count: 3 },
        };
        let msg = err.to_string();
        assert!(msg.contains("schema"));
        assert!(msg.contains("3 errors"));
    }
}
