//! Append-only event log.
//!
//! Each event is one line: `[ISO-timestamp] [LEVEL] message {json}`. The
//! payload is omitted when empty. Every event is mirrored to `tracing` so the
//! console shows the same stream.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::MigrationError;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    /// A failure that stops the run.
    Critical,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Format a single log line (without the trailing newline).
pub fn format_line(at: DateTime<Utc>, level: LogLevel, message: &str, payload: Option<&Value>) -> String {
    let ts = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    match payload {
        Some(p) if !is_empty_payload(p) => format!("[{ts}] [{level}] {message} {p}"),
        _ => format!("[{ts}] [{level}] {message}"),
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Append-only structured log sink, independent of the state file.
#[derive(Debug)]
pub struct EventLog {
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl EventLog {
    /// Open (or create) the log file for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        let path = path.into();
        let log_err = |source| MigrationError::Log {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(log_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(log_err)?;

        Ok(Self {
            path: Some(path),
            file: Mutex::new(Some(file)),
        })
    }

    /// A log that only forwards to `tracing`.
    pub fn console_only() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
        }
    }

    /// Path of the log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an event.
    ///
    /// A failed file write is reported through `tracing` and does not
    /// interrupt the caller; the log is diagnostic, the state file is the
    /// checkpoint.
    pub fn log(&self, level: LogLevel, message: &str, payload: Option<Value>) {
        let payload_ref = payload.as_ref();
        match level {
            LogLevel::Info => tracing::info!(payload = ?payload_ref, "{message}"),
            LogLevel::Warn => tracing::warn!(payload = ?payload_ref, "{message}"),
            LogLevel::Error => tracing::error!(payload = ?payload_ref, "{message}"),
            LogLevel::Critical => tracing::error!(critical = true, payload = ?payload_ref, "{message}"),
        }

        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            let line = format_line(Utc::now(), level, message, payload_ref);
            if let Err(e) = writeln!(file, "{line}") {
                tracing::error!(error = %e, path = ?self.path, "failed to write event log");
            }
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn info_with(&self, message: &str, payload: Value) {
        self.log(LogLevel::Info, message, Some(payload));
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn warn_with(&self, message: &str, payload: Value) {
        self.log(LogLevel::Warn, message, Some(payload));
    }

    pub fn error_with(&self, message: &str, payload: Value) {
        self.log(LogLevel::Error, message, Some(payload));
    }

    pub fn critical_with(&self, message: &str, payload: Value) {
        self.log(LogLevel::Critical, message, Some(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_format_line_with_payload() {
        let at = DateTime::parse_from_rfc3339("2026-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let line = format_line(at, LogLevel::Critical, "Phase failed", Some(&json!({"phaseId": "schema"})));
        assert_eq!(
            line,
            r#"[2026-05-01T12:00:00.000Z] [CRITICAL] Phase failed {"phaseId":"schema"}"#
        );
    }

    #[test]
    fn test_format_line_omits_empty_payload() {
        let at = Utc::now();
        let line = format_line(at, LogLevel::Info, "Starting", Some(&json!({})));
        assert!(line.ends_with("[INFO] Starting"));
        let line = format_line(at, LogLevel::Warn, "Careful", None);
        assert!(line.ends_with("[WARN] Careful"));
    }

    #[test]
    fn test_log_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("migration.log");

        let log = EventLog::open(&path).unwrap();
        log.info("first");
        log.warn_with("second", json!({"stderr": "deprecated flag"}));
        drop(log);

        let log = EventLog::open(&path).unwrap();
        log.error_with("third", json!({"error": "boom"}));
        drop(log);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].contains("[WARN] second {\"stderr\":\"deprecated flag\"}"));
        assert!(lines[2].contains("[ERROR] third"));
    }
}
