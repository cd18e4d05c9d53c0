//! Phase executor - runs one phase and classifies the outcome.
//!
//! The executor never decides whether a failure stops the migration; that
//! belongs to the orchestrator, which knows whether the phase is critical.

use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::catalog::{PhaseAction, PhaseDescriptor};
use crate::db::Database;
use crate::error::PhaseError;
use crate::event_log::EventLog;
use crate::process::ProcessRunner;
use crate::sql;

/// Phase executor configuration.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Deadline for each script phase.
    pub script_timeout: Duration,
    /// When false, scripts are not spawned and SQL is only logged.
    pub execute: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            script_timeout: Duration::from_secs(crate::config::DEFAULT_SCRIPT_TIMEOUT_SECS),
            execute: true,
        }
    }
}

/// Result of executing one phase.
#[derive(Debug)]
pub struct PhaseOutcome {
    pub success: bool,
    pub duration_ms: u64,
    /// Human-readable summary.
    pub detail: String,
    /// The failure, when `success` is false.
    pub error: Option<PhaseError>,
}

impl PhaseOutcome {
    fn succeeded(started: Instant, detail: impl Into<String>) -> Self {
        Self {
            success: true,
            duration_ms: elapsed_ms(started),
            detail: detail.into(),
            error: None,
        }
    }

    fn failed(started: Instant, error: PhaseError) -> Self {
        Self {
            success: false,
            duration_ms: elapsed_ms(started),
            detail: error.to_string(),
            error: Some(error),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs script and SQL phases.
pub struct PhaseExecutor<'a> {
    db: &'a dyn Database,
    runner: &'a dyn ProcessRunner,
    log: &'a EventLog,
    config: ExecutorConfig,
}

impl<'a> PhaseExecutor<'a> {
    pub fn new(db: &'a dyn Database, runner: &'a dyn ProcessRunner, log: &'a EventLog, config: ExecutorConfig) -> Self {
        Self {
            db,
            runner,
            log,
            config,
        }
    }

    /// Execute a phase.
    pub async fn execute(&self, phase: &PhaseDescriptor) -> PhaseOutcome {
        let started = Instant::now();
        let result = match &phase.action {
            PhaseAction::Script { program, args } => self.run_script(phase, program, args).await,
            PhaseAction::Sql { path } => self.run_sql(phase, path).await,
        };
        match result {
            Ok(detail) => PhaseOutcome::succeeded(started, detail),
            Err(error) => PhaseOutcome::failed(started, error),
        }
    }

    async fn run_script(&self, phase: &PhaseDescriptor, program: &Path, args: &[String]) -> Result<String, PhaseError> {
        if !self.config.execute {
            self.log.info_with(
                "Dry run: script not executed",
                json!({ "phase": phase.id, "program": program.display().to_string(), "args": args }),
            );
            return Ok(format!("dry run: would run {}", program.display()));
        }

        self.log.info_with(
            "Running script",
            json!({ "phase": phase.id, "program": program.display().to_string(), "args": args }),
        );
        let result = self.runner.run(program, args, self.config.script_timeout).await?;

        let stdout = result.stdout.trim();
        if !stdout.is_empty() {
            self.log.info_with("Script output", json!({ "phase": phase.id, "stdout": stdout }));
        }
        let stderr = result.stderr.trim();
        if !stderr.is_empty() {
            self.log.warn_with("Script stderr", json!({ "phase": phase.id, "stderr": stderr }));
        }

        if !result.success() {
            return Err(PhaseError::ExitStatus {
                program: program.to_path_buf(),
                exit_code: result.exit_code,
            });
        }
        Ok(format!("{} exited cleanly", program.display()))
    }

    async fn run_sql(&self, phase: &PhaseDescriptor, path: &Path) -> Result<String, PhaseError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PhaseError::ReadSql {
                path: path.to_path_buf(),
                source,
            })?;
        let statements = sql::split_statements(&text);
        self.log.info_with(
            "Executing SQL file",
            json!({ "phase": phase.id, "file": path.display().to_string(), "statements": statements.len() }),
        );

        if !self.config.execute {
            for (i, statement) in statements.iter().enumerate() {
                self.log.info_with(
                    "Dry run: statement not executed",
                    json!({ "phase": phase.id, "index": i + 1, "ddl": sql::is_ddl(statement), "sql": sql::preview(statement) }),
                );
            }
            return Ok(format!("dry run: {} statements logged", statements.len()));
        }

        let mut errors = 0usize;
        for (i, statement) in statements.iter().enumerate() {
            let Err(source) = self.db.execute(statement).await else {
                continue;
            };
            let payload = json!({
                "phase": phase.id,
                "index": i + 1,
                "sql": sql::preview(statement),
                "error": source.to_string(),
            });
            if sql::is_ddl(statement) {
                self.log.error_with("DDL statement failed, halting phase", payload);
                return Err(PhaseError::DdlFailed {
                    statement: sql::preview(statement),
                    source,
                });
            }
            self.log.error_with("Statement failed, continuing", payload);
            errors += 1;
        }

        if errors > 0 {
            return Err(PhaseError::StatementErrors { count: errors });
        }
        Ok(format!("{} statements executed", statements.len()))
    }
}
