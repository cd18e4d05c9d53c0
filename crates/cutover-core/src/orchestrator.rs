//! Migration orchestrator - drives the phase catalog to completion.
//!
//! A run takes the run lock, loads the checkpoint, shows the plan, verifies
//! prerequisites, asks for confirmation and then executes every phase that is
//! not yet complete, in catalog order. Each transition is persisted before the
//! next phase starts, so an interrupted run resumes where it stopped.

use std::fmt;

use serde_json::json;

use crate::catalog::PhaseCatalog;
use crate::config::CutoverConfig;
use crate::confirm::ConfirmationGate;
use crate::db::Database;
use crate::error::MigrationError;
use crate::event_log::EventLog;
use crate::executor::{ExecutorConfig, PhaseExecutor};
use crate::lock::RunLock;
use crate::prereq::PrerequisiteChecker;
use crate::process::ProcessRunner;
use crate::state::{MigrationState, StateStore};

/// Lock operation name recorded by migration runs.
pub const MIGRATE_OPERATION: &str = "migrate";

/// Where the orchestrator is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    NotStarted,
    Verifying,
    AwaitingConfirmation,
    /// Executing the phase at this catalog index.
    Running(usize),
    /// A critical phase failed.
    Aborted,
    Completed,
    /// The operator declined; nothing was mutated.
    Cancelled,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::NotStarted => write!(f, "not_started"),
            OrchestratorState::Verifying => write!(f, "verifying"),
            OrchestratorState::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            OrchestratorState::Running(i) => write!(f, "running({i})"),
            OrchestratorState::Aborted => write!(f, "aborted"),
            OrchestratorState::Completed => write!(f, "completed"),
            OrchestratorState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal status of a run that did not abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every phase was visited without a critical failure.
    Completed,
    /// Every phase was already complete; nothing ran.
    AlreadyComplete,
    /// The operator declined at the confirmation gate.
    Cancelled,
    /// Phases were logged but nothing was executed.
    DryRun,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::AlreadyComplete => write!(f, "already_complete"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::DryRun => write!(f, "dry_run"),
        }
    }
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// Phases executed successfully in this run.
    pub executed: Vec<String>,
    /// Phases skipped because they were already complete.
    pub skipped: Vec<String>,
    /// Non-critical phases that failed in this run.
    pub failed_optional: Vec<String>,
    /// Completed phases after the run, in completion order.
    pub completed_phases: Vec<String>,
}

impl RunReport {
    fn new(status: RunStatus, state: &MigrationState) -> Self {
        Self {
            status,
            executed: Vec::new(),
            skipped: Vec::new(),
            failed_optional: Vec::new(),
            completed_phases: state.completed_ids().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Render the phase catalog against a checkpoint.
pub fn render_plan(catalog: &PhaseCatalog, state: &MigrationState) -> String {
    let done = catalog.iter().filter(|p| state.is_phase_complete(&p.id)).count();
    let mut out = format!("Migration plan ({} phases, {done} completed):\n", catalog.len());
    for (i, phase) in catalog.iter().enumerate() {
        let mark = if state.is_phase_complete(&phase.id) { "x" } else { " " };
        let tag = if phase.critical { "CRITICAL" } else { "OPTIONAL" };
        out.push_str(&format!(
            "  {:>2}. [{mark}] {} - {} [{tag}] ({})\n",
            i + 1,
            phase.id,
            phase.name,
            phase.action.kind()
        ));
        if !phase.description.is_empty() {
            out.push_str(&format!("         {}\n", phase.description));
        }
    }
    if let Some(current) = &state.current_phase {
        out.push_str(&format!("Interrupted during: {current}\n"));
    }
    out.push_str(&format!(
        "Errors recorded: {}, warnings recorded: {}",
        state.errors.len(),
        state.warnings.len()
    ));
    out
}

/// Drives a migration run.
pub struct Orchestrator<'a> {
    config: &'a CutoverConfig,
    db: &'a dyn Database,
    runner: &'a dyn ProcessRunner,
    log: &'a EventLog,
    state: OrchestratorState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a CutoverConfig, db: &'a dyn Database, runner: &'a dyn ProcessRunner, log: &'a EventLog) -> Self {
        Self {
            config,
            db,
            runner,
            log,
            state: OrchestratorState::NotStarted,
        }
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    fn transition(&mut self, next: OrchestratorState) {
        tracing::debug!(from = %self.state, to = %next, "orchestrator transition");
        self.state = next;
    }

    /// Run the catalog.
    ///
    /// A critical phase failure is returned as
    /// [`MigrationError::CriticalAbort`] after the failure has been recorded
    /// in the state file. A declined confirmation is not an error.
    pub async fn run(&mut self, gate: &mut ConfirmationGate) -> Result<RunReport, MigrationError> {
        let config = self.config;
        let _lock = RunLock::acquire(&config.paths.lock_file, MIGRATE_OPERATION)?;
        let mut store = StateStore::open(&config.paths.state_file)?;
        let catalog = &config.catalog;
        let dry_run = !config.execute;

        if catalog.iter().all(|p| store.is_phase_complete(&p.id)) {
            self.log.info("All phases already complete, nothing to do");
            self.transition(OrchestratorState::Completed);
            return Ok(RunReport::new(RunStatus::AlreadyComplete, store.state()));
        }

        self.log.info_with(
            "Migration run starting",
            json!({ "phases": catalog.len(), "dryRun": dry_run, "stateFile": store.path().display().to_string() }),
        );
        for line in render_plan(catalog, store.state()).lines() {
            self.log.info(line);
        }

        self.transition(OrchestratorState::Verifying);
        let prerequisites = PrerequisiteChecker::new(self.db, self.log)
            .verify(catalog, &config.database.check_table)
            .await?;

        if !dry_run {
            self.transition(OrchestratorState::AwaitingConfirmation);
            let proceed = gate
                .confirm("This will modify the database. Proceed with migration?")
                .map_err(MigrationError::Prompt)?;
            if !proceed {
                self.log.info("Migration cancelled by operator");
                self.transition(OrchestratorState::Cancelled);
                return Ok(RunReport::new(RunStatus::Cancelled, store.state()));
            }

            store.mark_started()?;
            for warning in prerequisites.warnings() {
                store.add_warning(warning)?;
            }
        }

        let executor = PhaseExecutor::new(
            self.db,
            self.runner,
            self.log,
            ExecutorConfig {
                script_timeout: config.timeouts.script(),
                execute: !dry_run,
            },
        );
        let mut report = RunReport::new(
            if dry_run { RunStatus::DryRun } else { RunStatus::Completed },
            store.state(),
        );

        for (index, phase) in catalog.iter().enumerate() {
            self.transition(OrchestratorState::Running(index));

            if store.is_phase_complete(&phase.id) {
                self.log.info_with("Skipping completed phase", json!({ "phase": phase.id }));
                report.skipped.push(phase.id.clone());
                continue;
            }

            self.log.info_with(
                "Executing phase",
                json!({ "phase": phase.id, "name": phase.name, "critical": phase.critical }),
            );
            if !dry_run {
                store.set_current_phase(&phase.id)?;
            }

            let outcome = executor.execute(phase).await;
            let Some(error) = outcome.error else {
                self.log.info_with(
                    "Phase completed",
                    json!({ "phase": phase.id, "durationMs": outcome.duration_ms, "detail": outcome.detail }),
                );
                if !dry_run {
                    store.mark_phase_complete(&phase.id)?;
                }
                report.executed.push(phase.id.clone());
                continue;
            };

            let message = format!("phase {} failed: {error}", phase.id);
            self.log.critical_with(
                "Phase failed",
                json!({
                    "phase": phase.id,
                    "critical": phase.critical,
                    "durationMs": outcome.duration_ms,
                    "error": error.to_string(),
                }),
            );
            if !dry_run {
                store.add_error(message.clone())?;
            }

            if phase.critical {
                self.transition(OrchestratorState::Aborted);
                return Err(MigrationError::CriticalAbort {
                    phase_id: phase.id.clone(),
                    phase_name: phase.name.clone(),
                    source: error,
                });
            }

            if !dry_run {
                store.add_warning(format!("optional {message}"))?;
            }
            report.failed_optional.push(phase.id.clone());
        }

        self.transition(OrchestratorState::Completed);
        report.completed_phases = store.state().completed_ids().into_iter().map(str::to_string).collect();
        self.log.info_with(
            "Migration run finished",
            json!({
                "status": report.status.to_string(),
                "executed": report.executed,
                "skipped": report.skipped,
                "failedOptional": report.failed_optional,
            }),
        );
        Ok(report)
    }
}
