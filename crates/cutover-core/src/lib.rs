//! Cutover Core - Phased migration orchestration with durable checkpoints.
//!
//! This crate runs an ordered catalog of script and SQL phases against a
//! PostgreSQL database, checkpointing after every transition so an interrupted
//! run resumes where it stopped.

pub mod catalog;
pub mod config;
pub mod confirm;
pub mod db;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod lock;
pub mod orchestrator;
pub mod prereq;
pub mod process;
pub mod sql;
pub mod state;

pub use catalog::{PhaseAction, PhaseCatalog, PhaseDescriptor};
pub use config::{
    CutoverConfig, DatabaseConfig, DatabaseSettings, PathsConfig, RollbackConfig, TableConfig, TimeoutConfig,
};
pub use confirm::ConfirmationGate;
pub use db::{Database, Ident, PgDatabase};
pub use error::{ConfigError, DbError, LockError, MigrationError, PhaseError, PrerequisiteError, StateError};
pub use event_log::{EventLog, LogLevel};
pub use executor::{ExecutorConfig, PhaseExecutor, PhaseOutcome};
pub use lock::{LockInfo, RunLock};
pub use orchestrator::{render_plan, Orchestrator, OrchestratorState, RunReport, RunStatus};
pub use prereq::{PrerequisiteChecker, PrerequisiteReport};
pub use process::{ProcessResult, ProcessRunner, TokioProcessRunner};
pub use state::{MigrationState, RollbackRecord, StateStore};

// Test doubles
#[cfg(any(test, feature = "test-util"))]
pub use db::MemoryDatabase;
#[cfg(any(test, feature = "test-util"))]
pub use process::{ScriptedOutcome, ScriptedRunner};
