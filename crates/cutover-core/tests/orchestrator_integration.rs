//! Integration tests for the migration orchestrator.

use std::fs;
use std::io::Cursor;

use cutover_core::error::{LockError, MigrationError, PhaseError, PrerequisiteError};
use cutover_core::{
    ConfirmationGate, CutoverConfig, EventLog, MemoryDatabase, Orchestrator, PhaseCatalog, PhaseDescriptor,
    RunLock, RunStatus, ScriptedRunner, StateStore,
};

struct TestContext {
    config: CutoverConfig,
    log: EventLog,
    dir: tempfile::TempDir,
}

impl TestContext {
    /// The five-phase catalog: backup, validate, schema, cache_clear, reindex (optional).
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        let sql = dir.path().join("migrations");
        fs::create_dir_all(&scripts).unwrap();
        fs::create_dir_all(&sql).unwrap();
        for script in ["backup.sh", "validate.sh", "cache_clear.sh", "reindex.sh"] {
            fs::write(scripts.join(script), "#!/bin/sh\n").unwrap();
        }
        fs::write(
            sql.join("001_schema.sql"),
            "-- stage one\nCREATE TABLE deals (id int);\nUPDATE companies SET tier = 'a';\n",
        )
        .unwrap();

        let catalog = PhaseCatalog::new(vec![
            PhaseDescriptor::script("backup", "Database Backup", scripts.join("backup.sh")),
            PhaseDescriptor::script("validate", "Pre-migration Validation", scripts.join("validate.sh")),
            PhaseDescriptor::sql("schema", "Schema Changes", sql.join("001_schema.sql")),
            PhaseDescriptor::script("cache_clear", "Clear Caches", scripts.join("cache_clear.sh")),
            PhaseDescriptor::script("reindex", "Rebuild Search Indexes", scripts.join("reindex.sh")).optional(),
        ])
        .unwrap();

        let config = CutoverConfig::new(dir.path()).with_catalog(catalog);
        let log = EventLog::open(&config.paths.log_file).unwrap();
        Self { config, log, dir }
    }

    fn db() -> MemoryDatabase {
        MemoryDatabase::new().with_table("companies", &["id", "tier"], 5)
    }

    fn completed(&self) -> Vec<String> {
        StateStore::load(&self.config.paths.state_file)
            .unwrap()
            .completed_ids()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    async fn run(&self, db: &MemoryDatabase, runner: &ScriptedRunner) -> Result<cutover_core::RunReport, MigrationError> {
        let mut gate = ConfirmationGate::forced();
        Orchestrator::new(&self.config, db, runner, &self.log).run(&mut gate).await
    }
}

#[tokio::test]
async fn test_critical_failure_halts_run() {
    let ctx = TestContext::new();
    let db = TestContext::db().fail_statements_containing("CREATE TABLE deals");
    let runner = ScriptedRunner::new();

    let err = ctx.run(&db, &runner).await.unwrap_err();
    match err {
        MigrationError::CriticalAbort { phase_id, source, .. } => {
            assert_eq!(phase_id, "schema");
            assert!(matches!(source, PhaseError::DdlFailed { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(ctx.completed(), vec!["backup", "validate"]);
    assert_eq!(runner.called_names(), vec!["backup.sh", "validate.sh"]);

    let state = StateStore::load(&ctx.config.paths.state_file).unwrap();
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].phase.as_deref(), Some("schema"));
    assert_eq!(state.current_phase.as_deref(), Some("schema"));

    let log = fs::read_to_string(&ctx.config.paths.log_file).unwrap();
    assert!(log.contains("[CRITICAL] Phase failed"));
    assert!(!ctx.config.paths.lock_file.exists());
}

#[tokio::test]
async fn test_resume_after_abort_skips_completed_phases() {
    let ctx = TestContext::new();
    let failing = TestContext::db().fail_statements_containing("CREATE TABLE deals");
    ctx.run(&failing, &ScriptedRunner::new()).await.unwrap_err();

    let db = TestContext::db();
    let runner = ScriptedRunner::new();
    let report = ctx.run(&db, &runner).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.skipped, vec!["backup", "validate"]);
    assert_eq!(report.executed, vec!["schema", "cache_clear", "reindex"]);
    assert_eq!(runner.called_names(), vec!["cache_clear.sh", "reindex.sh"]);
    assert_eq!(
        ctx.completed(),
        vec!["backup", "validate", "schema", "cache_clear", "reindex"]
    );
}

#[tokio::test]
async fn test_run_after_rollback_executes_every_phase_again() {
    let ctx = TestContext::new();
    let db = TestContext::db();
    ctx.run(&db, &ScriptedRunner::new()).await.unwrap();

    let mut store = StateStore::open(&ctx.config.paths.state_file).unwrap();
    store.record_rollback(chrono::Utc::now(), "succeeded").unwrap();
    assert!(ctx.completed().is_empty());

    let runner = ScriptedRunner::new();
    let report = ctx.run(&db, &runner).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.skipped.is_empty());
    assert_eq!(report.executed.len(), 5);
    assert_eq!(
        ctx.completed(),
        vec!["backup", "validate", "schema", "cache_clear", "reindex"]
    );

    let state = StateStore::load(&ctx.config.paths.state_file).unwrap();
    assert_eq!(state.completed_phases.len(), 10);
    assert_eq!(state.rollbacks.len(), 1);
}

#[tokio::test]
async fn test_second_run_executes_nothing() {
    let ctx = TestContext::new();
    let db = TestContext::db();
    let runner = ScriptedRunner::new();

    let first = ctx.run(&db, &runner).await.unwrap();
    assert_eq!(first.status, RunStatus::Completed);
    let after_first = ctx.completed();
    let statements = db.executed().len();

    let second = ctx.run(&db, &runner).await.unwrap();
    assert_eq!(second.status, RunStatus::AlreadyComplete);
    assert_eq!(ctx.completed(), after_first);
    assert_eq!(runner.calls().len(), 4);
    assert_eq!(db.executed().len(), statements);
}

#[tokio::test]
async fn test_optional_failure_continues() {
    let mut ctx = TestContext::new();
    let notify = ctx.dir.path().join("scripts").join("notify.sh");
    fs::write(&notify, "#!/bin/sh\n").unwrap();
    let mut phases = ctx.config.catalog.phases().to_vec();
    phases.push(PhaseDescriptor::script("notify", "Notify Users", notify));
    ctx.config.catalog = PhaseCatalog::new(phases).unwrap();

    let db = TestContext::db();
    let runner = ScriptedRunner::new().fail("reindex.sh", 1);
    let report = ctx.run(&db, &runner).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.failed_optional, vec!["reindex"]);
    assert_eq!(runner.called_names().last().map(String::as_str), Some("notify.sh"));
    assert!(!ctx.completed().contains(&"reindex".to_string()));
    assert!(ctx.completed().contains(&"notify".to_string()));

    let state = StateStore::load(&ctx.config.paths.state_file).unwrap();
    assert_eq!(state.warnings.len(), 1);
    assert!(state.warnings[0].warning.contains("reindex"));
}

#[tokio::test]
async fn test_non_ddl_statement_errors_fail_critical_phase() {
    let ctx = TestContext::new();
    let db = TestContext::db().fail_statements_containing("UPDATE companies");
    let runner = ScriptedRunner::new();

    let err = ctx.run(&db, &runner).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::CriticalAbort {
            source: PhaseError::StatementErrors { count: 1 },
            ..
        }
    ));
    // The DDL before the failing statement was still applied.
    assert_eq!(db.executed(), vec!["CREATE TABLE deals (id int)"]);
}

#[tokio::test]
async fn test_operator_decline_mutates_nothing() {
    let ctx = TestContext::new();
    let db = TestContext::db();
    let runner = ScriptedRunner::new();
    let mut gate = ConfirmationGate::new(Cursor::new("no\n"), std::io::sink());

    let report = Orchestrator::new(&ctx.config, &db, &runner, &ctx.log)
        .run(&mut gate)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(runner.calls().is_empty());
    assert!(db.executed().is_empty());
    assert!(!ctx.config.paths.state_file.exists());
}

#[tokio::test]
async fn test_missing_sql_file_blocks_run() {
    let ctx = TestContext::new();
    fs::remove_file(ctx.dir.path().join("migrations").join("001_schema.sql")).unwrap();
    let db = TestContext::db();
    let runner = ScriptedRunner::new();

    let err = ctx.run(&db, &runner).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Prerequisite(PrerequisiteError::MissingFiles { ref files }) if files.len() == 1
    ));
    assert!(runner.calls().is_empty());
    assert!(!ctx.config.paths.state_file.exists());
}

#[tokio::test]
async fn test_unreachable_database_blocks_run() {
    let ctx = TestContext::new();
    let db = TestContext::db().unreachable();
    let runner = ScriptedRunner::new();

    let err = ctx.run(&db, &runner).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Prerequisite(PrerequisiteError::DatabaseUnreachable { .. })
    ));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_held_lock_rejects_run() {
    let ctx = TestContext::new();
    let _held = RunLock::acquire(&ctx.config.paths.lock_file, "rollback").unwrap();
    let db = TestContext::db();
    let runner = ScriptedRunner::new();

    let err = ctx.run(&db, &runner).await.unwrap_err();
    assert!(matches!(err, MigrationError::Lock(LockError::Held { ref operation, .. }) if operation == "rollback"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_dry_run_leaves_no_trace() {
    let mut ctx = TestContext::new();
    ctx.config = ctx.config.clone().dry_run();
    let db = TestContext::db();
    let runner = ScriptedRunner::new();

    let report = ctx.run(&db, &runner).await.unwrap();
    assert_eq!(report.status, RunStatus::DryRun);
    assert_eq!(report.executed.len(), 5);
    assert!(runner.calls().is_empty());
    assert!(db.executed().is_empty());
    assert!(!ctx.config.paths.state_file.exists());
}
