//! Subcommand handlers. Each returns the process exit code.

use chrono::Utc;
use cutover_backup::{apply_prune, plan_prune, BackupManager, RetentionPolicy, RollbackEngine};
use cutover_core::{
    ConfirmationGate, CutoverConfig, DatabaseSettings, EventLog, Orchestrator, PgDatabase, RunLock, StateStore,
    TokioProcessRunner,
};

use tracing::debug;

use crate::error::CliError;
use crate::formatter::{format_prune_plan, format_rollback_report, format_run_report, OutputFormat, StatusView};

const SNAPSHOT_OPERATION: &str = "snapshot";
const PRUNE_OPERATION: &str = "prune";

fn gate(force: bool) -> ConfirmationGate {
    if force {
        ConfirmationGate::forced()
    } else {
        ConfirmationGate::stdio()
    }
}

/// Build a lazy pool. Nothing connects until the first query, so
/// reachability is reported by whichever step queries first.
fn connect(config: &CutoverConfig, settings: &DatabaseSettings) -> Result<PgDatabase, CliError> {
    let options = settings.connect_options()?;
    debug!(max_connections = config.database.max_connections, "Creating database pool");
    Ok(PgDatabase::connect_lazy(options, &config.database, &config.timeouts))
}

/// Run the phase catalog.
pub async fn run(config: CutoverConfig, force: bool, dry_run: bool) -> Result<i32, CliError> {
    let settings = DatabaseSettings::from_env()?;
    run_with(config, &settings, force, dry_run).await
}

async fn run_with(config: CutoverConfig, settings: &DatabaseSettings, force: bool, dry_run: bool) -> Result<i32, CliError> {
    let config = if dry_run { config.dry_run() } else { config };

    let state = StateStore::load(&config.paths.state_file)?;
    if config.catalog.iter().all(|p| state.is_phase_complete(&p.id)) {
        println!("All phases already complete. Nothing to do.");
        return Ok(0);
    }

    let log = EventLog::open(&config.paths.log_file)?;
    let db = connect(&config, settings)?;
    let runner = TokioProcessRunner;
    let mut gate = gate(force);

    let report = Orchestrator::new(&config, &db, &runner, &log).run(&mut gate).await?;
    println!("{}", format_run_report(&report, config.rollback.window_hours));
    Ok(0)
}

/// Restore the latest snapshot.
pub async fn rollback(config: CutoverConfig, force: bool) -> Result<i32, CliError> {
    let settings = DatabaseSettings::from_env()?;
    rollback_with(config, &settings, force).await
}

async fn rollback_with(config: CutoverConfig, settings: &DatabaseSettings, force: bool) -> Result<i32, CliError> {
    let log = EventLog::open(&config.paths.log_file)?;
    let db = connect(&config, settings)?;
    let mut gate = gate(force);

    let report = RollbackEngine::new(&config, &db, &log).run(&mut gate).await?;
    println!("{}", format_rollback_report(&report));
    Ok(report.exit_code())
}

/// Show progress, the latest snapshot and rollback eligibility.
pub fn status(config: CutoverConfig, format: OutputFormat) -> Result<i32, CliError> {
    let state = StateStore::load(&config.paths.state_file)?;
    let view = StatusView::collect(&config, state, Utc::now())?;
    println!("{}", view.render(format)?);
    Ok(0)
}

/// Snapshot the configured tables and write a manifest.
pub async fn snapshot(config: CutoverConfig) -> Result<i32, CliError> {
    let settings = DatabaseSettings::from_env()?;
    let _lock = RunLock::acquire(&config.paths.lock_file, SNAPSHOT_OPERATION)?;
    let log = EventLog::open(&config.paths.log_file)?;
    let db = connect(&config, &settings)?;

    let manager = BackupManager::new(&db, &log, &config.paths.backup_dir);
    let (path, manifest) = manager.create_snapshot(&config.tables, Utc::now()).await?;

    println!(
        "Snapshot written: {} ({} table(s))",
        path.display(),
        manifest.table_backups.len()
    );
    println!(
        "Next: run `cutover run`. Rollback stays available for {} hours from now.",
        config.rollback.window_hours
    );
    Ok(0)
}

/// Delete old manifests.
pub fn prune(config: CutoverConfig, policy: RetentionPolicy, force: bool) -> Result<i32, CliError> {
    let _lock = RunLock::acquire(&config.paths.lock_file, PRUNE_OPERATION)?;
    let plan = plan_prune(&config.paths.backup_dir, policy, Utc::now())?;
    println!("{}", format_prune_plan(&plan).trim_end());
    if plan.delete.is_empty() {
        return Ok(0);
    }

    let mut gate = gate(force);
    if !gate.confirm("Delete these manifests?").map_err(CliError::Prompt)? {
        println!("Prune cancelled. Nothing was deleted.");
        return Ok(0);
    }

    let log = EventLog::open(&config.paths.log_file)?;
    let removed = apply_prune(&plan, &log)?;
    println!("Deleted {} manifest(s).", removed.len());
    Ok(0)
}
