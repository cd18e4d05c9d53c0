//! Cutover Command-Line Interface
//!
//! Runs a phased migration, snapshots tables, and performs emergency
//! rollback within the configured window.

mod commands;
mod error;
mod formatter;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cutover_backup::RetentionPolicy;
use cutover_core::config::DEFAULT_CONFIG_FILE;
use cutover_core::CutoverConfig;
use error::CliError;
use formatter::OutputFormat;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Cutover Command-Line Interface
#[derive(Parser, Debug)]
#[command(name = "cutover")]
#[command(version, about = "Phased database migration with time-boxed rollback")]
pub struct Args {
    /// Run file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every pending phase in catalog order
    Run {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// Log SQL and skip scripts without executing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Restore the latest snapshot and revert schema changes
    Rollback {
        /// Skip the confirmation phrase
        #[arg(long)]
        force: bool,
    },

    /// Show phase progress, the latest snapshot and rollback eligibility
    Status {
        /// Output format
        #[arg(long, default_value = "text", value_enum)]
        format: OutputFormat,
    },

    /// Snapshot the configured tables and write a manifest
    Snapshot,

    /// Delete old backup manifests
    Prune {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// Number of newest manifests always kept
        #[arg(long, default_value_t = cutover_backup::prune::DEFAULT_KEEP_LATEST)]
        keep: usize,

        /// Minimum age in days before a manifest may be deleted
        #[arg(long, default_value_t = cutover_backup::prune::DEFAULT_MAX_AGE_DAYS)]
        max_age_days: i64,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cutover=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(next) = e.next_action() {
                eprintln!("Next: {}", next);
            }
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<i32, CliError> {
    debug!(config = %args.config.display(), "Loading run file");
    let config = CutoverConfig::load(&args.config)?;

    match args.command {
        Command::Run { force, dry_run } => commands::run(config, force, dry_run).await,
        Command::Rollback { force } => commands::rollback(config, force).await,
        Command::Status { format } => commands::status(config, format),
        Command::Snapshot => commands::snapshot(config).await,
        Command::Prune {
            force,
            keep,
            max_age_days,
        } => {
            let policy = RetentionPolicy::default()
                .with_keep_latest(keep)
                .with_max_age_days(max_age_days);
            commands::prune(config, policy, force)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_run() {
        let args = Args::parse_from(["cutover", "run", "--force", "--dry-run"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(args.command, Command::Run { force: true, dry_run: true }));
    }

    #[test]
    fn test_args_parse_prune_defaults() {
        let args = Args::parse_from(["cutover", "--config", "ops/cutover.toml", "prune"]);
        assert_eq!(args.config, PathBuf::from("ops/cutover.toml"));
        match args.command {
            Command::Prune {
                force,
                keep,
                max_age_days,
            } => {
                assert!(!force);
                assert_eq!(keep, 3);
                assert_eq!(max_age_days, 30);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_args_parse_status_json() {
        let args = Args::parse_from(["cutover", "status", "--format", "json"]);
        assert!(matches!(
            args.command,
            Command::Status {
                format: OutputFormat::Json
            }
        ));
    }
}
