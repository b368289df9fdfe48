//! dirshift - move application data to another volume without breaking paths
//!
//! Folders are copied to the target volume and replaced by a directory link, so
//! applications keep finding their data at the old location.

mod display;
mod history;
mod json_output;
mod plan;
mod progress;
mod scan;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use console::style;
use dirshift_config::loader::ENV_PREFIX;
use dirshift_config::{Config, ConfigBuilder, ConfigLoader, LoggingConfig};
use dirshift_engine::{CancellationRegistry, Orchestrator};
use dirshift_types::{BatchSummary, MigrationConfig, MigrationResult};
use history::{HistoryRecord, Operation, StateDir};
use json_output::{BatchOutputJson, OperationMetadata};
use plan::Plan;
use progress::BatchProgress;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// dirshift - move application data to another volume without breaking paths
#[derive(Parser)]
#[command(
    name = "dirshift",
    version = env!("CARGO_PKG_VERSION"),
    about = "Move application folders to another volume and leave a link behind",
    long_about = "dirshift copies application data folders to another volume, verifies the copy,\n\
                  and replaces the original folder with a directory junction (Windows) or\n\
                  symbolic link (Unix) so applications keep working unchanged."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List mounted volumes
    Drives {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List the subdirectories of a folder as migration candidates
    Folders {
        /// Folder to scan
        root: PathBuf,
        /// Target root to record in the JSON plan
        #[arg(short, long)]
        target: Option<PathBuf>,
        /// Print a plan usable with `migrate --plan`
        #[arg(long)]
        json: bool,
    },
    /// Move folders to another volume
    Migrate(MigrateArgs),
    /// Cancel a job of a running migration
    Cancel {
        /// Job id (or unique prefix)
        id: String,
    },
    /// Restore a migrated or failed job to its original location
    Rollback {
        /// Job id (or unique prefix) from the history
        id: String,
        /// Print JSON output
        #[arg(long)]
        json: bool,
    },
    /// Show recorded migrations and rollbacks
    History {
        /// Only show the most recent entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Print JSON output
        #[arg(long)]
        json: bool,
    },
    /// Show configuration
    Config {
        /// Show the built-in defaults instead of the effective configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(Args)]
struct MigrateArgs {
    /// Folders to migrate
    #[arg(required_unless_present = "plan", conflicts_with = "plan")]
    sources: Vec<PathBuf>,
    /// Directory on the target volume receiving the folders
    #[arg(short, long)]
    target: Option<PathBuf>,
    /// Plan file produced by `folders --json`
    #[arg(short, long)]
    plan: Option<PathBuf>,
    /// Replace existing target directories
    #[arg(long)]
    overwrite: bool,
    /// Delete the original folder instead of keeping it as a backup
    #[arg(long)]
    no_backup: bool,
    /// Skip verification of the copy
    #[arg(long)]
    no_verify: bool,
    /// Run jobs concurrently
    #[arg(long)]
    parallel: bool,
    /// Upper bound on concurrent jobs (0 = unbounded)
    #[arg(long)]
    max_parallel: Option<usize>,
    /// Print JSON output
    #[arg(long)]
    json: bool,
}

impl MigrateArgs {
    /// Apply command line flags on top of the configured defaults
    fn migration_config(&self, base: MigrationConfig) -> MigrationConfig {
        MigrationConfig {
            overwrite_existing: base.overwrite_existing || self.overwrite,
            create_backup: base.create_backup && !self.no_backup,
            verify_after_move: base.verify_after_move && !self.no_verify,
            parallel_execution: base.parallel_execution || self.parallel,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.debug, cli.quiet, cli.verbose, &config.logging)?;

    info!("dirshift v{} starting", env!("CARGO_PKG_VERSION"));
    let state = StateDir::new(config.state.resolve_state_dir());

    match cli.command {
        Commands::Drives { json } => drives_command(json),
        Commands::Folders { root, target, json } => folders_command(&root, target, json),
        Commands::Migrate(args) => migrate_command(&config, &state, args, cli.quiet).await,
        Commands::Cancel { id } => cancel_command(&state, &id),
        Commands::Rollback { id, json } => {
            rollback_command(&config, &state, &id, json, cli.quiet).await
        }
        Commands::History { limit, json } => history_command(&state, limit, json),
        Commands::Config { default } => config_command(&config, default),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file '{}' not found", path.display());
            }
            ConfigBuilder::new()
                .add_defaults()
                .add_source_file(path)
                .add_env_prefix(ENV_PREFIX)
                .build()?
        }
        None => ConfigLoader::load_default()?,
    };
    Ok(config)
}

fn init_logging(debug: bool, quiet: bool, verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

fn drives_command(json: bool) -> Result<ExitCode> {
    let drives = scan::list_drives();
    if json {
        println!("{}", serde_json::to_string_pretty(&drives)?);
    } else {
        display::display_drives(&drives);
    }
    Ok(ExitCode::SUCCESS)
}

fn folders_command(root: &Path, target: Option<PathBuf>, json: bool) -> Result<ExitCode> {
    info!("Scanning {}", root.display());
    let folders = scan::scan_folders(root)?;

    if json {
        let plan = Plan::from_scan(folders, target);
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        display::display_folders(&folders);
    }
    Ok(ExitCode::SUCCESS)
}

fn build_plan(args: &MigrateArgs) -> Result<Plan> {
    match &args.plan {
        Some(path) => Plan::load(path),
        None => {
            let folders = args
                .sources
                .iter()
                .map(|source| scan::describe(source))
                .collect::<Result<Vec<_>>>()?;
            Ok(Plan::from_scan(folders, None))
        }
    }
}

async fn migrate_command(
    config: &Config,
    state: &StateDir,
    args: MigrateArgs,
    quiet: bool,
) -> Result<ExitCode> {
    let plan = build_plan(&args)?;
    let target_root = args
        .target
        .clone()
        .or_else(|| plan.target_root.clone())
        .context("No target given, use --target or set target_root in the plan")?;
    let migration = args.migration_config(config.migration);
    let chatty = !(quiet || args.json);

    if chatty {
        for (candidate, assessment) in plan.warnings() {
            display::display_assessment(&candidate.name, assessment);
        }
    }

    let jobs = plan.into_jobs();
    if jobs.is_empty() {
        display::display_info("Nothing to migrate");
        return Ok(ExitCode::SUCCESS);
    }

    if chatty {
        let drives = scan::list_drives();
        if let Some(drive) = scan::drive_for(&drives, &target_root) {
            display::display_info(&format!(
                "Target volume {} has {} free",
                drive.path.display(),
                display::format_bytes(drive.free_space)
            ));
        }
        for job in &jobs {
            println!(
                "{} {} [{}] {} → {}",
                style("→").green().bold(),
                style(&job.name).bold(),
                job.id,
                style(job.source_path.display()).cyan(),
                style(target_root.join(&job.name).display()).cyan()
            );
        }
    }

    let mut engine = config.engine;
    if let Some(bound) = args.max_parallel {
        engine.max_parallel_jobs = bound;
    }
    let orchestrator = Orchestrator::new(engine);

    let progress = Arc::new(BatchProgress::new(&jobs, migration.weighted_steps(), chatty));
    let watchers = [
        spawn_interrupt_watcher(orchestrator.registry().clone()),
        spawn_cancel_watcher(state.clone(), orchestrator.registry().clone()),
    ];

    let started_at = Utc::now();
    let outcome = orchestrator
        .run(jobs, &target_root, migration, progress.clone())
        .await;

    for watcher in &watchers {
        watcher.abort();
    }
    progress.finish();

    let results = outcome.context("Pre-flight checks rejected the batch")?;
    record_history(state, Operation::Migrate, &results);

    let summary = BatchSummary::from_results(&results);
    if args.json {
        let metadata = OperationMetadata::finished("migrate", started_at, Some(target_root));
        println!("{}", BatchOutputJson::new(metadata, results).to_json()?);
    } else if !quiet {
        for result in &results {
            display::display_result(result);
        }
        display::display_summary(&summary);
        if !summary.all_succeeded() {
            display::display_info("Use `dirshift rollback <ID>` to restore a failed job");
        }
    }

    Ok(exit_code(&summary))
}

/// Cancel every running job on Ctrl-C, including jobs the batch starts afterwards
fn spawn_interrupt_watcher(registry: CancellationRegistry) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, cancelling running jobs");
        loop {
            let cancelled = registry.cancel_all();
            if cancelled > 0 {
                info!("Cancelled {} jobs", cancelled);
            }
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
        }
    })
}

/// Honour `dirshift cancel` requests left in the state directory
fn spawn_cancel_watcher(state: StateDir, registry: CancellationRegistry) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CANCEL_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            for request in state.cancel_requests() {
                let matched: Vec<_> = registry
                    .in_flight()
                    .into_iter()
                    .filter(|id| id.as_str().starts_with(&request))
                    .collect();
                if matched.is_empty() {
                    continue;
                }
                for id in &matched {
                    if registry.cancel(id) {
                        warn!(job = %id, "Cancel requested");
                    }
                }
                state.clear_cancel_request(&request);
            }
        }
    })
}

fn record_history(state: &StateDir, operation: Operation, results: &[MigrationResult]) {
    let records = results
        .iter()
        .cloned()
        .map(|result| HistoryRecord::now(operation, result))
        .collect();
    if let Err(e) = state.append_history(records) {
        warn!("Failed to record history: {:#}", e);
    }
}

fn exit_code(summary: &BatchSummary) -> ExitCode {
    if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cancel_command(state: &StateDir, id: &str) -> Result<ExitCode> {
    let path = state.request_cancel(id)?;
    info!("Cancel request written to {}", path.display());
    display::display_success(&format!(
        "Cancel requested for {}; a running migration picks it up shortly",
        id
    ));
    Ok(ExitCode::SUCCESS)
}

async fn rollback_command(
    config: &Config,
    state: &StateDir,
    id: &str,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let record = state
        .latest_for(id)?
        .with_context(|| format!("No recorded job matches '{}'", id))?;
    let job = record.result.job;
    info!("Rolling back job {} ({})", job.id, job.name);

    if !(quiet || json) {
        println!(
            "{} Restoring {} to {}",
            style("⟲").blue().bold(),
            style(&job.name).bold(),
            style(job.source_path.display()).cyan()
        );
    }

    let progress = Arc::new(BatchProgress::new(
        std::slice::from_ref(&job),
        1,
        !(quiet || json),
    ));
    let started_at = Utc::now();
    let result = Orchestrator::from_config(config)
        .rollback(job, progress.clone())
        .await;
    progress.finish();

    let results = vec![result];
    record_history(state, Operation::Rollback, &results);

    let summary = BatchSummary::from_results(&results);
    if json {
        let metadata = OperationMetadata::finished("rollback", started_at, None);
        println!("{}", BatchOutputJson::new(metadata, results).to_json()?);
    } else if !quiet {
        display::display_result(&results[0]);
    }

    Ok(exit_code(&summary))
}

fn history_command(state: &StateDir, limit: Option<usize>, json: bool) -> Result<ExitCode> {
    let mut records = state.load_history()?;
    if let Some(limit) = limit {
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        display::display_history(&records);
    }
    Ok(ExitCode::SUCCESS)
}

fn config_command(config: &Config, default: bool) -> Result<ExitCode> {
    if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        print!("{}", serde_yaml::to_string(&Config::default())?);
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        print!("{}", serde_yaml::to_string(config)?);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_configured_defaults() {
        let cli = Cli::try_parse_from([
            "dirshift", "migrate", "/apps/Steam", "--target", "/volume", "--no-backup", "--parallel",
        ])
        .unwrap();
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };

        let migration = args.migration_config(MigrationConfig::default());
        assert!(!migration.overwrite_existing);
        assert!(!migration.create_backup);
        assert!(migration.verify_after_move);
        assert!(migration.parallel_execution);
    }

    #[test]
    fn test_sources_and_plan_are_exclusive() {
        assert!(Cli::try_parse_from(["dirshift", "migrate"]).is_err());
        assert!(Cli::try_parse_from([
            "dirshift", "migrate", "/apps/Steam", "--plan", "plan.json"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["dirshift", "migrate", "--plan", "plan.json"]).is_ok());
    }
}
