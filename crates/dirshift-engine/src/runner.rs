//! Job state machine: drives one job through its steps

use crate::registry::CancellationRegistry;
use crate::step::{ProgressSink, RollbackPlan, StepContext, StepExecutor};
use dirshift_config::EngineConfig;
use dirshift_types::{
    weighted_percent, CopyStats, Error, Job, MigrationConfig, MigrationResult, MoveStep, Result,
    StepProgress,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Ordered, human-readable record of one run
#[derive(Debug, Default)]
struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    fn push(&mut self, job: &Job, line: impl Into<String>) {
        let line = line.into();
        info!(job = %job.id, "{}", line);
        self.lines.push(line);
    }

    fn warn(&mut self, job: &Job, line: impl Into<String>) {
        let line = line.into();
        warn!(job = %job.id, "{}", line);
        self.lines.push(line);
    }

    fn error(&mut self, job: &Job, line: impl Into<String>) {
        let line = line.into();
        error!(job = %job.id, "{}", line);
        self.lines.push(line);
    }

    fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Runs single jobs and their rollbacks
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn StepExecutor>,
    registry: CancellationRegistry,
    engine: EngineConfig,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    /// Create a runner over `executor`, registering runs in `registry`
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        registry: CancellationRegistry,
        engine: EngineConfig,
    ) -> Self {
        Self {
            executor,
            registry,
            engine,
        }
    }

    /// Registry runs are registered in
    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Run `job` from `Idle` to a terminal state, migrating it to `target`
    ///
    /// Never returns an error: every failure ends up in the result.
    pub async fn run(
        &self,
        mut job: Job,
        target: PathBuf,
        config: MigrationConfig,
        progress: ProgressSink,
    ) -> MigrationResult {
        let mut log = RunLog::default();

        let registration = match self.registry.register(&job.id) {
            Ok(registration) => registration,
            Err(error) => return reject(job, &error, log, &progress),
        };
        if job.state != MoveStep::Idle {
            let error = Error::InvalidTransition {
                from: job.state,
                to: MoveStep::Mkdir,
            };
            return reject(job, &error, log, &progress);
        }

        let ctx = StepContext::new(
            job.id.clone(),
            job.name.clone(),
            job.source_path.clone(),
            target,
            config,
            self.engine,
            registration.handle().clone(),
            progress,
        );
        log.push(
            &job,
            format!(
                "Starting migration of '{}' from {} to {}",
                job.name,
                ctx.source.display(),
                ctx.target.display()
            ),
        );

        let mut stats = CopyStats::new();
        let outcome = self.drive(&mut job, &ctx, &mut log, &mut stats).await;

        let result = match outcome {
            Ok(()) => {
                log.push(&job, "Migration completed");
                ctx.report_percent(MoveStep::Completed, 100);
                MigrationResult::success(job, log.into_lines(), stats)
            }
            Err(error) => {
                let failed_in = job.state;
                job.fail(&error);
                if matches!(error, Error::Cancelled) {
                    log.warn(&job, format!("Cancelled during {}", failed_in));
                } else {
                    log.error(&job, format!("Failed during {}: {}", failed_in, error));
                }
                ctx.report_percent(MoveStep::Error, 100);
                MigrationResult::failure(job, &error, log.into_lines(), stats)
            }
        };

        ctx.sink().finish(&result);
        drop(registration);
        result
    }

    async fn drive(
        &self,
        job: &mut Job,
        ctx: &StepContext,
        log: &mut RunLog,
        stats: &mut CopyStats,
    ) -> Result<()> {
        let steps = ctx.config.weighted_steps();

        enter(job, ctx, MoveStep::Mkdir, steps)?;
        log.push(job, format!("Creating target directory {}", ctx.target.display()));
        self.executor.create_target(ctx).await?;
        job.target_path = Some(ctx.target.clone());
        ctx.report_percent(MoveStep::Mkdir, 100);

        enter(job, ctx, MoveStep::Copy, steps)?;
        let mut manifest = self.executor.capture_manifest(ctx).await?;
        log.push(
            job,
            format!(
                "Copying {} entries ({} bytes)",
                manifest.len(),
                manifest.total_bytes()
            ),
        );
        *stats = self.executor.copy_tree(ctx, &mut manifest).await?;
        log.push(
            job,
            format!(
                "Copied {} files, {} directories, {} symlinks ({} bytes)",
                stats.files_copied, stats.directories_created, stats.symlinks_copied, stats.bytes_copied
            ),
        );

        enter(job, ctx, MoveStep::Mklink, steps)?;
        let staging = self.executor.create_link(ctx).await?;
        // The original stays recoverable until it is released
        job.backup_path = Some(staging.clone());
        log.push(
            job,
            format!(
                "Linked {} -> {}",
                ctx.source.display(),
                ctx.target.display()
            ),
        );
        ctx.report_percent(MoveStep::Mklink, 100);

        if ctx.config.verify_after_move {
            enter(job, ctx, MoveStep::Verifying, steps)?;
            self.executor.verify(ctx, &manifest).await?;
            log.push(job, format!("Verified target against {} source entries", manifest.len()));
            ctx.report_percent(MoveStep::Verifying, 100);
        }

        match self.executor.release_source(ctx, &staging).await {
            Ok(Some(backup)) => {
                log.push(job, format!("Kept original as backup at {}", backup.display()));
                job.backup_path = Some(backup);
            }
            Ok(None) => {
                log.push(job, "Removed original source directory");
                job.backup_path = None;
            }
            Err(error) => {
                // The data is safe behind the link; a half-deleted original is no backup
                log.warn(job, format!("Could not remove original source: {}", error));
                job.backup_path = None;
            }
        }

        job.advance(MoveStep::Completed)
    }

    /// Roll back a completed or failed job to `Idle`
    ///
    /// Cancellation requests are not observed while cleaning.
    pub async fn rollback(&self, mut job: Job, progress: ProgressSink) -> MigrationResult {
        let mut log = RunLog::default();

        let registration = match self.registry.register_uncancellable(&job.id) {
            Ok(registration) => registration,
            Err(error) => return reject(job, &error, log, &progress),
        };
        let from = job.state;
        if let Err(error) = job.advance(MoveStep::Cleaning) {
            return reject(job, &error, log, &progress);
        }
        job.progress_percent = 0;

        let plan = RollbackPlan {
            from,
            target: job.target_path.clone(),
            backup: job.backup_path.clone(),
        };
        let ctx = StepContext::new(
            job.id.clone(),
            job.name.clone(),
            job.source_path.clone(),
            plan.target.clone().unwrap_or_default(),
            MigrationConfig::default(),
            self.engine,
            registration.handle().clone(),
            progress,
        );
        log.push(
            &job,
            format!("Rolling back '{}' to {}", job.name, ctx.source.display()),
        );

        let result = match self.executor.rollback(&ctx, &plan).await {
            Ok(()) => match job.advance(MoveStep::Idle) {
                Ok(()) => {
                    log.push(&job, "Rollback completed");
                    MigrationResult::success(job, log.into_lines(), CopyStats::new())
                }
                Err(error) => fail_rollback(job, error, log),
            },
            Err(error) => fail_rollback(job, error, log),
        };

        ctx.sink().finish(&result);
        drop(registration);
        result
    }
}

/// Check cancellation, then advance into `step`
fn enter(job: &mut Job, ctx: &StepContext, step: MoveStep, steps: u32) -> Result<()> {
    ctx.check_cancelled()?;
    job.advance(step)?;
    job.progress_percent = weighted_percent(step, 0, steps).round() as u8;
    ctx.report(StepProgress::new(step, 0));
    Ok(())
}

fn fail_rollback(mut job: Job, error: Error, mut log: RunLog) -> MigrationResult {
    let error = match error {
        Error::RollbackFailed { .. } => error,
        other => Error::rollback_failed(other.to_string()),
    };
    job.fail(&error);
    log.error(&job, error.to_string());
    MigrationResult::failure(job, &error, log.into_lines(), CopyStats::new())
}

/// Result for a run that never started; the job is returned untouched
fn reject(job: Job, error: &Error, mut log: RunLog, progress: &ProgressSink) -> MigrationResult {
    log.warn(&job, format!("Rejected: {}", error));
    let result = MigrationResult::failure(job, error, log.into_lines(), CopyStats::new());
    progress.finish(&result);
    result
}
