//! Contract between the job state machine and the filesystem

use crate::manifest::Manifest;
use crate::registry::CancelHandle;
use async_trait::async_trait;
use dirshift_config::EngineConfig;
use dirshift_types::{CopyStats, JobId, MigrationConfig, MigrationResult, MoveStep, Result, StepProgress};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message flowing from running jobs to the progress pump
#[derive(Debug)]
pub(crate) enum ProgressMessage {
    Step(JobId, StepProgress),
    Finished(Box<MigrationResult>),
}

type ProgressCallback = Arc<dyn Fn(&JobId, &StepProgress) + Send + Sync>;

#[derive(Clone)]
enum SinkTarget {
    Disabled,
    Channel(mpsc::UnboundedSender<ProgressMessage>),
    Callback(ProgressCallback),
}

/// Per-job outlet for step progress
///
/// Everything sent through one sink is delivered in send order.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    target: SinkTarget,
}

impl ProgressSink {
    /// Sink that drops every event
    pub fn disabled(job_id: JobId) -> Self {
        Self {
            job_id,
            target: SinkTarget::Disabled,
        }
    }

    /// Sink that invokes `callback` inline on the reporting task
    pub fn callback<F>(job_id: JobId, callback: F) -> Self
    where
        F: Fn(&JobId, &StepProgress) + Send + Sync + 'static,
    {
        Self {
            job_id,
            target: SinkTarget::Callback(Arc::new(callback)),
        }
    }

    pub(crate) fn channel(job_id: JobId, sender: mpsc::UnboundedSender<ProgressMessage>) -> Self {
        Self {
            job_id,
            target: SinkTarget::Channel(sender),
        }
    }

    /// Job this sink reports for
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Report step progress
    pub fn report(&self, progress: StepProgress) {
        match &self.target {
            SinkTarget::Disabled => {}
            // The pump only goes away after every sender is dropped
            SinkTarget::Channel(sender) => {
                let _ = sender.send(ProgressMessage::Step(self.job_id.clone(), progress));
            }
            SinkTarget::Callback(callback) => callback(&self.job_id, &progress),
        }
    }

    pub(crate) fn finish(&self, result: &MigrationResult) {
        if let SinkTarget::Channel(sender) = &self.target {
            let _ = sender.send(ProgressMessage::Finished(Box::new(result.clone())));
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            SinkTarget::Disabled => "disabled",
            SinkTarget::Channel(_) => "channel",
            SinkTarget::Callback(_) => "callback",
        };
        f.debug_struct("ProgressSink")
            .field("job_id", &self.job_id)
            .field("target", &target)
            .finish()
    }
}

/// Everything a step needs to know about the job it runs for
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Job identifier
    pub job_id: JobId,
    /// Job display name
    pub name: String,
    /// Directory being migrated
    pub source: PathBuf,
    /// Derived target directory
    pub target: PathBuf,
    /// Migration configuration of the run
    pub config: MigrationConfig,
    /// Engine tuning
    pub engine: EngineConfig,
    cancel: CancelHandle,
    progress: ProgressSink,
}

impl StepContext {
    /// Create a step context
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: JobId,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        config: MigrationConfig,
        engine: EngineConfig,
        cancel: CancelHandle,
        progress: ProgressSink,
    ) -> Self {
        Self {
            job_id,
            name: name.into(),
            source: source.into(),
            target: target.into(),
            config,
            engine,
            cancel,
            progress,
        }
    }

    /// Cancellation handle of the run
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Report progress for the current step
    pub fn report(&self, progress: StepProgress) {
        self.progress.report(progress);
    }

    /// Report a bare percentage for `step`
    pub fn report_percent(&self, step: MoveStep, percent: u8) {
        self.progress.report(StepProgress::new(step, percent));
    }

    pub(crate) fn sink(&self) -> &ProgressSink {
        &self.progress
    }
}

/// What a rollback has to undo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackPlan {
    /// State the job was in when rollback started
    ///
    /// A `Completed` job's target holds the live data, including anything written
    /// through the link since the migration. Otherwise the target is suspect and
    /// the preserved original wins.
    pub from: MoveStep,
    /// Target directory created by a run, if Mkdir succeeded
    pub target: Option<PathBuf>,
    /// Preserved original source directory, if one exists
    pub backup: Option<PathBuf>,
}

/// One atomic migration step each, performed against a filesystem
///
/// The job runner calls these in state-machine order and never calls a step
/// before its predecessor succeeded.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Mkdir: validate the job and create the target directory
    async fn create_target(&self, ctx: &StepContext) -> Result<()>;

    /// Record the source tree before Copy starts
    async fn capture_manifest(&self, ctx: &StepContext) -> Result<Manifest>;

    /// Copy: copy the source tree into the target, filling in content digests
    async fn copy_tree(&self, ctx: &StepContext, manifest: &mut Manifest) -> Result<CopyStats>;

    /// Mklink: replace the source directory with a link to the target
    ///
    /// Returns where the original source directory was moved aside to.
    async fn create_link(&self, ctx: &StepContext) -> Result<PathBuf>;

    /// Verifying: compare the target tree against the manifest
    async fn verify(&self, ctx: &StepContext, manifest: &Manifest) -> Result<()>;

    /// Delete the moved-aside source, or keep it as a backup
    ///
    /// Returns the backup location when the original is kept.
    async fn release_source(&self, ctx: &StepContext, staging: &Path) -> Result<Option<PathBuf>>;

    /// Cleaning: undo a completed or failed run
    async fn rollback(&self, ctx: &StepContext, plan: &RollbackPlan) -> Result<()>;
}
