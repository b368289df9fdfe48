//! Core data types for dirshift
//!
//! This module provides the migration job, its step state machine, progress events,
//! statistics and results.

use crate::{Error, ErrorKind, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Opaque job identifier, stable for the job's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct JobId(String);

impl JobId {
    /// Create a job id from a caller supplied value
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random job id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used for staging directory names
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map_or(self.0.len(), |(index, _)| index);
        &self.0[..end]
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fine-grained migration step of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MoveStep {
    /// Not started, or restored by a rollback
    #[default]
    Idle,
    /// Creating the target directory
    Mkdir,
    /// Bulk copying the source tree into the target
    Copy,
    /// Replacing the source directory with a directory link
    Mklink,
    /// Comparing the target tree against the source manifest
    Verifying,
    /// Migration finished
    Completed,
    /// Rolling a migration back
    Cleaning,
    /// Stopped on failure or cancellation
    Error,
}

impl MoveStep {
    /// Happy-path steps that carry progress weight, in execution order
    pub const WEIGHTED: [MoveStep; 4] = [Self::Mkdir, Self::Copy, Self::Mklink, Self::Verifying];

    /// Check whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: MoveStep) -> bool {
        use MoveStep::{Cleaning, Completed, Copy, Error, Idle, Mkdir, Mklink, Verifying};
        match (self, next) {
            (Idle, Mkdir)
            | (Mkdir, Copy)
            | (Copy, Mklink)
            | (Mklink, Verifying | Completed)
            | (Verifying, Completed)
            | (Completed | Error, Cleaning)
            | (Cleaning, Idle) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Check if the step is terminal for a run
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Position among the weighted steps, if this step carries progress weight
    pub fn weight_index(self) -> Option<u32> {
        Self::WEIGHTED
            .iter()
            .position(|step| *step == self)
            .map(|index| index as u32)
    }

    /// Position on the happy path, used to check ordering invariants
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Mkdir => 1,
            Self::Copy => 2,
            Self::Mklink => 3,
            Self::Verifying => 4,
            Self::Completed => 5,
            Self::Cleaning => 6,
            Self::Error => 7,
        }
    }
}

impl std::fmt::Display for MoveStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Mkdir => "Mkdir",
            Self::Copy => "Copy",
            Self::Mklink => "Mklink",
            Self::Verifying => "Verifying",
            Self::Completed => "Completed",
            Self::Cleaning => "Cleaning",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Coarse, externally observed job status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JobStatus {
    /// Ready to migrate
    Ready,
    /// A run or rollback is in progress
    Moving,
    /// Data lives on the target volume behind a link
    Moved,
    /// Stopped on failure
    Error,
}

impl From<MoveStep> for JobStatus {
    fn from(step: MoveStep) -> Self {
        match step {
            MoveStep::Idle => Self::Ready,
            MoveStep::Mkdir
            | MoveStep::Copy
            | MoveStep::Mklink
            | MoveStep::Verifying
            | MoveStep::Cleaning => Self::Moving,
            MoveStep::Completed => Self::Moved,
            MoveStep::Error => Self::Error,
        }
    }
}

/// Job-level percentage for a step-local percentage
///
/// Each weighted step counts as one of `steps` equal parts. This is a UX signal,
/// not a byte-accurate measure.
pub fn weighted_percent(step: MoveStep, local_percent: u8, steps: u32) -> f64 {
    let steps = steps.max(1);
    match step {
        MoveStep::Completed | MoveStep::Error => 100.0,
        MoveStep::Idle | MoveStep::Cleaning => 0.0,
        weighted => {
            let index = weighted.weight_index().unwrap_or(0).min(steps - 1);
            let local = f64::from(local_percent.min(100));
            (f64::from(index) * 100.0 + local) / f64::from(steps)
        }
    }
}

/// Migration configuration, immutable for the duration of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MigrationConfig {
    /// Replace an existing target directory instead of failing
    pub overwrite_existing: bool,
    /// Keep the original source directory as a backup after the link is in place
    pub create_backup: bool,
    /// Re-walk the target after linking and compare it against the source manifest
    pub verify_after_move: bool,
    /// Run all jobs of a batch concurrently
    pub parallel_execution: bool,
}

impl MigrationConfig {
    /// Number of weighted steps a job goes through under this configuration
    pub fn weighted_steps(&self) -> u32 {
        if self.verify_after_move {
            4
        } else {
            3
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            overwrite_existing: false,
            create_backup: true,
            verify_after_move: true,
            parallel_execution: false,
        }
    }
}

/// One unit of migration work
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,
    /// Display name, also the target directory name under the target root
    pub name: String,
    /// Directory being migrated
    pub source_path: PathBuf,
    /// Final location, set once Mkdir succeeds
    pub target_path: Option<PathBuf>,
    /// Best-effort total size, used for progress and capacity checks
    pub size_bytes: u64,
    /// Current step
    pub state: MoveStep,
    /// Job-level progress (0-100)
    pub progress_percent: u8,
    /// Last error message
    pub last_error: Option<String>,
    /// Preserved original source directory
    pub backup_path: Option<PathBuf>,
    /// A rollback failed and the filesystem may need manual repair
    pub rollback_failed: bool,
}

impl Job {
    /// Create a new idle job
    pub fn new<N: Into<String>, P: Into<PathBuf>>(
        id: JobId,
        name: N,
        source_path: P,
        size_bytes: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source_path: source_path.into(),
            target_path: None,
            size_bytes,
            state: MoveStep::Idle,
            progress_percent: 0,
            last_error: None,
            backup_path: None,
            rollback_failed: false,
        }
    }

    /// Coarse status derived from the current step
    pub fn status(&self) -> JobStatus {
        self.state.into()
    }

    /// Move to the next step, rejecting out-of-order transitions
    pub fn advance(&mut self, next: MoveStep) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        match next {
            MoveStep::Completed => self.progress_percent = 100,
            MoveStep::Idle => {
                self.target_path = None;
                self.backup_path = None;
                self.progress_percent = 0;
                self.last_error = None;
                self.rollback_failed = false;
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a failure and stop advancing
    pub fn fail(&mut self, error: &Error) {
        if self.state != MoveStep::Error {
            self.state = MoveStep::Error;
        }
        self.last_error = Some(error.to_string());
        if error.kind() == ErrorKind::RollbackFailed {
            self.rollback_failed = true;
        }
    }
}

/// Progress of one step of one job
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepProgress {
    /// Step this progress belongs to
    pub step: MoveStep,
    /// Percentage local to the step (0-100)
    pub percent: u8,
    /// File being processed
    pub current_file: Option<PathBuf>,
    /// Bytes processed so far in this step
    pub bytes_done: Option<u64>,
    /// Bytes this step will process
    pub bytes_total: Option<u64>,
    /// Files processed so far in this step
    pub files_done: Option<u64>,
    /// Files this step will process
    pub files_total: Option<u64>,
}

impl StepProgress {
    /// Create a progress record for a step
    pub fn new(step: MoveStep, percent: u8) -> Self {
        Self {
            step,
            percent: percent.min(100),
            current_file: None,
            bytes_done: None,
            bytes_total: None,
            files_done: None,
            files_total: None,
        }
    }

    /// Attach the current file
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.current_file = Some(path.into());
        self
    }

    /// Attach byte counters
    pub fn with_bytes(mut self, done: u64, total: u64) -> Self {
        self.bytes_done = Some(done);
        self.bytes_total = Some(total);
        self
    }

    /// Attach file counters
    pub fn with_files(mut self, done: u64, total: u64) -> Self {
        self.files_done = Some(done);
        self.files_total = Some(total);
        self
    }

    /// Percentage of `done` over `total`, treating an empty total as complete
    pub fn ratio(done: u64, total: u64) -> u8 {
        if total == 0 {
            100
        } else {
            ((done.min(total) as f64 / total as f64) * 100.0) as u8
        }
    }
}

/// Progress event delivered to a batch's reporter
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProgressEvent {
    /// Job the progress belongs to
    pub job_id: JobId,
    /// Step-local progress
    pub progress: StepProgress,
    /// Approximate batch-level percentage (0-100)
    pub overall_percent: f64,
}

/// Copy statistics for one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CopyStats {
    /// Number of files copied
    pub files_copied: u64,
    /// Number of directories created
    pub directories_created: u64,
    /// Number of symlinks recreated
    pub symlinks_copied: u64,
    /// Total bytes copied
    pub bytes_copied: u64,
    /// Total duration of the copy
    pub duration: Duration,
}

impl CopyStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate the overall transfer rate in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.bytes_copied as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &CopyStats) {
        self.files_copied += other.files_copied;
        self.directories_created += other.directories_created;
        self.symlinks_copied += other.symlinks_copied;
        self.bytes_copied += other.bytes_copied;
        self.duration += other.duration;
    }
}

/// Terminal outcome of one job run or rollback
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MigrationResult {
    /// Whether the operation succeeded
    pub success: bool,
    /// Job in its final state
    pub job: Job,
    /// Error classification when the operation failed
    pub error_kind: Option<ErrorKind>,
    /// Error message when the operation failed
    pub error: Option<String>,
    /// Ordered human-readable log of what happened
    pub log: Vec<String>,
    /// Copy statistics
    pub stats: CopyStats,
}

impl MigrationResult {
    /// Create a successful result
    pub fn success(job: Job, log: Vec<String>, stats: CopyStats) -> Self {
        Self {
            success: true,
            job,
            error_kind: None,
            error: None,
            log,
            stats,
        }
    }

    /// Create a failed result
    pub fn failure(job: Job, error: &Error, log: Vec<String>, stats: CopyStats) -> Self {
        Self {
            success: false,
            job,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            log,
            stats,
        }
    }

    /// Check if the operation was cancelled rather than failed
    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }
}

/// Aggregate counts over a batch of results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchSummary {
    /// Number of results
    pub total: usize,
    /// Successful results
    pub succeeded: usize,
    /// Failed results, excluding cancellations
    pub failed: usize,
    /// Cancelled results
    pub cancelled: usize,
    /// Results whose rollback left the filesystem inconsistent
    pub rollback_failed: usize,
    /// Total bytes copied across the batch
    pub bytes_copied: u64,
}

impl BatchSummary {
    /// Summarize a batch of results
    pub fn from_results(results: &[MigrationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            summary.bytes_copied += result.stats.bytes_copied;
            if result.success {
                summary.succeeded += 1;
            } else if result.is_cancelled() {
                summary.cancelled += 1;
            } else {
                summary.failed += 1;
            }
            if result.job.rollback_failed {
                summary.rollback_failed += 1;
            }
        }
        summary
    }

    /// Check if every result succeeded
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}
