//! Migration orchestration engine for dirshift
//!
//! This crate moves application data directories to another volume and leaves a
//! directory link behind, so existing paths keep resolving.
//!
//! # Features
//!
//! - **Job state machine**: `Idle → Mkdir → Copy → Mklink → Verifying → Completed`,
//!   with `Error` on failure and `Cleaning` for rollbacks
//! - **Source safety**: the source directory is only replaced after the copy is complete
//! - **Batches**: sequential or parallel execution with an optional concurrency bound
//! - **Cancellation**: cooperative, observed at every copy chunk
//! - **Progress**: ordered per-job step events plus an approximate overall percentage
//!
//! # Examples
//!
//! ```rust,no_run
//! use dirshift_engine::Orchestrator;
//! use dirshift_types::{Job, JobId, MigrationConfig, ProgressEvent};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::default();
//! let jobs = vec![Job::new(JobId::generate(), "Steam", "/data/Steam", 0)];
//! let reporter = Arc::new(|event: &ProgressEvent| {
//!     println!("{} {:?} {:.0}%", event.job_id, event.progress.step, event.overall_percent);
//! });
//!
//! let results = orchestrator
//!     .run(jobs, Path::new("/mnt/fast"), MigrationConfig::default(), reporter)
//!     .await?;
//! for result in results {
//!     println!("{}: {}", result.job.name, result.success);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod copy;
pub mod fs_executor;
pub mod link;
pub mod manifest;
pub mod orchestrator;
pub mod preflight;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod step;

pub use fs_executor::FsStepExecutor;
pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use orchestrator::Orchestrator;
pub use preflight::{Fs2SpaceProbe, SpaceProbe};
pub use progress::ProgressAggregator;
pub use registry::{CancelHandle, CancellationRegistry, Registration};
pub use runner::JobRunner;
pub use step::{ProgressSink, RollbackPlan, StepContext, StepExecutor};
