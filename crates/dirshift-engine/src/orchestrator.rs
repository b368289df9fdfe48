//! Batch execution: pre-flight checks, fan-out and progress aggregation

use crate::fs_executor::FsStepExecutor;
use crate::preflight::{self, Fs2SpaceProbe, SpaceProbe};
use crate::progress::ProgressAggregator;
use crate::registry::CancellationRegistry;
use crate::runner::JobRunner;
use crate::step::{ProgressMessage, ProgressSink, StepExecutor};
use dirshift_config::{Config, EngineConfig};
use dirshift_types::{
    CopyStats, Error, Job, JobId, MigrationConfig, MigrationResult, ProgressEvent,
    ProgressReporter, Result,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Runs batches of migration jobs
#[derive(Clone)]
pub struct Orchestrator {
    executor: Arc<dyn StepExecutor>,
    space_probe: Arc<dyn SpaceProbe>,
    registry: CancellationRegistry,
    engine: EngineConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Orchestrator {
    /// Create an orchestrator working on the local filesystem
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            executor: Arc::new(FsStepExecutor::new()),
            space_probe: Arc::new(Fs2SpaceProbe),
            registry: CancellationRegistry::new(),
            engine,
        }
    }

    /// Create an orchestrator from the engine section of a configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.engine)
    }

    /// Replace the step executor
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replace the free-space probe used by the capacity check
    pub fn with_space_probe(mut self, probe: Arc<dyn SpaceProbe>) -> Self {
        self.space_probe = probe;
        self
    }

    /// Share a cancellation registry with other orchestrators
    pub fn with_registry(mut self, registry: CancellationRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registry of in-flight jobs
    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Cancel an in-flight job; `false` if it is not running
    pub fn cancel(&self, id: &JobId) -> bool {
        self.registry.cancel(id)
    }

    fn runner(&self) -> JobRunner {
        JobRunner::new(
            Arc::clone(&self.executor),
            self.registry.clone(),
            self.engine,
        )
    }

    /// Migrate every job to `target_root / job.name`
    ///
    /// Only pre-flight failures are returned as errors, before anything on disk is
    /// touched. Otherwise there is exactly one result per job, in input order.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        target_root: &Path,
        config: MigrationConfig,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Vec<MigrationResult>> {
        let targets = preflight::derive_targets(&jobs, target_root)?;
        preflight::check_capacity(&jobs, target_root, self.space_probe.as_ref())?;
        info!(
            "Starting batch of {} jobs into {} ({})",
            jobs.len(),
            target_root.display(),
            if config.parallel_execution {
                "parallel"
            } else {
                "sequential"
            }
        );

        let aggregator =
            ProgressAggregator::new(jobs.iter().map(|job| job.id.clone()), config.weighted_steps());
        let (sender, receiver) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(receiver, aggregator, reporter));

        let results = if config.parallel_execution {
            self.run_parallel(jobs, targets, config, &sender).await
        } else {
            self.run_sequential(jobs, targets, config, &sender).await
        };

        drop(sender);
        if let Err(e) = pump.await {
            error!("Progress reporter panicked: {}", e);
        }

        let succeeded = results.iter().filter(|result| result.success).count();
        info!("Batch finished: {}/{} jobs succeeded", succeeded, results.len());
        Ok(results)
    }

    async fn run_sequential(
        &self,
        jobs: Vec<Job>,
        targets: Vec<PathBuf>,
        config: MigrationConfig,
        sender: &mpsc::UnboundedSender<ProgressMessage>,
    ) -> Vec<MigrationResult> {
        let runner = self.runner();
        let mut results = Vec::with_capacity(jobs.len());
        for (job, target) in jobs.into_iter().zip(targets) {
            let sink = ProgressSink::channel(job.id.clone(), sender.clone());
            results.push(runner.run(job, target, config, sink).await);
        }
        results
    }

    async fn run_parallel(
        &self,
        jobs: Vec<Job>,
        targets: Vec<PathBuf>,
        config: MigrationConfig,
        sender: &mpsc::UnboundedSender<ProgressMessage>,
    ) -> Vec<MigrationResult> {
        let limit = match self.engine.max_parallel_jobs {
            0 => None,
            bound => Some(Arc::new(Semaphore::new(bound))),
        };

        let mut handles: Vec<(Job, JoinHandle<MigrationResult>)> = Vec::with_capacity(jobs.len());
        for (job, target) in jobs.into_iter().zip(targets) {
            let runner = self.runner();
            let limit = limit.clone();
            let sink = ProgressSink::channel(job.id.clone(), sender.clone());
            let snapshot = job.clone();

            let handle = tokio::spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            let error = Error::other(format!("Failed to acquire job permit: {}", e));
                            let result = MigrationResult::failure(job, &error, Vec::new(), CopyStats::new());
                            sink.finish(&result);
                            return result;
                        }
                    },
                    None => None,
                };
                runner.run(job, target, config, sink).await
            });
            handles.push((snapshot, handle));
        }

        let (snapshots, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(snapshots)
            .map(|(joined, snapshot)| {
                joined.unwrap_or_else(|e| {
                    error!("Job {} panicked: {}", snapshot.id, e);
                    let error = Error::other(format!("Job task failed: {}", e));
                    let mut job = snapshot;
                    job.fail(&error);
                    MigrationResult::failure(job, &error, Vec::new(), CopyStats::new())
                })
            })
            .collect()
    }

    /// Roll a completed or failed job back to `Idle`
    pub async fn rollback(&self, job: Job, reporter: Arc<dyn ProgressReporter>) -> MigrationResult {
        let aggregator = ProgressAggregator::new([job.id.clone()], 1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(receiver, aggregator, reporter));

        let sink = ProgressSink::channel(job.id.clone(), sender);
        let result = self.runner().rollback(job, sink).await;

        if let Err(e) = pump.await {
            error!("Progress reporter panicked: {}", e);
        }
        result
    }
}

/// Single consumer of all progress of a batch; serializes reporter calls
async fn pump(
    mut receiver: mpsc::UnboundedReceiver<ProgressMessage>,
    mut aggregator: ProgressAggregator,
    reporter: Arc<dyn ProgressReporter>,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            ProgressMessage::Step(job_id, progress) => {
                let overall_percent = aggregator.update(&job_id, &progress);
                reporter.report_progress(&ProgressEvent {
                    job_id,
                    progress,
                    overall_percent,
                });
            }
            ProgressMessage::Finished(result) => reporter.report_completion(&result),
        }
    }
}
