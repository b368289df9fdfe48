//! Integration tests for dirshift
//!
//! These tests run whole batches against the real filesystem and check the
//! guarantees callers rely on: step ordering, source safety, pre-flight rejection,
//! bounded cancellation, rollback and isolation between jobs.

use dirshift_config::EngineConfig;
use dirshift_engine::{
    CancellationRegistry, FsStepExecutor, JobRunner, Orchestrator, ProgressSink, SpaceProbe,
};
use dirshift_tests::{app_folder, create_tree, is_link, pattern, snapshot_tree, Fault, FaultyExecutor};
use dirshift_types::{
    BatchSummary, ChunkSize, Error, ErrorKind, Job, JobId, JobStatus, MigrationConfig, MigrationResult, MoveStep,
    NoopReporter, ProgressEvent, ProgressReporter,
};
use rstest::rstest;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const HAPPY_PATH: [MoveStep; 6] = [
    MoveStep::Idle,
    MoveStep::Mkdir,
    MoveStep::Copy,
    MoveStep::Mklink,
    MoveStep::Verifying,
    MoveStep::Completed,
];

/// Temporary workspace with an `apps` source root and a `volume` target root
struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("apps")).unwrap();
        fs::create_dir_all(temp.path().join("volume")).unwrap();
        Self { temp }
    }

    fn apps(&self) -> PathBuf {
        self.temp.path().join("apps")
    }

    fn volume(&self) -> PathBuf {
        self.temp.path().join("volume")
    }

    fn job(&self, name: &str) -> Job {
        app_folder(&self.apps(), name).unwrap()
    }
}

/// Reporter recording the distinct steps each job went through
#[derive(Default)]
struct StepRecorder {
    steps: Mutex<HashMap<JobId, Vec<MoveStep>>>,
    overall: Mutex<Vec<f64>>,
}

impl ProgressReporter for StepRecorder {
    fn report_progress(&self, event: &ProgressEvent) {
        let mut steps = self.steps.lock().unwrap();
        let seen = steps.entry(event.job_id.clone()).or_default();
        if seen.last() != Some(&event.progress.step) {
            seen.push(event.progress.step);
        }
        self.overall.lock().unwrap().push(event.overall_percent);
    }
}

impl StepRecorder {
    fn steps_of(&self, id: &JobId) -> Vec<MoveStep> {
        self.steps.lock().unwrap().get(id).cloned().unwrap_or_default()
    }
}

/// Observed steps must be a subsequence of the happy path, optionally ending in `Error`
fn assert_ordered(observed: &[MoveStep]) {
    let (body, failed) = match observed.split_last() {
        Some((MoveStep::Error, body)) => (body, true),
        _ => (observed, false),
    };
    let positions: Vec<usize> = body
        .iter()
        .map(|step| {
            HAPPY_PATH
                .iter()
                .position(|candidate| candidate == step)
                .unwrap_or_else(|| panic!("unexpected step {step} in {observed:?}"))
        })
        .collect();
    assert!(
        positions.windows(2).all(|pair| pair[0] < pair[1]),
        "steps out of order: {observed:?}"
    );
    if !failed {
        assert_eq!(body.last(), Some(&MoveStep::Completed), "{observed:?}");
    }
}

fn orchestrator_with(executor: FaultyExecutor) -> Orchestrator {
    Orchestrator::default().with_executor(Arc::new(executor))
}

fn result_named<'a>(results: &'a [MigrationResult], name: &str) -> &'a MigrationResult {
    results
        .iter()
        .find(|result| result.job.name == name)
        .unwrap_or_else(|| panic!("no result for {name}"))
}

#[tokio::test]
async fn test_steps_are_observed_in_state_machine_order() {
    let workspace = Workspace::new();
    let jobs = vec![
        workspace.job("Editor"),
        workspace.job("Tampered"),
        workspace.job("Unlinked"),
    ];
    let ids: Vec<JobId> = jobs.iter().map(|job| job.id.clone()).collect();
    let executor = FaultyExecutor::new()
        .with_fault("Tampered", Fault::TamperTarget)
        .with_fault("Unlinked", Fault::Mklink);
    let recorder = Arc::new(StepRecorder::default());
    let config = MigrationConfig {
        parallel_execution: true,
        ..MigrationConfig::default()
    };

    let results = orchestrator_with(executor)
        .run(jobs, &workspace.volume(), config, recorder.clone())
        .await
        .unwrap();

    for id in &ids {
        assert_ordered(&recorder.steps_of(id));
    }
    assert_eq!(
        recorder.steps_of(&ids[0]),
        [
            MoveStep::Mkdir,
            MoveStep::Copy,
            MoveStep::Mklink,
            MoveStep::Verifying,
            MoveStep::Completed
        ]
    );
    assert_eq!(recorder.steps_of(&ids[1]).last(), Some(&MoveStep::Error));
    assert_eq!(
        result_named(&results, "Tampered").error_kind,
        Some(ErrorKind::VerificationMismatch)
    );
    assert_eq!(
        result_named(&results, "Unlinked").error_kind,
        Some(ErrorKind::Io)
    );

    let overall = recorder.overall.lock().unwrap();
    assert!(overall.iter().all(|percent| (0.0..=100.0).contains(percent)));
    assert!((overall.last().unwrap() - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_copy_failure_leaves_source_intact() {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let source = job.source_path.clone();
    let before = snapshot_tree(&source).unwrap();

    let results = orchestrator_with(FaultyExecutor::new().with_fault("Editor", Fault::Copy))
        .run(
            vec![job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap();

    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Io));
    assert_eq!(result.job.state, MoveStep::Error);
    assert!(result.job.last_error.is_some());
    assert!(result.log.iter().any(|line| line.starts_with("Failed during Copy")));

    assert!(!is_link(&source));
    assert_eq!(snapshot_tree(&source).unwrap(), before);
    assert!(result.job.backup_path.is_none());
}

#[tokio::test]
async fn test_colliding_targets_abort_before_any_mutation() {
    let workspace = Workspace::new();
    let first = workspace.job("Editor");
    let nested = workspace.apps().join("nested");
    let second = app_folder(&nested, "Editor").unwrap();
    let before = (
        snapshot_tree(&first.source_path).unwrap(),
        snapshot_tree(&second.source_path).unwrap(),
    );

    let outcome = Orchestrator::default()
        .run(
            vec![first.clone(), second.clone()],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await;

    match outcome {
        Err(Error::PathConflict { first: a, second: b, .. }) => {
            assert_eq!(a, first.id.to_string());
            assert_eq!(b, second.id.to_string());
        }
        other => panic!("expected PathConflict, got {other:?}"),
    }
    assert_eq!(fs::read_dir(workspace.volume()).unwrap().count(), 0);
    assert_eq!(snapshot_tree(&first.source_path).unwrap(), before.0);
    assert_eq!(snapshot_tree(&second.source_path).unwrap(), before.1);
}

struct FixedSpace(u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn test_insufficient_space_aborts_batch() {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let required = job.size_bytes;

    let outcome = Orchestrator::default()
        .with_space_probe(Arc::new(FixedSpace(required - 1)))
        .run(
            vec![job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await;

    let error = outcome.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InsufficientSpace);
    assert!(error.is_preflight());
    assert_eq!(fs::read_dir(workspace.volume()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancellation_lands_within_one_chunk() {
    const CHUNK: usize = 4096;
    let workspace = Workspace::new();
    let source = workspace.apps().join("Huge");
    let content = pattern(4 * 1024 * 1024, 9);
    create_tree(&source, &[("blob.bin", content.as_slice())]).unwrap();
    let job = Job::new(JobId::from("huge"), "Huge", &source, content.len() as u64);
    let target = workspace.volume().join("Huge");

    let registry = CancellationRegistry::new();
    let engine = EngineConfig {
        chunk_size: ChunkSize::new(CHUNK).unwrap(),
        ..EngineConfig::default()
    };
    let runner = JobRunner::new(Arc::new(FsStepExecutor::new()), registry.clone(), engine);

    let canceller = registry.clone();
    let second_run_rejected = Arc::new(Mutex::new(None));
    let observed = Arc::clone(&second_run_rejected);
    let sink = ProgressSink::callback(job.id.clone(), move |id, progress| {
        if progress.step == MoveStep::Copy
            && progress.bytes_done.unwrap_or(0) > 0
            && canceller.cancel(id)
        {
            // The cancelled run is still unwinding and owns the id
            *observed.lock().unwrap() = Some(canceller.register(id).is_err());
        }
    });

    let result = runner
        .run(job, target.clone(), MigrationConfig::default(), sink)
        .await;

    assert!(!result.success);
    assert!(result.is_cancelled());
    assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(result.job.state, MoveStep::Error);
    assert!(result.log.iter().any(|line| line == "Cancelled during Copy"));

    let copied = fs::metadata(target.join("blob.bin")).unwrap().len();
    assert!(copied as usize <= CHUNK, "copied {copied} bytes after cancel");
    assert!(!is_link(&source));
    assert_eq!(fs::read(source.join("blob.bin")).unwrap(), content);
    assert_eq!(*second_run_rejected.lock().unwrap(), Some(true));
    assert!(!registry.is_in_flight(&JobId::from("huge")));
}

#[rstest]
#[case::keeping_backup(true)]
#[case::without_backup(false)]
#[tokio::test]
async fn test_rollback_restores_original_bytes(#[case] create_backup: bool) {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let source = job.source_path.clone();
    let before = snapshot_tree(&source).unwrap();
    let orchestrator = Orchestrator::default();
    let config = MigrationConfig {
        create_backup,
        ..MigrationConfig::default()
    };

    let mut results = orchestrator
        .run(vec![job], &workspace.volume(), config, Arc::new(NoopReporter))
        .await
        .unwrap();
    let migrated = results.remove(0);
    assert!(migrated.success, "{:?}", migrated.error);
    assert_eq!(migrated.job.status(), JobStatus::Moved);
    assert_eq!(migrated.job.backup_path.is_some(), create_backup);
    assert!(is_link(&source));
    assert_eq!(snapshot_tree(&source).unwrap(), before);

    let target = migrated.job.target_path.clone().unwrap();
    let backup = migrated.job.backup_path.clone();
    let recorder = Arc::new(StepRecorder::default());
    let restored = orchestrator.rollback(migrated.job, recorder.clone()).await;

    assert!(restored.success, "{:?}", restored.error);
    assert_eq!(restored.job.state, MoveStep::Idle);
    assert_eq!(restored.job.target_path, None);
    assert_eq!(restored.job.backup_path, None);
    assert!(!is_link(&source));
    assert_eq!(snapshot_tree(&source).unwrap(), before);
    assert!(!target.exists());
    assert!(backup.map_or(true, |backup| !backup.exists()));
    assert_eq!(recorder.steps_of(&restored.job.id), [MoveStep::Cleaning]);
}

#[tokio::test]
async fn test_rollback_keeps_data_written_after_migration() {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let source = job.source_path.clone();
    let orchestrator = Orchestrator::default();

    let migrated = orchestrator
        .run(
            vec![job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap()
        .remove(0);
    assert!(migrated.success, "{:?}", migrated.error);
    let backup = migrated.job.backup_path.clone().unwrap();
    let target = migrated.job.target_path.clone().unwrap();

    // The application keeps working through the link
    fs::write(source.join("settings.json"), br#"{"theme":"NEW"}"#).unwrap();
    fs::write(source.join("new_save.dat"), b"slot 1").unwrap();
    let live = snapshot_tree(&source).unwrap();

    let restored = orchestrator.rollback(migrated.job, Arc::new(NoopReporter)).await;
    assert!(restored.success, "{:?}", restored.error);
    assert_eq!(restored.job.state, MoveStep::Idle);
    assert!(!is_link(&source));
    assert_eq!(snapshot_tree(&source).unwrap(), live);
    assert_eq!(
        fs::read(source.join("settings.json")).unwrap(),
        br#"{"theme":"NEW"}"#
    );
    assert!(!target.exists());
    assert!(!backup.exists());
}

#[tokio::test]
async fn test_rollback_failure_is_reported_and_counted() {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let orchestrator = Orchestrator::default();

    let migrated = orchestrator
        .run(
            vec![job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap()
        .remove(0);
    assert!(migrated.success, "{:?}", migrated.error);
    fs::remove_dir_all(migrated.job.target_path.as_ref().unwrap()).unwrap();
    fs::remove_dir_all(migrated.job.backup_path.as_ref().unwrap()).unwrap();

    let failed = orchestrator.rollback(migrated.job, Arc::new(NoopReporter)).await;
    assert!(!failed.success);
    assert_eq!(failed.error_kind, Some(ErrorKind::RollbackFailed));
    assert_eq!(failed.job.state, MoveStep::Error);
    assert!(failed.job.rollback_failed);
    assert!(failed.job.last_error.as_deref().unwrap().contains("Rollback failed"));

    let summary = BatchSummary::from_results(std::slice::from_ref(&failed));
    assert_eq!(summary.rollback_failed, 1);
    assert!(!summary.all_succeeded());
}

#[tokio::test]
async fn test_rerun_after_mkdir_failure_succeeds() {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let conflicting = workspace.volume().join("Editor");
    create_tree(&conflicting, &[("keep.txt", &b"belongs to someone else"[..])]).unwrap();
    let orchestrator = Orchestrator::default();

    let failed = orchestrator
        .run(
            vec![job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap()
        .remove(0);
    assert_eq!(failed.error_kind, Some(ErrorKind::Io));
    assert_eq!(failed.job.state, MoveStep::Error);
    assert_eq!(failed.job.target_path, None);
    assert!(failed.error.as_deref().unwrap().contains("Editor"));

    // Rolling back a job that never created its target leaves the conflicting path alone
    let reset = orchestrator
        .rollback(failed.job, Arc::new(NoopReporter))
        .await;
    assert!(reset.success, "{:?}", reset.error);
    assert_eq!(reset.job.state, MoveStep::Idle);
    assert!(conflicting.join("keep.txt").exists());

    fs::remove_dir_all(&conflicting).unwrap();
    let rerun = orchestrator
        .run(
            vec![reset.job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap()
        .remove(0);
    assert!(rerun.success, "{:?}", rerun.error);
    assert_eq!(rerun.job.state, MoveStep::Completed);
}

#[tokio::test]
async fn test_parallel_batch_isolates_failing_job() {
    let workspace = Workspace::new();
    let names = ["Alpha", "Bravo", "Charlie", "Delta", "Echo"];
    let jobs: Vec<Job> = names.iter().map(|name| workspace.job(name)).collect();
    let sources: Vec<PathBuf> = jobs.iter().map(|job| job.source_path.clone()).collect();
    let charlie_before = snapshot_tree(&sources[2]).unwrap();
    let config = MigrationConfig {
        parallel_execution: true,
        ..MigrationConfig::default()
    };

    let results = orchestrator_with(FaultyExecutor::new().with_fault("Charlie", Fault::Mklink))
        .run(jobs, &workspace.volume(), config, Arc::new(NoopReporter))
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|result| result.success).count(), 4);
    let failures: Vec<&MigrationResult> = results.iter().filter(|result| !result.success).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].job.name, "Charlie");
    assert_eq!(failures[0].error_kind, Some(ErrorKind::Io));
    assert!(!is_link(&sources[2]));
    assert_eq!(snapshot_tree(&sources[2]).unwrap(), charlie_before);

    for (name, source) in names.iter().zip(&sources) {
        if *name == "Charlie" {
            continue;
        }
        let result = result_named(&results, name);
        assert_eq!(result.job.state, MoveStep::Completed);
        assert!(is_link(source));
        assert_eq!(
            fs::canonicalize(source).unwrap(),
            fs::canonicalize(workspace.volume().join(name)).unwrap()
        );
    }
}

#[tokio::test]
async fn test_sequential_batch_continues_after_failure() {
    let workspace = Workspace::new();
    let jobs = vec![workspace.job("First"), workspace.job("Second")];

    let results = orchestrator_with(FaultyExecutor::new().with_fault("First", Fault::Copy))
        .run(
            jobs,
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap();

    assert_eq!(results[0].job.name, "First");
    assert!(!results[0].success);
    assert_eq!(results[1].job.name, "Second");
    assert!(results[1].success, "{:?}", results[1].error);
}

#[tokio::test]
async fn test_verification_mismatch_keeps_link_until_rollback() {
    let workspace = Workspace::new();
    let job = workspace.job("Editor");
    let source = job.source_path.clone();
    let before = snapshot_tree(&source).unwrap();
    let orchestrator =
        orchestrator_with(FaultyExecutor::new().with_fault("Editor", Fault::TamperTarget));

    let failed = orchestrator
        .run(
            vec![job],
            &workspace.volume(),
            MigrationConfig::default(),
            Arc::new(NoopReporter),
        )
        .await
        .unwrap()
        .remove(0);
    assert_eq!(failed.error_kind, Some(ErrorKind::VerificationMismatch));
    assert!(is_link(&source));
    assert!(failed.job.backup_path.is_some());

    let restored = orchestrator.rollback(failed.job, Arc::new(NoopReporter)).await;
    assert!(restored.success, "{:?}", restored.error);
    assert!(!is_link(&source));
    assert_eq!(snapshot_tree(&source).unwrap(), before);
}
