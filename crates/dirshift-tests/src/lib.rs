//! Shared fixtures for dirshift integration tests
//!
//! Provides source-tree builders, byte-level tree snapshots and a step executor
//! that injects failures into chosen jobs.

#![warn(missing_docs)]
#![warn(clippy::all)]

use async_trait::async_trait;
use dirshift_engine::{FsStepExecutor, Manifest, RollbackPlan, StepContext, StepExecutor};
use dirshift_types::{CopyStats, Error, Job, JobId, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Write `files` (relative path, content) below `root`, creating directories as needed
pub fn create_tree(root: &Path, files: &[(&str, &[u8])]) -> io::Result<()> {
    fs::create_dir_all(root)?;
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
    }
    Ok(())
}

/// Deterministic, non-repeating content of `size` bytes
pub fn pattern(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| ((i * 31 + usize::from(seed) * 7) % 251) as u8)
        .collect()
}

/// Create a small application folder at `root/name` and return it as an idle job
///
/// The folder holds nested directories, an empty directory, an empty file and a
/// file spanning several copy chunks.
pub fn app_folder(root: &Path, name: &str) -> io::Result<Job> {
    let source = root.join(name);
    let large = pattern(300 * 1024, name.len() as u8);
    let shard = pattern(4096, 1);
    create_tree(
        &source,
        &[
            ("settings.json", &br#"{"theme":"dark"}"#[..]),
            ("cache/index.db", large.as_slice()),
            ("cache/shards/0001.bin", shard.as_slice()),
            ("logs/empty.log", &b""[..]),
        ],
    )?;
    fs::create_dir_all(source.join("plugins/disabled"))?;
    #[cfg(unix)]
    std::os::unix::fs::symlink("settings.json", source.join("settings.link"))?;

    let size = snapshot_tree(&source)?
        .values()
        .map(|entry| match entry {
            TreeEntry::File(content) => content.len() as u64,
            _ => 0,
        })
        .sum();
    Ok(Job::new(JobId::generate(), name, source, size))
}

/// One entry of a tree snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    /// A directory
    Dir,
    /// A regular file and its content
    File(Vec<u8>),
    /// A symbolic link and its destination
    Symlink(PathBuf),
}

/// Byte-level snapshot of the tree below `root`, keyed by relative path
///
/// A link at `root` itself is followed, so the snapshot of a migrated folder
/// describes the migrated content.
pub fn snapshot_tree(root: &Path) -> io::Result<BTreeMap<PathBuf, TreeEntry>> {
    let mut snapshot = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_path_buf();
        let file_type = entry.file_type();
        let value = if file_type.is_symlink() {
            TreeEntry::Symlink(fs::read_link(entry.path())?)
        } else if file_type.is_dir() {
            TreeEntry::Dir
        } else {
            TreeEntry::File(fs::read(entry.path())?)
        };
        snapshot.insert(relative, value);
    }
    Ok(snapshot)
}

/// Check whether `path` is a directory link rather than a real directory
pub fn is_link(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(false)
}

/// Where a [`FaultyExecutor`] fails a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail after the copy wrote the target, before returning success
    Copy,
    /// Fail link creation without touching the source
    Mklink,
    /// Change a target file behind the engine's back before verification
    TamperTarget,
}

/// Step executor that delegates to [`FsStepExecutor`] and fails selected jobs
#[derive(Debug, Default)]
pub struct FaultyExecutor {
    inner: FsStepExecutor,
    faults: HashMap<String, Fault>,
}

impl FaultyExecutor {
    /// Create an executor without faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject `fault` into the job named `name`
    pub fn with_fault<S: Into<String>>(mut self, name: S, fault: Fault) -> Self {
        self.faults.insert(name.into(), fault);
        self
    }

    fn fault(&self, ctx: &StepContext) -> Option<Fault> {
        self.faults.get(&ctx.name).copied()
    }
}

fn injected(operation: &str, path: &Path, kind: io::ErrorKind) -> Error {
    Error::io(operation, path, io::Error::new(kind, "injected fault"))
}

#[async_trait]
impl StepExecutor for FaultyExecutor {
    async fn create_target(&self, ctx: &StepContext) -> Result<()> {
        self.inner.create_target(ctx).await
    }

    async fn capture_manifest(&self, ctx: &StepContext) -> Result<Manifest> {
        self.inner.capture_manifest(ctx).await
    }

    async fn copy_tree(&self, ctx: &StepContext, manifest: &mut Manifest) -> Result<CopyStats> {
        let stats = self.inner.copy_tree(ctx, manifest).await?;
        if self.fault(ctx) == Some(Fault::Copy) {
            return Err(injected("copying", &ctx.target, io::ErrorKind::BrokenPipe));
        }
        Ok(stats)
    }

    async fn create_link(&self, ctx: &StepContext) -> Result<PathBuf> {
        if self.fault(ctx) == Some(Fault::Mklink) {
            return Err(injected(
                "creating directory link",
                &ctx.source,
                io::ErrorKind::PermissionDenied,
            ));
        }
        self.inner.create_link(ctx).await
    }

    async fn verify(&self, ctx: &StepContext, manifest: &Manifest) -> Result<()> {
        if self.fault(ctx) == Some(Fault::TamperTarget) {
            let path = ctx.target.join("settings.json");
            fs::write(&path, br#"{"theme":"LIGHT"}"#)
                .map_err(|e| Error::io("tampering with", &path, e))?;
        }
        self.inner.verify(ctx, manifest).await
    }

    async fn release_source(&self, ctx: &StepContext, staging: &Path) -> Result<Option<PathBuf>> {
        self.inner.release_source(ctx, staging).await
    }

    async fn rollback(&self, ctx: &StepContext, plan: &RollbackPlan) -> Result<()> {
        self.inner.rollback(ctx, plan).await
    }
}
