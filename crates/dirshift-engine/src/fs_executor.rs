//! Step executor backed by the real filesystem

use crate::copy::{hash_file, Counters, TreeCopy};
use crate::link;
use crate::manifest::{EntryKind, Manifest};
use crate::registry::CancelHandle;
use crate::step::{ProgressSink, RollbackPlan, StepContext, StepExecutor};
use async_trait::async_trait;
use dirshift_types::error::IoContext;
use dirshift_types::{CopyStats, Error, MoveStep, Result};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Executes migration steps against the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStepExecutor;

impl FsStepExecutor {
    /// Create a new filesystem executor
    pub fn new() -> Self {
        Self
    }
}

/// Resolve `path` through its nearest existing ancestor
async fn resolve(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing).await {
            return rest
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

async fn remove_any(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else if metadata.file_type().is_symlink() {
        link::remove_dir_link(path).await
    } else {
        fs::remove_file(path).await
    }
}

/// Move a tree, falling back to copy and delete when rename is not possible
async fn move_tree(from: &Path, to: &Path, chunk_size: usize) -> Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) => debug!(
            "Rename {} -> {} failed ({}), copying instead",
            from.display(),
            to.display(),
            e
        ),
    }

    let from_owned = from.to_path_buf();
    let mut manifest = tokio::task::spawn_blocking(move || Manifest::capture(&from_owned))
        .await
        .map_err(|e| Error::other(format!("Manifest task failed: {}", e)))??;

    fs::create_dir_all(to)
        .await
        .io_context("creating directory", to)?;
    let cancel = CancelHandle::new();
    let sink = ProgressSink::disabled(dirshift_types::JobId::from("move"));
    TreeCopy {
        from,
        to,
        chunk_size,
        hash: false,
        cancel: &cancel,
        sink: &sink,
        step: MoveStep::Cleaning,
    }
    .run(&mut manifest)
    .await?;

    fs::remove_dir_all(from)
        .await
        .io_context("removing directory", from)
}

fn rollback_error(what: &str, error: impl std::fmt::Display) -> Error {
    Error::rollback_failed(format!("{}: {}", what, error))
}

#[async_trait]
impl StepExecutor for FsStepExecutor {
    async fn create_target(&self, ctx: &StepContext) -> Result<()> {
        let source_meta = fs::symlink_metadata(&ctx.source)
            .await
            .io_context("reading source directory", &ctx.source)?;
        if source_meta.file_type().is_symlink() {
            return Err(Error::invalid_job(
                ctx.job_id.as_str(),
                format!("'{}' is already a directory link", ctx.source.display()),
            ));
        }
        if !source_meta.is_dir() {
            return Err(Error::invalid_job(
                ctx.job_id.as_str(),
                format!("'{}' is not a directory", ctx.source.display()),
            ));
        }

        let source = resolve(&ctx.source).await;
        let target = resolve(&ctx.target).await;
        if target.starts_with(&source) || source.starts_with(&target) {
            return Err(Error::invalid_job(
                ctx.job_id.as_str(),
                "source and target directories overlap",
            ));
        }

        if link::exists(&ctx.target).await {
            if !ctx.config.overwrite_existing {
                return Err(Error::io(
                    "creating target directory",
                    &ctx.target,
                    io::Error::new(io::ErrorKind::AlreadyExists, "target already exists"),
                ));
            }
            warn!(
                "Job {}: removing existing target {}",
                ctx.job_id,
                ctx.target.display()
            );
            remove_any(&ctx.target)
                .await
                .io_context("removing existing target", &ctx.target)?;
        }

        fs::create_dir_all(&ctx.target)
            .await
            .io_context("creating target directory", &ctx.target)
    }

    async fn capture_manifest(&self, ctx: &StepContext) -> Result<Manifest> {
        ctx.check_cancelled()?;
        let source = ctx.source.clone();
        tokio::task::spawn_blocking(move || Manifest::capture(&source))
            .await
            .map_err(|e| Error::other(format!("Manifest task failed: {}", e)))?
    }

    async fn copy_tree(&self, ctx: &StepContext, manifest: &mut Manifest) -> Result<CopyStats> {
        TreeCopy {
            from: &ctx.source,
            to: &ctx.target,
            chunk_size: ctx.engine.chunk_size.get(),
            hash: ctx.engine.verify_mode.hashes_content(),
            cancel: ctx.cancel_handle(),
            sink: ctx.sink(),
            step: MoveStep::Copy,
        }
        .run(manifest)
        .await
    }

    async fn create_link(&self, ctx: &StepContext) -> Result<PathBuf> {
        ctx.check_cancelled()?;
        let staging = link::staging_path(&ctx.source, &ctx.job_id);
        if link::exists(&staging).await {
            return Err(Error::io(
                "moving source aside to",
                &staging,
                io::Error::new(io::ErrorKind::AlreadyExists, "staging path already exists"),
            ));
        }

        fs::rename(&ctx.source, &staging)
            .await
            .io_context("moving source aside", &ctx.source)?;

        if let Err(error) = link::create_dir_link(&ctx.source, &ctx.target).await {
            warn!(
                "Job {}: link creation failed, restoring {}",
                ctx.job_id,
                ctx.source.display()
            );
            if let Err(restore) = fs::rename(&staging, &ctx.source).await {
                return Err(rollback_error(
                    &format!(
                        "link creation failed ({}) and the source could not be restored from '{}'",
                        error,
                        staging.display()
                    ),
                    restore,
                ));
            }
            return Err(Error::io("creating directory link", &ctx.source, error));
        }

        info!(
            "Job {}: linked {} -> {}",
            ctx.job_id,
            ctx.source.display(),
            ctx.target.display()
        );
        Ok(staging)
    }

    async fn verify(&self, ctx: &StepContext, manifest: &Manifest) -> Result<()> {
        ctx.check_cancelled()?;
        let target = ctx.target.clone();
        let actual = tokio::task::spawn_blocking(move || Manifest::capture(&target))
            .await
            .map_err(|e| Error::other(format!("Manifest task failed: {}", e)))??;
        manifest.compare_structure(&actual, &ctx.target)?;

        if ctx.engine.verify_mode.hashes_content() {
            let mut counters = Counters::new(MoveStep::Verifying, manifest);
            for entry in manifest.entries() {
                if entry.kind != EntryKind::File {
                    continue;
                }
                let path = ctx.target.join(&entry.relative);
                let digest = hash_file(
                    &path,
                    ctx.engine.chunk_size.get(),
                    ctx.cancel_handle(),
                    |bytes| counters.add_bytes(bytes),
                )
                .await?;
                if entry.hash.is_some_and(|expected| expected != digest) {
                    return Err(Error::mismatch(path, "content hash differs"));
                }
                counters.finish_file();
                counters.report(ctx.sink(), &entry.relative);
            }
        }

        let resolves = link::resolves_to(&ctx.source, &ctx.target)
            .await
            .io_context("resolving link", &ctx.source)?;
        if !resolves {
            return Err(Error::mismatch(
                &ctx.source,
                "link does not resolve to the target directory",
            ));
        }

        Ok(())
    }

    async fn release_source(&self, ctx: &StepContext, staging: &Path) -> Result<Option<PathBuf>> {
        if ctx.config.create_backup {
            info!(
                "Job {}: original kept as backup at {}",
                ctx.job_id,
                staging.display()
            );
            return Ok(Some(staging.to_path_buf()));
        }

        fs::remove_dir_all(staging)
            .await
            .io_context("removing original source", staging)?;
        Ok(None)
    }

    async fn rollback(&self, ctx: &StepContext, plan: &RollbackPlan) -> Result<()> {
        let source = &ctx.source;
        ctx.report_percent(MoveStep::Cleaning, 0);

        if link::is_dir_link(source).await {
            link::remove_dir_link(source)
                .await
                .map_err(|e| rollback_error("removing directory link", e))?;
        }
        ctx.report_percent(MoveStep::Cleaning, 33);

        let mut stale_backup = None;
        if !link::exists(source).await {
            let backup = match &plan.backup {
                Some(backup) if link::exists(backup).await => Some(backup),
                _ => None,
            };
            let target = match &plan.target {
                Some(target) if link::exists(target).await => Some(target),
                _ => None,
            };

            match (target, backup) {
                (Some(target), backup) if plan.from == MoveStep::Completed => {
                    move_tree(target, source, ctx.engine.chunk_size.get())
                        .await
                        .map_err(|e| rollback_error("moving data back from target", e))?;
                    debug!("Job {}: moved live data back from {}", ctx.job_id, target.display());
                    stale_backup = backup;
                }
                (_, Some(backup)) => {
                    fs::rename(backup, source)
                        .await
                        .map_err(|e| rollback_error("restoring source from backup", e))?;
                    debug!("Job {}: restored original from {}", ctx.job_id, backup.display());
                }
                (Some(target), None) => {
                    move_tree(target, source, ctx.engine.chunk_size.get())
                        .await
                        .map_err(|e| rollback_error("moving data back from target", e))?;
                }
                (None, None) => {
                    return Err(Error::rollback_failed(format!(
                        "no copy of '{}' left to restore",
                        source.display()
                    )));
                }
            }
        }
        ctx.report_percent(MoveStep::Cleaning, 66);

        if let Some(target) = &plan.target {
            if link::exists(target).await {
                fs::remove_dir_all(target)
                    .await
                    .map_err(|e| rollback_error("deleting target directory", e))?;
            }
        }
        if let Some(backup) = stale_backup {
            fs::remove_dir_all(backup)
                .await
                .map_err(|e| rollback_error("deleting superseded backup", e))?;
        }
        ctx.report_percent(MoveStep::Cleaning, 100);

        Ok(())
    }
}
