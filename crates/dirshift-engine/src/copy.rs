//! Chunked tree copy with cooperative cancellation

use crate::manifest::{EntryKind, Manifest};
use crate::registry::CancelHandle;
use crate::step::ProgressSink;
use dirshift_types::error::IoContext;
use dirshift_types::{CopyStats, Error, MoveStep, Result, StepProgress};
use filetime::FileTime;
use std::path::Path;
use std::time::Instant;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Running byte and file counters of one step
#[derive(Debug)]
pub(crate) struct Counters {
    step: MoveStep,
    bytes_done: u64,
    bytes_total: u64,
    files_done: u64,
    files_total: u64,
}

impl Counters {
    pub(crate) fn new(step: MoveStep, manifest: &Manifest) -> Self {
        Self {
            step,
            bytes_done: 0,
            bytes_total: manifest.total_bytes(),
            files_done: 0,
            files_total: manifest.file_count(),
        }
    }

    fn percent(&self) -> u8 {
        if self.bytes_total > 0 {
            StepProgress::ratio(self.bytes_done, self.bytes_total)
        } else {
            StepProgress::ratio(self.files_done, self.files_total)
        }
    }

    pub(crate) fn add_bytes(&mut self, bytes: u64) {
        self.bytes_done += bytes;
    }

    pub(crate) fn finish_file(&mut self) {
        self.files_done += 1;
    }

    pub(crate) fn report(&self, sink: &ProgressSink, current: &Path) {
        sink.report(
            StepProgress::new(self.step, self.percent())
                .with_file(current)
                .with_bytes(self.bytes_done, self.bytes_total)
                .with_files(self.files_done, self.files_total),
        );
    }
}

/// Settings for one tree copy
pub(crate) struct TreeCopy<'a> {
    pub from: &'a Path,
    pub to: &'a Path,
    pub chunk_size: usize,
    pub hash: bool,
    pub cancel: &'a CancelHandle,
    pub sink: &'a ProgressSink,
    pub step: MoveStep,
}

impl TreeCopy<'_> {
    /// Copy every manifest entry from `from` to `to`
    ///
    /// Cancellation is checked before each entry and before each chunk. Digests are
    /// stored back into the manifest when `hash` is set.
    pub(crate) async fn run(&self, manifest: &mut Manifest) -> Result<CopyStats> {
        let start = Instant::now();
        let mut stats = CopyStats::new();
        let mut counters = Counters::new(self.step, manifest);
        let mut buffer = vec![0u8; self.chunk_size];

        for entry in manifest.entries_mut() {
            self.cancel.check()?;
            let source = self.from.join(&entry.relative);
            let destination = self.to.join(&entry.relative);

            match entry.kind {
                EntryKind::Dir => {
                    fs::create_dir_all(&destination)
                        .await
                        .io_context("creating directory", &destination)?;
                    stats.directories_created += 1;
                }
                EntryKind::Symlink => {
                    let link_target = entry
                        .link_target
                        .as_deref()
                        .ok_or_else(|| Error::other("symlink entry without destination"))?;
                    copy_symlink(&source, link_target, &destination).await?;
                    stats.symlinks_copied += 1;
                }
                EntryKind::File => {
                    let (bytes, digest) = self
                        .copy_file(&source, &destination, &mut buffer, &mut counters)
                        .await?;
                    entry.hash = digest;
                    stats.files_copied += 1;
                    stats.bytes_copied += bytes;
                    counters.finish_file();
                    counters.report(self.sink, &entry.relative);
                }
            }
        }

        stats.duration = start.elapsed();
        debug!(
            "Copied {} files ({} bytes) from {} to {}",
            stats.files_copied,
            stats.bytes_copied,
            self.from.display(),
            self.to.display()
        );
        Ok(stats)
    }

    async fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        buffer: &mut [u8],
        counters: &mut Counters,
    ) -> Result<(u64, Option<blake3::Hash>)> {
        let metadata = fs::metadata(source)
            .await
            .io_context("reading metadata of", source)?;
        let mut reader = File::open(source)
            .await
            .io_context("opening source file", source)?;
        let mut writer = File::create(destination)
            .await
            .io_context("creating target file", destination)?;
        let mut hasher = self.hash.then(blake3::Hasher::new);
        let mut copied = 0u64;

        loop {
            self.cancel.check()?;
            let read = reader
                .read(buffer)
                .await
                .io_context("reading", source)?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .io_context("writing", destination)?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..read]);
            }
            copied += read as u64;
            counters.add_bytes(read as u64);
            counters.report(self.sink, source);
        }

        writer.flush().await.io_context("flushing", destination)?;
        writer.sync_all().await.io_context("syncing", destination)?;
        drop(writer);

        fs::set_permissions(destination, metadata.permissions())
            .await
            .io_context("setting permissions on", destination)?;
        filetime::set_file_mtime(destination, FileTime::from_last_modification_time(&metadata))
            .io_context("setting modification time on", destination)?;

        Ok((copied, hasher.map(|hasher| hasher.finalize())))
    }
}

async fn copy_symlink(source: &Path, link_target: &Path, destination: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let _ = source;
        fs::symlink(link_target, destination)
            .await
            .io_context("creating symlink", destination)
    }
    #[cfg(windows)]
    {
        let is_dir = fs::metadata(source).await.map(|m| m.is_dir()).unwrap_or(false);
        let created = if is_dir {
            fs::symlink_dir(link_target, destination).await
        } else {
            fs::symlink_file(link_target, destination).await
        };
        created.io_context("creating symlink", destination)
    }
}

/// Hash a file in `chunk_size` pieces, checking for cancellation before each chunk
pub(crate) async fn hash_file<F>(
    path: &Path,
    chunk_size: usize,
    cancel: &CancelHandle,
    mut on_chunk: F,
) -> Result<blake3::Hash>
where
    F: FnMut(u64),
{
    let mut reader = File::open(path).await.io_context("opening", path)?;
    let mut buffer = vec![0u8; chunk_size];
    let mut hasher = blake3::Hasher::new();

    loop {
        cancel.check()?;
        let read = reader.read(&mut buffer).await.io_context("reading", path)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        on_chunk(read as u64);
    }

    Ok(hasher.finalize())
}
