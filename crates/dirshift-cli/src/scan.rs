//! Drive enumeration and folder discovery

use anyhow::{Context, Result};
use dirshift_types::{DiskInfo, FolderCandidate, JobId, RiskAssessment};
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use walkdir::WalkDir;

/// List mounted volumes
pub fn list_drives() -> Vec<DiskInfo> {
    let disks = Disks::new_with_refreshed_list();
    let mut drives: Vec<DiskInfo> = disks
        .list()
        .iter()
        .map(|disk| {
            let mount_point = disk.mount_point().to_path_buf();
            let name = disk.name().to_string_lossy();
            let display_name = if name.is_empty() {
                mount_point.display().to_string()
            } else {
                format!("{} ({})", name, disk.file_system().to_string_lossy())
            };
            let total_space = disk.total_space();
            let free_space = disk.available_space();
            DiskInfo {
                id: mount_point.display().to_string(),
                display_name,
                path: mount_point,
                total_space,
                free_space,
                used_space: total_space.saturating_sub(free_space),
            }
        })
        .collect();
    drives.sort_by(|a, b| a.path.cmp(&b.path));
    drives
}

/// Volume holding `path`, picking the deepest matching mount point
pub fn drive_for<'a>(drives: &'a [DiskInfo], path: &Path) -> Option<&'a DiskInfo> {
    drives
        .iter()
        .filter(|drive| drive.contains(path))
        .max_by_key(|drive| drive.path.components().count())
}

/// Best-effort size of a directory tree; unreadable entries are skipped
pub fn folder_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// A folder proposed for migration together with its advisory assessment
#[derive(Debug, Clone)]
pub struct ScannedFolder {
    /// Candidate job
    pub candidate: FolderCandidate,
    /// Keyword based assessment
    pub assessment: RiskAssessment,
}

/// Describe one directory as a migration candidate
pub fn describe(path: &Path) -> Result<ScannedFolder> {
    let source_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to resolve the working directory")?
            .join(path)
    };
    let name = source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' has no directory name", path.display()))?;

    Ok(ScannedFolder {
        assessment: RiskAssessment::heuristic(&source_path, &name),
        candidate: FolderCandidate {
            id: JobId::generate(),
            size_bytes: folder_size(&source_path),
            name,
            source_path,
        },
    })
}

/// Immediate subdirectories of `root`, largest first
///
/// Directory links are skipped since they are most likely migrated already.
pub fn scan_folders(root: &Path) -> Result<Vec<ScannedFolder>> {
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to read directory '{}'", root.display()))?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read '{}'", root.display()))?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() && !file_type.is_symlink() {
            paths.push(entry.path());
        }
    }

    let mut folders = paths
        .iter()
        .map(|path| describe(path))
        .collect::<Result<Vec<_>>>()?;
    folders.sort_by(|a, b| b.candidate.size_bytes.cmp(&a.candidate.size_bytes));
    Ok(folders)
}
