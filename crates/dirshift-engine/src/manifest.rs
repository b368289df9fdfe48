//! Snapshot of a directory tree, captured before Copy and checked after Mklink

use dirshift_types::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link, never followed
    Symlink,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "directory"),
            Self::Symlink => write!(f, "symlink"),
        }
    }
}

/// One entry of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the tree root
    pub relative: PathBuf,
    /// Entry kind
    pub kind: EntryKind,
    /// File size in bytes, zero for directories and links
    pub size: u64,
    /// Link destination for symlinks
    pub link_target: Option<PathBuf>,
    /// blake3 digest of the file content, filled in while copying
    pub hash: Option<blake3::Hash>,
}

/// Ordered listing of a directory tree
///
/// Parents always precede their children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Walk `root` without following links
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::other(format!("Entry outside of tree root: {}", e)))?
                .to_path_buf();
            let file_type = entry.file_type();

            let (kind, size, link_target) = if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path())
                    .map_err(|e| Error::io("reading link", entry.path(), e))?;
                (EntryKind::Symlink, 0, Some(target))
            } else if file_type.is_dir() {
                (EntryKind::Dir, 0, None)
            } else if !file_type.is_file() {
                return Err(Error::io(
                    "reading",
                    entry.path(),
                    std::io::Error::new(std::io::ErrorKind::Unsupported, "unsupported file type"),
                ));
            } else {
                let metadata = entry
                    .metadata()
                    .map_err(|e| walk_error(root, e))?;
                (EntryKind::File, metadata.len(), None)
            };

            entries.push(ManifestEntry {
                relative,
                kind,
                size,
                link_target,
                hash: None,
            });
        }

        Ok(Self { entries })
    }

    /// Entries in walk order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [ManifestEntry] {
        &mut self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tree is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of regular files
    pub fn file_count(&self) -> u64 {
        self.entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .count() as u64
    }

    /// Total size of all regular files
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }

    /// Check this manifest against a freshly captured listing of the copy
    ///
    /// Compares the entry set, kinds, sizes and link destinations. Content digests
    /// are compared separately since they need file reads.
    pub fn compare_structure(&self, actual: &Manifest, root: &Path) -> Result<()> {
        let found: HashMap<&Path, &ManifestEntry> = actual
            .entries
            .iter()
            .map(|entry| (entry.relative.as_path(), entry))
            .collect();

        for expected in &self.entries {
            let path = root.join(&expected.relative);
            let Some(entry) = found.get(expected.relative.as_path()) else {
                return Err(Error::mismatch(path, "missing from target"));
            };
            if entry.kind != expected.kind {
                return Err(Error::mismatch(
                    path,
                    format!("expected {}, found {}", expected.kind, entry.kind),
                ));
            }
            if entry.size != expected.size {
                return Err(Error::mismatch(
                    path,
                    format!("expected {} bytes, found {}", expected.size, entry.size),
                ));
            }
            if entry.link_target != expected.link_target {
                return Err(Error::mismatch(path, "link destination differs"));
            }
        }

        if actual.len() != self.len() {
            let known: HashMap<&Path, ()> = self
                .entries
                .iter()
                .map(|entry| (entry.relative.as_path(), ()))
                .collect();
            if let Some(extra) = actual
                .entries
                .iter()
                .find(|entry| !known.contains_key(entry.relative.as_path()))
            {
                return Err(Error::mismatch(
                    root.join(&extra.relative),
                    "not present in source",
                ));
            }
        }

        Ok(())
    }
}

fn walk_error(root: &Path, error: walkdir::Error) -> Error {
    let path = error
        .path()
        .map_or_else(|| root.to_path_buf(), Path::to_path_buf);
    match error.into_io_error() {
        Some(source) => Error::io("walking directory", path, source),
        None => Error::other(format!("Filesystem loop detected at '{}'", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("config/nested")).unwrap();
        std::fs::write(dir.path().join("config/settings.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("config/nested/data.bin"), vec![7u8; 1000]).unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"hello").unwrap();
        dir
    }

    #[test]
    fn test_capture_orders_parents_first() {
        let dir = tree();
        let manifest = Manifest::capture(dir.path()).unwrap();

        assert_eq!(manifest.len(), 5);
        assert_eq!(manifest.file_count(), 3);
        assert_eq!(manifest.total_bytes(), 1007);

        let position = |name: &str| {
            manifest
                .entries()
                .iter()
                .position(|entry| entry.relative == Path::new(name))
                .unwrap()
        };
        assert!(position("config") < position("config/nested"));
        assert!(position("config/nested") < position("config/nested/data.bin"));
    }

    #[test]
    fn test_compare_identical_trees() {
        let dir = tree();
        let first = Manifest::capture(dir.path()).unwrap();
        let second = Manifest::capture(dir.path()).unwrap();
        assert!(first.compare_structure(&second, dir.path()).is_ok());
    }

    #[test]
    fn test_compare_detects_size_change() {
        let dir = tree();
        let before = Manifest::capture(dir.path()).unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"hello world").unwrap();
        let after = Manifest::capture(dir.path()).unwrap();

        let error = before.compare_structure(&after, dir.path()).unwrap_err();
        assert!(matches!(error, Error::VerificationMismatch { .. }));
        assert!(error.to_string().contains("readme.txt"));
    }

    #[test]
    fn test_compare_detects_missing_and_extra() {
        let dir = tree();
        let before = Manifest::capture(dir.path()).unwrap();

        std::fs::write(dir.path().join("extra.log"), b"x").unwrap();
        let with_extra = Manifest::capture(dir.path()).unwrap();
        let error = before.compare_structure(&with_extra, dir.path()).unwrap_err();
        assert!(error.to_string().contains("not present in source"));

        std::fs::remove_file(dir.path().join("readme.txt")).unwrap();
        let without = Manifest::capture(dir.path()).unwrap();
        let error = before.compare_structure(&without, dir.path()).unwrap_err();
        assert!(error.to_string().contains("missing from target"));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_records_symlinks_without_following() {
        let dir = tree();
        std::os::unix::fs::symlink("config", dir.path().join("alias")).unwrap();

        let manifest = Manifest::capture(dir.path()).unwrap();
        let alias = manifest
            .entries()
            .iter()
            .find(|entry| entry.relative == Path::new("alias"))
            .unwrap();
        assert_eq!(alias.kind, EntryKind::Symlink);
        assert_eq!(alias.link_target.as_deref(), Some(Path::new("config")));
        // The link's children are not walked
        assert_eq!(manifest.len(), 6);
    }
}
