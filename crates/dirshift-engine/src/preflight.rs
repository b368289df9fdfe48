//! Batch checks performed before any filesystem mutation

use dirshift_types::{Error, Job, Result};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Source of free-space figures for a target volume
pub trait SpaceProbe: Send + Sync {
    /// Bytes available to the current user on the volume holding `path`
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Space probe backed by `statvfs` / `GetDiskFreeSpaceEx`
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs2SpaceProbe;

impl SpaceProbe for Fs2SpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        // The target root may not exist yet
        let existing = path
            .ancestors()
            .find(|ancestor| ancestor.exists())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no existing ancestor"))?;
        fs2::available_space(existing)
    }
}

fn validate_name(job: &Job) -> Result<()> {
    let mut components = Path::new(&job.name).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if job.name.trim().is_empty()
        || !single_normal
        || job.name.contains(['/', '\\'])
        || job.name.chars().any(char::is_control)
    {
        return Err(Error::invalid_job(
            job.id.as_str(),
            format!("'{}' cannot be used as a directory name", job.name),
        ));
    }
    Ok(())
}

fn collision_key(path: &Path) -> String {
    let key = path.to_string_lossy().into_owned();
    if cfg!(any(windows, target_os = "macos")) {
        key.to_lowercase()
    } else {
        key
    }
}

/// Derive each job's target as `target_root / name`, rejecting unusable batches
///
/// Targets are returned in job order.
pub fn derive_targets(jobs: &[Job], target_root: &Path) -> Result<Vec<PathBuf>> {
    let mut ids = HashSet::new();
    let mut claimed: HashMap<String, &Job> = HashMap::new();
    let mut targets = Vec::with_capacity(jobs.len());

    for job in jobs {
        if !ids.insert(&job.id) {
            return Err(Error::DuplicateJob {
                id: job.id.to_string(),
            });
        }
        validate_name(job)?;

        let target = target_root.join(&job.name);
        if let Some(first) = claimed.insert(collision_key(&target), job) {
            return Err(Error::PathConflict {
                path: target,
                first: first.id.to_string(),
                second: job.id.to_string(),
            });
        }
        targets.push(target);
    }

    Ok(targets)
}

/// Fail with `InsufficientSpace` when the batch does not fit on the target volume
pub fn check_capacity(jobs: &[Job], target_root: &Path, probe: &dyn SpaceProbe) -> Result<()> {
    let required: u64 = jobs.iter().map(|job| job.size_bytes).sum();
    if required == 0 {
        return Ok(());
    }

    let available = probe
        .available_space(target_root)
        .map_err(|e| Error::io("probing free space of", target_root, e))?;
    debug!(
        "Capacity check at {}: {} required, {} available",
        target_root.display(),
        required,
        available
    );

    if required > available {
        return Err(Error::InsufficientSpace {
            path: target_root.to_path_buf(),
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirshift_types::JobId;
    use rstest::rstest;

    struct FixedProbe(u64);

    impl SpaceProbe for FixedProbe {
        fn available_space(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.0)
        }
    }

    fn job(id: &str, name: &str, size: u64) -> Job {
        Job::new(JobId::from(id), name, format!("/apps/{}", id), size)
    }

    #[test]
    fn test_targets_follow_names() {
        let jobs = vec![job("a", "Steam", 1), job("b", "Discord", 1)];
        let targets = derive_targets(&jobs, Path::new("/volume")).unwrap();
        assert_eq!(
            targets,
            vec![PathBuf::from("/volume/Steam"), PathBuf::from("/volume/Discord")]
        );
    }

    #[test]
    fn test_colliding_targets_are_rejected() {
        let jobs = vec![job("a", "Steam", 1), job("b", "Steam", 1)];
        let error = derive_targets(&jobs, Path::new("/volume")).unwrap_err();
        match error {
            Error::PathConflict { first, second, .. } => {
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(windows)]
    #[test]
    fn test_collision_is_case_insensitive_on_windows() {
        let jobs = vec![job("a", "Steam", 1), job("b", "STEAM", 1)];
        assert!(derive_targets(&jobs, Path::new("D:\\Apps")).is_err());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let jobs = vec![job("a", "Steam", 1), job("a", "Discord", 1)];
        let error = derive_targets(&jobs, Path::new("/volume")).unwrap_err();
        assert!(matches!(error, Error::DuplicateJob { .. }));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case(".")]
    #[case("..")]
    #[case("nested/dir")]
    #[case("nested\\dir")]
    fn test_unusable_names(#[case] name: &str) {
        let jobs = vec![job("a", name, 1)];
        let error = derive_targets(&jobs, Path::new("/volume")).unwrap_err();
        assert!(matches!(error, Error::InvalidJob { .. }));
    }

    #[test]
    fn test_capacity() {
        let jobs = vec![job("a", "Steam", 600), job("b", "Discord", 500)];
        assert!(check_capacity(&jobs, Path::new("/volume"), &FixedProbe(1100)).is_ok());

        let error = check_capacity(&jobs, Path::new("/volume"), &FixedProbe(1000)).unwrap_err();
        assert!(matches!(
            error,
            Error::InsufficientSpace {
                required: 1100,
                available: 1000,
                ..
            }
        ));
        assert!(error.is_preflight());
    }

    #[test]
    fn test_fs2_probe_walks_up_to_existing_ancestor() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("not/yet/created");
        assert!(Fs2SpaceProbe.available_space(&missing).is_ok());
    }
}
