//! Directory links: symlinks on Unix, junctions on Windows

use dirshift_types::JobId;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Sibling path the source directory is moved to while the link is created
pub fn staging_path(source: &Path, job_id: &JobId) -> PathBuf {
    let name = source
        .file_name()
        .map_or_else(|| "source".into(), |name| name.to_string_lossy());
    let staged = format!(".{}.dirshift-{}.bak", name, job_id.short());
    match source.parent() {
        Some(parent) => parent.join(staged),
        None => PathBuf::from(staged),
    }
}

/// Check whether `path` itself is a link, without following it
pub async fn is_dir_link(path: &Path) -> bool {
    // Junctions report as symlinks too
    fs::symlink_metadata(path)
        .await
        .is_ok_and(|metadata| metadata.file_type().is_symlink())
}

/// Check whether anything exists at `path`, dangling links included
pub async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

/// Create a directory link at `link` pointing to `target`
#[cfg(unix)]
pub async fn create_dir_link(link: &Path, target: &Path) -> io::Result<()> {
    fs::symlink(target, link).await
}

/// Create a directory link at `link` pointing to `target`
#[cfg(windows)]
pub async fn create_dir_link(link: &Path, target: &Path) -> io::Result<()> {
    // Junctions need no privilege, unlike directory symlinks
    let output = tokio::process::Command::new("cmd")
        .arg("/C")
        .arg("mklink")
        .arg("/J")
        .arg(link)
        .arg(target)
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("mklink /J failed: {}", stderr.trim()),
        ))
    }
}

/// Remove a directory link without touching what it points to
#[cfg(unix)]
pub async fn remove_dir_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link).await
}

/// Remove a directory link without touching what it points to
#[cfg(windows)]
pub async fn remove_dir_link(link: &Path) -> io::Result<()> {
    fs::remove_dir(link).await
}

/// Check that `link` resolves to the same directory as `target`
pub async fn resolves_to(link: &Path, target: &Path) -> io::Result<bool> {
    let resolved = fs::canonicalize(link).await?;
    let expected = fs::canonicalize(target).await?;
    Ok(resolved == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staging = staging_path(
            Path::new("/data/Steam"),
            &JobId::from("0123456789abcdef"),
        );
        assert_eq!(staging, PathBuf::from("/data/.Steam.dirshift-01234567.bak"));
    }

    #[tokio::test]
    async fn test_link_round_trip() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let link = temp.path().join("link");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("file.txt"), b"through the link").unwrap();

        create_dir_link(&link, &target).await.unwrap();
        assert!(is_dir_link(&link).await);
        assert!(!is_dir_link(&target).await);
        assert!(resolves_to(&link, &target).await.unwrap());
        assert_eq!(
            std::fs::read(link.join("file.txt")).unwrap(),
            b"through the link"
        );

        remove_dir_link(&link).await.unwrap();
        assert!(!exists(&link).await);
        assert!(target.join("file.txt").exists());
    }
}
