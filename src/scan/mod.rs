//! Directory scanner
//!
//! Lists every regular file below a build output directory. Symlinks and
//! directories are never returned and symlinked directories are not entered.
//! Any error reading the tree aborts the scan: uploading half a build is
//! worse than uploading none of it. A file whose path is not valid UTF-8
//! has no faithful object key, so it aborts the scan too.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Scan errors
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("File name is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("Failed to walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Recursively list the regular files under `root`.
///
/// Returned paths are `root` joined with each file's relative path, in no
/// particular order.
pub fn scan_directory(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let metadata = std::fs::metadata(root).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ScanError::NotFound(root.to_path_buf()),
        _ => ScanError::Io {
            path: root.to_path_buf(),
            source,
        },
    })?;

    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf()),
            source,
        })?;

        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if relative.to_str().is_none() {
                return Err(ScanError::NonUtf8Path(entry.into_path()));
            }
            files.push(entry.into_path());
        }
    }

    tracing::debug!(root = %root.display(), files = files.len(), "Scanned directory");
    Ok(files)
}

/// [`scan_directory`] on the blocking thread pool
pub async fn scan_directory_async(root: PathBuf) -> Result<Vec<PathBuf>, ScanError> {
    let path = root.clone();
    tokio::task::spawn_blocking(move || scan_directory(&root))
        .await
        .map_err(|e| ScanError::Io {
            path,
            source: io::Error::other(e),
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        fs::create_dir_all(dir.path().join("assets/js")).unwrap();
        fs::write(dir.path().join("assets/js/main.js"), "console.log(1)").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let mut files = scan_directory(dir.path()).unwrap();
        files.sort();

        assert_eq!(
            files,
            vec![
                dir.path().join("assets/js/main.js"),
                dir.path().join("index.html"),
            ]
        );
    }

    #[test]
    fn test_scan_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = scan_directory(&missing).unwrap_err();
        assert!(matches!(err, ScanError::NotFound(ref p) if p == &missing));
    }

    #[test]
    fn test_scan_file_instead_of_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bundle.js");
        fs::write(&file, "x").unwrap();
        let err = scan_directory(&file).unwrap_err();
        assert!(matches!(err, ScanError::NotADirectory(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "x").unwrap();
        fs::write(dir.path().join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked-dir")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("alias.txt"))
            .unwrap();

        let files = scan_directory(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("real.txt")]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_rejects_non_utf8_file_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let bad = dir.path().join(OsStr::from_bytes(b"bad\xff.js"));
        fs::write(&bad, "x").unwrap();

        let err = scan_directory(dir.path()).unwrap_err();
        assert!(matches!(err, ScanError::NonUtf8Path(ref p) if p == &bad));
    }

    #[tokio::test]
    async fn test_scan_async() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.css"), "body{}").unwrap();
        let files = scan_directory_async(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(files.len(), 1);
    }
}
