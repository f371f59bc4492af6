use conduit_core::Record;
use path_clean::PathClean;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub(crate) enum RestoreError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create {path}: {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open content of {pathname}: {source}")]
    Open {
        pathname: String,
        source: std::io::Error,
    },
    #[error("refusing to write through symlink {path}")]
    SymlinkInPath { path: PathBuf },
    #[error("failed to write {path}: {source}")]
    Copy {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Maps a record pathname to a location under `root`.
///
/// Leading separators are dropped and `..` components cannot climb above
/// `root`.
pub(crate) fn destination(root: &Path, pathname: &str) -> PathBuf {
    let anchored = Path::new("/").join(pathname.trim_start_matches(['/', '\\'])).clean();
    let relative = anchored.strip_prefix("/").unwrap_or(&anchored);
    root.join(relative)
}

/// Materializes one record under `root`, returning the written path.
///
/// Nothing is written through a symlink: an existing symlink between `root`
/// and the destination fails the record, and one at the destination itself
/// is replaced rather than followed.
pub(crate) async fn restore_record(root: &Path, record: &mut Record) -> Result<PathBuf, RestoreError> {
    let dest = destination(root, &record.pathname);

    if record.file_info.is_dir() {
        refuse_symlinks(root, &dest).await?;
        fs::create_dir_all(&dest)
            .await
            .map_err(|source| RestoreError::CreateDir {
                path: dest.clone(),
                source,
            })?;
        return Ok(dest);
    }

    if let Some(parent) = dest.parent() {
        refuse_symlinks(root, parent).await?;
        fs::create_dir_all(parent)
            .await
            .map_err(|source| RestoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    #[cfg(unix)]
    if !record.target.is_empty() {
        let _ = fs::remove_file(&dest).await;
        fs::symlink(&record.target, &dest)
            .await
            .map_err(|source| RestoreError::CreateFile {
                path: dest.clone(),
                source,
            })?;
        return Ok(dest);
    }

    // Open the content first so a failure leaves any existing file intact.
    let pathname = record.pathname.clone();
    let reader = record
        .reader()
        .await
        .map_err(|source| RestoreError::Open { pathname, source })?;

    remove_stale_link(&dest).await?;
    let mut file = fs::File::create(&dest)
        .await
        .map_err(|source| RestoreError::CreateFile {
            path: dest.clone(),
            source,
        })?;
    if let Some(reader) = reader {
        tokio::io::copy(reader, &mut file)
            .await
            .map_err(|source| RestoreError::Copy {
                path: dest.clone(),
                source,
            })?;
    }
    file.flush().await.map_err(|source| RestoreError::Copy {
        path: dest.clone(),
        source,
    })?;
    record.close();

    Ok(dest)
}

/// Fails when an existing component of `path` below `root` is a symlink.
async fn refuse_symlinks(root: &Path, path: &Path) -> Result<(), RestoreError> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Ok(());
    };
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(RestoreError::SymlinkInPath { path: current });
            }
            Ok(_) => {}
            // Nothing exists below a missing component yet.
            Err(_) => break,
        }
    }
    Ok(())
}

/// Removes a symlink sitting at `dest` so the write cannot follow it.
async fn remove_stale_link(dest: &Path) -> Result<(), RestoreError> {
    match fs::symlink_metadata(dest).await {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(dest)
                .await
                .map_err(|source| RestoreError::CreateFile {
                    path: dest.to_path_buf(),
                    source,
                })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{FileInfo, MemorySource};
    use std::time::SystemTime;

    fn record(pathname: &str, data: &[u8]) -> Record {
        Record::new(
            pathname,
            "",
            FileInfo {
                name: pathname.rsplit('/').next().unwrap_or_default().into(),
                size: data.len() as u64,
                mode: 0o100_644,
                mod_time: SystemTime::UNIX_EPOCH,
                dev: 1,
            },
            Some(Box::new(MemorySource::new(data.to_vec()))),
        )
    }

    #[test]
    #[cfg(unix)]
    fn destination_stays_under_root() {
        let root = Path::new("/tmp/dst");
        assert_eq!(destination(root, "x/y.txt"), Path::new("/tmp/dst/x/y.txt"));
        assert_eq!(destination(root, "/x/y.txt"), Path::new("/tmp/dst/x/y.txt"));
        assert_eq!(
            destination(root, "../../etc/passwd"),
            Path::new("/tmp/dst/etc/passwd")
        );
        assert_eq!(
            destination(root, "a/../../b/./c"),
            Path::new("/tmp/dst/b/c")
        );
    }

    #[tokio::test]
    async fn writes_content_and_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = record("x/y.txt", b"0123456789");
        let path = restore_record(tmp.path(), &mut rec).await.unwrap();

        assert_eq!(path, tmp.path().join("x/y.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");
        assert!(!rec.is_open());
    }

    #[tokio::test]
    async fn directory_records_create_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rec = Record::metadata_only(
            "nested/dir",
            FileInfo {
                name: "dir".into(),
                size: 0,
                mode: 0o040_755,
                mod_time: SystemTime::UNIX_EPOCH,
                dev: 1,
            },
        );
        restore_record(tmp.path(), &mut rec).await.unwrap();
        assert!(tmp.path().join("nested/dir").is_dir());
    }

    #[tokio::test]
    async fn blocked_parent_reports_directory_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blocker"), b"file").unwrap();
        let mut rec = record("blocker/inner.txt", b"data");
        let err = restore_record(tmp.path(), &mut rec).await.unwrap_err();
        assert!(matches!(err, RestoreError::CreateDir { .. }));
    }

    #[derive(Debug)]
    struct UnreadableSource;

    #[async_trait::async_trait]
    impl conduit_core::ContentSource for UnreadableSource {
        async fn open(self: Box<Self>) -> std::io::Result<conduit_core::ContentReader> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    fn link(pathname: &str, target: &Path) -> Record {
        Record::new(
            pathname,
            target.to_string_lossy(),
            FileInfo {
                name: pathname.into(),
                size: 0,
                mode: 0o120_777,
                mod_time: SystemTime::UNIX_EPOCH,
                dev: 1,
            },
            None,
        )
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn restored_symlinks_are_not_written_through() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("dst");
        let outside = outer.path().join("outside");
        std::fs::create_dir(&outside).unwrap();

        restore_record(&root, &mut link("link", &outside))
            .await
            .unwrap();
        let err = restore_record(&root, &mut record("link/evil.txt", b"evil"))
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::SymlinkInPath { .. }));
        assert!(!outside.join("evil.txt").exists());

        let err = restore_record(&root, &mut record("link/deeper/evil.txt", b"evil"))
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::SymlinkInPath { .. }));
        assert!(!outside.join("deeper").exists());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn symlink_at_destination_is_replaced() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("dst");
        std::fs::create_dir(&root).unwrap();
        let victim = outer.path().join("victim.txt");
        std::fs::write(&victim, b"original").unwrap();
        std::os::unix::fs::symlink(&victim, root.join("a.txt")).unwrap();

        restore_record(&root, &mut record("a.txt", b"restored"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&victim).unwrap(), b"original");
        let written = root.join("a.txt");
        assert!(!std::fs::symlink_metadata(&written).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read(&written).unwrap(), b"restored");
    }

    #[tokio::test]
    async fn unreadable_content_keeps_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("keep.txt"), b"previous").unwrap();
        let mut rec = Record::new(
            "keep.txt",
            "",
            FileInfo {
                name: "keep.txt".into(),
                size: 3,
                mode: 0o100_644,
                mod_time: SystemTime::UNIX_EPOCH,
                dev: 1,
            },
            Some(Box::new(UnreadableSource)),
        );

        let err = restore_record(tmp.path(), &mut rec).await.unwrap_err();
        assert!(matches!(err, RestoreError::Open { .. }));
        assert_eq!(
            std::fs::read(tmp.path().join("keep.txt")).unwrap(),
            b"previous"
        );
    }
}
