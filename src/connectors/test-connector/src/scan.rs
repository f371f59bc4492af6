use conduit_core::{
    CancellationToken, ConnectorError, ConnectorResult, FileInfo, FileSource, Record,
    RecordSender,
};
use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ScanStats {
    pub emitted: usize,
    pub skipped: usize,
}

/// Walks `root` depth-first in file-name order, sending one record per
/// non-directory entry.
///
/// Runs on a blocking thread. Entries below the root that cannot be read are
/// skipped; a root that cannot be read fails the scan.
pub(crate) fn scan_tree(
    root: &Path,
    records: &RecordSender,
    cancel: &CancellationToken,
) -> ConnectorResult<ScanStats> {
    let mut stats = ScanStats::default();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(ConnectorError::Enumeration {
                    path: root.display().to_string(),
                    message: err.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(path = ?err.path(), error = %err, "Skipping unreadable entry");
                stats.skipped += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "Skipping entry without metadata");
                stats.skipped += 1;
                continue;
            }
        };

        if records.blocking_send(record_for(&entry, &metadata)).is_err() {
            tracing::debug!(path = %root.display(), "Host stopped reading records");
            break;
        }
        stats.emitted += 1;
    }
    Ok(stats)
}

fn record_for(entry: &DirEntry, metadata: &Metadata) -> Record {
    let path = entry.path();
    let info = FileInfo {
        name: entry.file_name().to_string_lossy().into_owned(),
        size: metadata.len(),
        mode: mode_bits(metadata),
        mod_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        dev: device_id(metadata),
    };
    let pathname = path.to_string_lossy().into_owned();

    if entry.path_is_symlink() {
        let target = std::fs::read_link(path)
            .map(|t| t.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Record::new(pathname, target, info, None);
    }
    Record::new(pathname, "", info, Some(Box::new(FileSource::new(path))))
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    let kind = if metadata.file_type().is_symlink() {
        0o120_000
    } else {
        0o100_000
    };
    let perm = if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    };
    kind | perm
}

#[cfg(unix)]
fn device_id(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.dev()
}

#[cfg(not(unix))]
fn device_id(_metadata: &Metadata) -> u64 {
    1
}
