//! Records and their acknowledgments.
//!
//! A [`Record`] describes one transferable file. Its content is not read until
//! the consumer asks for it: the record carries a [`ContentSource`] token that
//! is spent on the first call to [`Record::reader`]. The opened stream lives
//! inside the record and is closed when the record is closed, acknowledged via
//! [`Record::ok`] / [`Record::error`], or dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::io::AsyncRead;

/// Stream returned by a [`ContentSource`].
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

const MODE_TYPE_MASK: u32 = 0o170_000;
const MODE_DIR: u32 = 0o040_000;

/// Metadata carried by a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// Unix-style type and permission bits.
    pub mode: u32,
    pub mod_time: SystemTime,
    /// Device (or synthetic origin) identifier.
    pub dev: u64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_DIR
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Capability to open a record's content exactly once.
///
/// Implementations bundle whatever is needed to reach the content (a path, a
/// client handle) and nothing else.
#[async_trait]
pub trait ContentSource: Send + Sync + fmt::Debug {
    async fn open(self: Box<Self>) -> io::Result<ContentReader>;
}

/// Content backed by a file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContentSource for FileSource {
    async fn open(self: Box<Self>) -> io::Result<ContentReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }
}

/// Content held in memory; used by hosts that stage data themselves.
#[derive(Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("len", &self.data.len())
            .finish()
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    async fn open(self: Box<Self>) -> io::Result<ContentReader> {
        Ok(Box::new(io::Cursor::new(self.data)))
    }
}

enum Content {
    Pending(Box<dyn ContentSource>),
    Open(ContentReader),
    Closed,
}

/// One transferable unit produced by an importer or fed to an exporter.
pub struct Record {
    /// Source path (import) or path relative to the destination root (export).
    pub pathname: String,
    /// Link target for symbolic links, empty otherwise.
    pub target: String,
    pub file_info: FileInfo,
    content: Content,
}

impl Record {
    pub fn new(
        pathname: impl Into<String>,
        target: impl Into<String>,
        file_info: FileInfo,
        source: Option<Box<dyn ContentSource>>,
    ) -> Self {
        Self {
            pathname: pathname.into(),
            target: target.into(),
            file_info,
            content: match source {
                Some(source) => Content::Pending(source),
                None => Content::Closed,
            },
        }
    }

    /// A record without content (directories, metadata-only entries).
    pub fn metadata_only(pathname: impl Into<String>, file_info: FileInfo) -> Self {
        Self::new(pathname, "", file_info, None)
    }

    /// Whether the content accessor has not been spent yet.
    pub fn has_content(&self) -> bool {
        matches!(self.content, Content::Pending(_))
    }

    pub fn is_open(&self) -> bool {
        matches!(self.content, Content::Open(_))
    }

    /// Opens the content on first call and returns the open stream.
    ///
    /// The accessor runs at most once: later calls return the stream opened
    /// by the first call, or `None` once it was closed or if the record never
    /// had content. A failed open consumes the accessor as well.
    pub async fn reader(&mut self) -> io::Result<Option<&mut ContentReader>> {
        if matches!(self.content, Content::Pending(_)) {
            if let Content::Pending(source) = std::mem::replace(&mut self.content, Content::Closed)
            {
                self.content = Content::Open(source.open().await?);
            }
        }
        match &mut self.content {
            Content::Open(reader) => Ok(Some(reader)),
            _ => Ok(None),
        }
    }

    /// Releases the content stream if open, or discards the unspent accessor.
    ///
    /// Calling this more than once has no further effect.
    pub fn close(&mut self) {
        self.content = Content::Closed;
    }

    /// Acknowledges successful processing, closing the content.
    pub fn ok(self) -> TransferResult {
        TransferResult {
            pathname: self.pathname,
            outcome: Outcome::Ok,
        }
    }

    /// Acknowledges a failure, closing the content.
    pub fn error(self, err: impl fmt::Display) -> TransferResult {
        TransferResult::failed(self.pathname, err)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = match &self.content {
            Content::Pending(_) => "pending",
            Content::Open(_) => "open",
            Content::Closed => "closed",
        };
        f.debug_struct("Record")
            .field("pathname", &self.pathname)
            .field("target", &self.target)
            .field("file_info", &self.file_info)
            .field("content", &content)
            .finish()
    }
}

/// Outcome of processing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Failed { error: String },
}

/// Acknowledgment correlated to a record by its pathname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub pathname: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl TransferResult {
    pub fn failed(pathname: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            pathname: pathname.into(),
            outcome: Outcome::Failed {
                error: err.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Ok => None,
            Outcome::Failed { error } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn info(name: &str, size: u64) -> FileInfo {
        FileInfo {
            name: name.into(),
            size,
            mode: 0o100_644,
            mod_time: SystemTime::UNIX_EPOCH,
            dev: 1,
        }
    }

    #[derive(Debug)]
    struct CountingSource {
        opens: Arc<AtomicUsize>,
        data: Vec<u8>,
    }

    #[async_trait]
    impl ContentSource for CountingSource {
        async fn open(self: Box<Self>) -> io::Result<ContentReader> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(io::Cursor::new(self.data)))
        }
    }

    #[derive(Debug)]
    struct BrokenSource;

    #[async_trait]
    impl ContentSource for BrokenSource {
        async fn open(self: Box<Self>) -> io::Result<ContentReader> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    #[tokio::test]
    async fn accessor_runs_at_most_once() {
        let opens = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            opens: opens.clone(),
            data: b"hello".to_vec(),
        };
        let mut record = Record::new("/a.txt", "", info("a.txt", 5), Some(Box::new(source)));
        assert!(record.has_content());

        let mut buf = String::new();
        record
            .reader()
            .await
            .unwrap()
            .expect("content")
            .read_to_string(&mut buf)
            .await
            .unwrap();
        assert_eq!(buf, "hello");
        assert!(record.is_open());

        assert!(record.reader().await.unwrap().is_some());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_repeatable() {
        let mut record = Record::new(
            "/a.txt",
            "",
            info("a.txt", 1),
            Some(Box::new(MemorySource::new(b"x".to_vec()))),
        );
        record.reader().await.unwrap();
        record.close();
        record.close();
        assert!(!record.is_open());
        assert!(record.reader().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_open_spends_accessor() {
        let mut record = Record::new("/a", "", info("a", 0), Some(Box::new(BrokenSource)));
        let err = record.reader().await.err().expect("expected open to fail");
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(!record.has_content());
        assert!(record.reader().await.unwrap().is_none());
    }

    #[test]
    fn acknowledgments_carry_pathname() {
        let ok = Record::metadata_only("/dir", info("dir", 0)).ok();
        assert!(ok.is_ok());
        assert_eq!(ok.pathname, "/dir");

        let failed = Record::metadata_only("/x", info("x", 0)).error("disk full");
        assert!(!failed.is_ok());
        assert_eq!(failed.error(), Some("disk full"));
    }

    #[test]
    fn directory_mode_detected() {
        let mut dir = info("b", 0);
        dir.mode = 0o040_755;
        assert!(dir.is_dir());
        assert_eq!(dir.permissions(), 0o755);
        assert!(!info("a", 0).is_dir());
    }

    #[test]
    fn result_serializes_flat() {
        let json = serde_json::to_string(&TransferResult::failed("/a", "boom")).unwrap();
        assert_eq!(json, r#"{"pathname":"/a","status":"failed","error":"boom"}"#);
    }
}
