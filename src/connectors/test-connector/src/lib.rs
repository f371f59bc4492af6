//! Reference `test` connector: imports from and exports to a local directory.
//!
//! Locations look like `test:///path/to/root`. The remainder after `test://`
//! is used as-is: no environment or `~` expansion and no canonicalization.
//! Relative paths are resolved by the host because the connector declares
//! [`Flags::LOCALFS`]. Whether the root exists is only checked by `ping` and
//! `import`, so an export destination may be created later.

mod restore;
mod scan;

use async_trait::async_trait;
use conduit_core::location::strip_location;
use conduit_core::{
    CancellationToken, Connector, ConnectorConfig, ConnectorError, ConnectorOptions,
    ConnectorResult, Exporter, Flags, Importer, RecordReceiver, RecordSender, RegistryBuilder,
    RegistryError, ResultReceiver, ResultSender,
};
use std::path::{Path, PathBuf};

pub const PROTOCOL: &str = "test";
pub const FLAGS: Flags = Flags::LOCALFS;

#[derive(Debug, Clone)]
pub struct TestConnector {
    root: String,
    origin: String,
}

impl TestConnector {
    pub fn new(
        options: &ConnectorOptions,
        protocol: &str,
        config: &ConnectorConfig,
    ) -> ConnectorResult<Self> {
        let root = strip_location(protocol, config)?;
        Ok(Self {
            root,
            origin: options.hostname.clone(),
        })
    }

    fn root_path(&self) -> &Path {
        Path::new(&self.root)
    }
}

pub fn new_importer(
    options: &ConnectorOptions,
    protocol: &str,
    config: &ConnectorConfig,
) -> ConnectorResult<Box<dyn Importer>> {
    Ok(Box::new(TestConnector::new(options, protocol, config)?))
}

pub fn new_exporter(
    options: &ConnectorOptions,
    protocol: &str,
    config: &ConnectorConfig,
) -> ConnectorResult<Box<dyn Exporter>> {
    Ok(Box::new(TestConnector::new(options, protocol, config)?))
}

/// Registers the `test` importer and exporter.
pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    builder.register_importer(PROTOCOL, FLAGS, new_importer)?;
    builder.register_exporter(PROTOCOL, FLAGS, new_exporter)
}

#[async_trait]
impl Connector for TestConnector {
    fn root(&self) -> &str {
        &self.root
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn kind(&self) -> &str {
        PROTOCOL
    }

    fn flags(&self) -> Flags {
        FLAGS
    }

    async fn ping(&self, _cancel: &CancellationToken) -> ConnectorResult<()> {
        tokio::fs::metadata(&self.root)
            .await
            .map(|_| ())
            .map_err(|source| ConnectorError::Unreachable {
                path: self.root.clone(),
                source,
            })
    }

    async fn close(&self, _cancel: &CancellationToken) -> ConnectorResult<()> {
        tracing::debug!(root = %self.root, "Closing test connector");
        Ok(())
    }
}

#[async_trait]
impl Importer for TestConnector {
    async fn import(
        &self,
        cancel: &CancellationToken,
        records: RecordSender,
        _results: ResultReceiver,
    ) -> ConnectorResult<()> {
        let root = PathBuf::from(&self.root);
        let cancel = cancel.clone();
        let stats = tokio::task::spawn_blocking(move || scan::scan_tree(&root, &records, &cancel))
            .await
            .map_err(|e| ConnectorError::Protocol {
                message: format!("scan task failed: {e}"),
            })??;

        tracing::info!(
            root = %self.root,
            emitted = stats.emitted,
            skipped = stats.skipped,
            "Import finished"
        );
        Ok(())
    }
}

/// Records still queued when `cancel` fires are left undrained; they are
/// dropped unopened with the receiver.
#[async_trait]
impl Exporter for TestConnector {
    async fn export(
        &self,
        cancel: &CancellationToken,
        mut records: RecordReceiver,
        results: ResultSender,
    ) -> ConnectorResult<()> {
        let (mut restored, mut failed) = (0usize, 0usize);
        loop {
            let mut record = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
                next = records.recv() => match next {
                    Some(record) => record,
                    None => break,
                },
            };

            let result = match restore::restore_record(self.root_path(), &mut record).await {
                Ok(path) => {
                    tracing::debug!(path = %path.display(), "Restored record");
                    restored += 1;
                    record.ok()
                }
                Err(err) => {
                    tracing::warn!(pathname = %record.pathname, error = %err, "Failed to restore record");
                    failed += 1;
                    record.error(err)
                }
            };

            if results.send(result).is_err() {
                return Err(ConnectorError::Protocol {
                    message: "host closed the result channel during export".into(),
                });
            }
        }

        tracing::info!(root = %self.root, restored, failed, "Export finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{record_channel, result_channel, FileInfo, MemorySource, Record};
    use std::time::SystemTime;

    fn config(location: &str) -> ConnectorConfig {
        ConnectorConfig::from([("location".to_string(), location.to_string())])
    }

    fn connector(root: &Path) -> TestConnector {
        TestConnector::new(
            &ConnectorOptions::default(),
            PROTOCOL,
            &config(&format!("test://{}", root.display())),
        )
        .unwrap()
    }

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
    fn construction_strips_protocol() {
        let c = TestConnector::new(
            &ConnectorOptions::default(),
            PROTOCOL,
            &config("test:///tmp/src"),
        )
        .unwrap();
        assert_eq!(c.root(), "/tmp/src");
        assert_eq!(c.origin(), "localhost");
        assert_eq!(c.kind(), "test");
        assert_eq!(c.flags(), Flags::LOCALFS);
    }

    #[test]
    fn construction_requires_location() {
        let err = TestConnector::new(
            &ConnectorOptions::default(),
            PROTOCOL,
            &ConnectorConfig::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConnectorError::MissingLocation));

        let err = TestConnector::new(&ConnectorOptions::default(), PROTOCOL, &config("test://"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::EmptyLocation { .. }));
    }

    #[test]
    fn construction_does_not_touch_the_filesystem() {
        let c = TestConnector::new(
            &ConnectorOptions::default(),
            PROTOCOL,
            &config("test:///definitely/not/here"),
        );
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn ping_reports_unreachable_root() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        assert!(connector(tmp.path()).ping(&cancel).await.is_ok());
        // Repeated pings are fine.
        assert!(connector(tmp.path()).ping(&cancel).await.is_ok());

        let err = connector(&tmp.path().join("gone"))
            .ping(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn import_closes_channel_on_root_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let c = connector(&tmp.path().join("missing"));
        let (tx, mut rx) = record_channel(4);
        let (_ack_tx, ack_rx) = result_channel();

        let err = c
            .import(&CancellationToken::new(), tx, ack_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Enumeration { .. }));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_import_closes_channel() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(tmp.path().join("b")).unwrap();
        std::fs::write(tmp.path().join("b/c.txt"), b"abc").unwrap();
        let c = connector(tmp.path());
        let (tx, mut rx) = record_channel(4);
        let (_ack_tx, ack_rx) = result_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = c.import(&cancel, tx, ack_rx).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Cancelled));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn export_continues_after_failure() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("blocker"), b"file").unwrap();
        let c = connector(tmp.path());

        let (tx, rx) = record_channel(4);
        let (res_tx, mut res_rx) = result_channel();
        tx.send(record("blocker/a.txt", b"aaa")).await.unwrap();
        tx.send(record("ok/b.txt", b"bbb")).await.unwrap();
        drop(tx);

        c.export(&CancellationToken::new(), rx, res_tx)
            .await
            .unwrap();
        let results = res_rx.collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].pathname, "blocker/a.txt");
        assert!(!results[0].is_ok());
        assert!(results[1].is_ok());
        assert_eq!(std::fs::read(tmp.path().join("ok/b.txt")).unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn export_observes_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let c = connector(tmp.path());
        let (tx, rx) = record_channel(4);
        let (res_tx, mut res_rx) = result_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Queued but never drained; the sender stays open.
        tx.send(record("/queued.txt", b"x")).await.unwrap();

        let err = c.export(&cancel, rx, res_tx).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Cancelled));
        assert!(res_rx.recv().await.is_none());
        assert!(!tmp.path().join("queued.txt").exists());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let c = connector(tmp.path());
        let cancel = CancellationToken::new();
        c.close(&cancel).await.unwrap();
        c.close(&cancel).await.unwrap();
    }
}
