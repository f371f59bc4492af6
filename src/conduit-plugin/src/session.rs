//! Drivers for opened connectors.
//!
//! Every driver creates fresh channels per call, hands the sending halves to
//! the side that produces on them, and runs both ends concurrently on the
//! current task. Result channels are unbounded, so a connector that is still
//! sending records never waits on the host draining acknowledgments.

use crate::host::HostError;
use crate::protocol::PluginInfo;
use conduit_core::{
    record_channel, result_channel, CancellationToken, ChannelClosed, Exporter, Flags, Importer,
    Record, TransferResult,
};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

/// Tally of per-record outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub records: usize,
    pub succeeded: usize,
    pub failed: Vec<TransferResult>,
}

impl TransferSummary {
    fn tally(&mut self, result: &TransferResult) {
        self.records += 1;
        if result.is_ok() {
            self.succeeded += 1;
        } else {
            self.failed.push(result.clone());
        }
    }

    /// True when every record succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// An importer that passed the handshake.
pub struct ImporterHandle {
    info: PluginInfo,
    inner: Box<dyn Importer>,
    record_buffer: usize,
    consumed: bool,
}

impl ImporterHandle {
    pub(crate) fn new(info: PluginInfo, inner: Box<dyn Importer>, record_buffer: usize) -> Self {
        Self {
            info,
            inner,
            record_buffer,
            consumed: false,
        }
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), HostError> {
        self.inner
            .ping(cancel)
            .await
            .map_err(|e| HostError::connector(&self.info.protocol, e))
    }

    /// Runs one import, handing every record to `visit`.
    ///
    /// The visitor owns the record and returns its outcome. Outcomes are
    /// forwarded to the importer only when it declares [`Flags::NEEDACK`].
    pub async fn import_with<F, Fut>(
        &mut self,
        cancel: &CancellationToken,
        mut visit: F,
    ) -> Result<TransferSummary, HostError>
    where
        F: FnMut(Record) -> Fut,
        Fut: Future<Output = TransferResult>,
    {
        self.claim()?;
        let (records_tx, mut records_rx) = record_channel(self.record_buffer);
        let (acks_tx, acks_rx) = result_channel();
        let acks_tx = self.info.flags.contains(Flags::NEEDACK).then_some(acks_tx);

        let consume = async move {
            let mut summary = TransferSummary::default();
            while let Some(record) = records_rx.recv().await {
                let result = visit(record).await;
                summary.tally(&result);
                if let Some(acks) = &acks_tx {
                    let _ = acks.send(result);
                }
            }
            summary
        };

        let (imported, summary) =
            tokio::join!(self.inner.import(cancel, records_tx, acks_rx), consume);
        imported.map_err(|e| HostError::connector(&self.info.protocol, e))?;

        tracing::debug!(
            protocol = %self.info.protocol,
            records = summary.records,
            failed = summary.failed.len(),
            "Import drained"
        );
        Ok(summary)
    }

    pub async fn close(self, cancel: &CancellationToken) -> Result<(), HostError> {
        self.inner
            .close(cancel)
            .await
            .map_err(|e| HostError::connector(&self.info.protocol, e))
    }

    /// Single-pass importers may only be imported from once.
    fn claim(&mut self) -> Result<(), HostError> {
        if self.consumed && self.info.flags.contains(Flags::STREAM) {
            return Err(HostError::StreamConsumed {
                protocol: self.info.protocol.clone(),
            });
        }
        self.consumed = true;
        Ok(())
    }
}

/// An exporter that passed the handshake.
pub struct ExporterHandle {
    info: PluginInfo,
    inner: Box<dyn Exporter>,
    record_buffer: usize,
}

impl ExporterHandle {
    pub(crate) fn new(info: PluginInfo, inner: Box<dyn Exporter>, record_buffer: usize) -> Self {
        Self {
            info,
            inner,
            record_buffer,
        }
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), HostError> {
        self.inner
            .ping(cancel)
            .await
            .map_err(|e| HostError::connector(&self.info.protocol, e))
    }

    /// Feeds `records` to the exporter and collects one result per record.
    pub async fn export<I>(
        &self,
        cancel: &CancellationToken,
        records: I,
    ) -> Result<TransferSummary, HostError>
    where
        I: IntoIterator<Item = Record>,
    {
        let (records_tx, records_rx) = record_channel(self.record_buffer);
        let (results_tx, mut results_rx) = result_channel();

        let feed = async move {
            let mut sent = 0usize;
            for record in records {
                if records_tx.send(record).await.is_err() {
                    break;
                }
                sent += 1;
            }
            sent
        };
        let collect = async move {
            let mut summary = TransferSummary::default();
            while let Some(result) = results_rx.recv().await {
                summary.tally(&result);
            }
            summary
        };

        let (exported, sent, summary) = tokio::join!(
            self.inner.export(cancel, records_rx, results_tx),
            feed,
            collect
        );
        exported.map_err(|e| HostError::connector(&self.info.protocol, e))?;
        check_result_count(sent, &summary)?;
        Ok(summary)
    }

    pub async fn close(self, cancel: &CancellationToken) -> Result<(), HostError> {
        self.inner
            .close(cancel)
            .await
            .map_err(|e| HostError::connector(&self.info.protocol, e))
    }
}

fn check_result_count(sent: usize, summary: &TransferSummary) -> Result<(), HostError> {
    if sent == summary.records {
        Ok(())
    } else {
        Err(HostError::ResultCountMismatch {
            sent,
            received: summary.records,
        })
    }
}

/// Rewrites an importer pathname relative to the importer root.
///
/// Pathnames outside the root are passed through unchanged.
pub fn rebase(pathname: &str, root: &str) -> String {
    match Path::new(pathname).strip_prefix(root) {
        Ok(relative) => format!("/{}", relative.to_string_lossy()),
        Err(_) => pathname.to_string(),
    }
}

/// Pipes every record of `importer` into `exporter`.
///
/// Exporter results are acknowledged back to the importer under the
/// importer's original pathnames when it declares [`Flags::NEEDACK`].
pub async fn transfer(
    importer: &mut ImporterHandle,
    exporter: &ExporterHandle,
    cancel: &CancellationToken,
) -> Result<TransferSummary, HostError> {
    importer.claim()?;

    let (import_tx, mut import_rx) = record_channel(importer.record_buffer);
    let (acks_tx, acks_rx) = result_channel();
    let (export_tx, export_rx) = record_channel(exporter.record_buffer);
    let (results_tx, mut results_rx) = result_channel();

    let needack = importer.info.flags.contains(Flags::NEEDACK);
    let acks_tx = needack.then_some(acks_tx);
    let root = importer.info.root.clone();
    // rebased pathname -> importer pathname
    let origins = RefCell::new(HashMap::new());
    let origins = &origins;

    let forward = async move {
        let mut forwarded = 0usize;
        while let Some(mut record) = import_rx.recv().await {
            let original = std::mem::take(&mut record.pathname);
            record.pathname = rebase(&original, &root);
            if needack {
                origins.borrow_mut().insert(record.pathname.clone(), original);
            }
            if let Err(ChannelClosed(record)) = export_tx.send(record).await {
                tracing::warn!(pathname = %record.pathname, "Exporter stopped accepting records");
                break;
            }
            forwarded += 1;
        }
        drop(export_tx);
        // Let the importer run to completion even if the exporter quit.
        let discarded = import_rx.drain().await;
        (forwarded, discarded)
    };

    let collect = async move {
        let mut summary = TransferSummary::default();
        while let Some(result) = results_rx.recv().await {
            summary.tally(&result);
            if let Some(acks) = &acks_tx {
                let pathname = origins
                    .borrow_mut()
                    .remove(&result.pathname)
                    .unwrap_or_else(|| result.pathname.clone());
                let _ = acks.send(TransferResult {
                    pathname,
                    outcome: result.outcome,
                });
            }
        }
        summary
    };

    let (imported, exported, (forwarded, discarded), summary) = tokio::join!(
        importer.inner.import(cancel, import_tx, acks_rx),
        exporter.inner.export(cancel, export_rx, results_tx),
        forward,
        collect
    );

    imported.map_err(|e| HostError::connector(&importer.info.protocol, e))?;
    exported.map_err(|e| HostError::connector(&exporter.info.protocol, e))?;
    check_result_count(forwarded, &summary)?;

    tracing::info!(
        from = %importer.info.protocol,
        to = %exporter.info.protocol,
        records = summary.records,
        succeeded = summary.succeeded,
        failed = summary.failed.len(),
        discarded,
        "Transfer finished"
    );
    Ok(summary)
}
