use crate::channel::{record_channel, result_channel, RecordReceiver, ResultSender};
use crate::connector::{Exporter, Importer};
use crate::flags::Flags;
use crate::record::{FileInfo, MemorySource, Record, TransferResult};
use std::collections::BTreeMap;
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// A file the importer under test is expected to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedEntry {
    pub pathname: String,
    pub size: u64,
}

/// Expectations supplied by an importer implementation to run the shared contract suite.
#[derive(Debug, Clone)]
pub struct ImportContractExpectations {
    /// Entries in the exact order the importer must emit them.
    pub entries: Vec<ExpectedEntry>,
}

/// A record to feed the exporter under test.
#[derive(Debug, Clone)]
pub struct ExportItem {
    pub pathname: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ExportContractExpectations {
    pub items: Vec<ExportItem>,
    /// Whether every item is expected to succeed.
    pub all_succeed: bool,
}

/// Errors surfaced by the connector contract test harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("ping failed: {0}")]
    Ping(String),
    #[error("import failed: {0}")]
    Import(String),
    #[error("export failed: {0}")]
    Export(String),
    #[error("importer emitted a record for directory {pathname}")]
    DirectoryEmitted { pathname: String },
    #[error("importer emitted {actual:?}, expected {expected:?}")]
    UnexpectedRecords {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("record {pathname} declares size {declared} but expected {expected}")]
    SizeMismatch {
        pathname: String,
        declared: u64,
        expected: u64,
    },
    #[error("record {pathname} declares size {declared} but its content has {read} bytes")]
    ContentMismatch {
        pathname: String,
        declared: u64,
        read: u64,
    },
    #[error("failed to read content of {pathname}: {message}")]
    ContentUnreadable { pathname: String, message: String },
    #[error("importer without STREAM flag produced a different sequence on replay")]
    NotReplayable,
    #[error("exporter returned {received} results for {sent} records")]
    ResultCountMismatch { sent: usize, received: usize },
    #[error("exporter returned a result for unknown record {pathname}")]
    UnknownResult { pathname: String },
    #[error("item {pathname} failed: {error}")]
    ItemFailed { pathname: String, error: String },
    #[error("close failed: {0}")]
    Close(String),
}

/// Run the shared import contract against an importer.
///
/// Verifies emission order, metadata, content and end-of-sequence, acknowledges
/// records when the importer asks for it, replays non-STREAM importers, and
/// closes twice.
pub async fn run_import_contract<I: Importer + ?Sized>(
    importer: &I,
    expectations: &ImportContractExpectations,
) -> Result<(), ContractError> {
    let cancel = CancellationToken::new();
    importer
        .ping(&cancel)
        .await
        .map_err(|e| ContractError::Ping(e.to_string()))?;

    let first = import_once(importer, &cancel).await?;
    verify_entries(&first, expectations)?;

    if !importer.flags().contains(Flags::STREAM) {
        let second = import_once(importer, &cancel).await?;
        if second != first {
            return Err(ContractError::NotReplayable);
        }
    }

    close_twice(importer, &cancel).await
}

/// Run the shared export contract against an exporter.
///
/// Returns the results in arrival order so callers can inspect the
/// destination.
pub async fn run_export_contract<E: Exporter + ?Sized>(
    exporter: &E,
    expectations: &ExportContractExpectations,
) -> Result<Vec<TransferResult>, ContractError> {
    let cancel = CancellationToken::new();
    let (record_tx, record_rx) = record_channel(4);
    let (result_tx, mut result_rx) = result_channel();

    let feed = async move {
        for item in &expectations.items {
            let record = Record::new(
                item.pathname.clone(),
                "",
                FileInfo {
                    name: item
                        .pathname
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    size: item.content.len() as u64,
                    mode: 0o100_644,
                    mod_time: SystemTime::now(),
                    dev: 1,
                },
                Some(Box::new(MemorySource::new(item.content.clone()))),
            );
            if record_tx.send(record).await.is_err() {
                break;
            }
        }
    };

    let (exported, (), results) = tokio::join!(
        exporter.export(&cancel, record_rx, result_tx),
        feed,
        result_rx.collect()
    );
    exported.map_err(|e| ContractError::Export(e.to_string()))?;

    let sent = expectations.items.len();
    if results.len() != sent {
        return Err(ContractError::ResultCountMismatch {
            sent,
            received: results.len(),
        });
    }

    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    for item in &expectations.items {
        *pending.entry(item.pathname.as_str()).or_default() += 1;
    }
    for result in &results {
        match pending.get_mut(result.pathname.as_str()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                return Err(ContractError::UnknownResult {
                    pathname: result.pathname.clone(),
                })
            }
        }
        if expectations.all_succeed {
            if let Some(error) = result.error() {
                return Err(ContractError::ItemFailed {
                    pathname: result.pathname.clone(),
                    error: error.to_string(),
                });
            }
        }
    }

    close_twice(exporter, &cancel).await?;
    Ok(results)
}

async fn import_once<I: Importer + ?Sized>(
    importer: &I,
    cancel: &CancellationToken,
) -> Result<Vec<(String, FileInfo, u64)>, ContractError> {
    let (record_tx, record_rx) = record_channel(4);
    let (ack_tx, ack_rx) = result_channel();
    let ack_tx = importer.flags().contains(Flags::NEEDACK).then_some(ack_tx);

    let (imported, consumed) = tokio::join!(
        importer.import(cancel, record_tx, ack_rx),
        consume(record_rx, ack_tx)
    );
    imported.map_err(|e| ContractError::Import(e.to_string()))?;
    consumed
}

async fn consume(
    mut records: RecordReceiver,
    acks: Option<ResultSender>,
) -> Result<Vec<(String, FileInfo, u64)>, ContractError> {
    let mut seen = Vec::new();
    let mut failure = None;
    while let Some(mut record) = records.recv().await {
        if failure.is_some() {
            continue;
        }
        if record.file_info.is_dir() {
            failure = Some(ContractError::DirectoryEmitted {
                pathname: record.pathname.clone(),
            });
            continue;
        }

        let pathname = record.pathname.clone();
        let mut read = 0u64;
        match record.reader().await {
            Ok(Some(reader)) => {
                let mut buf = Vec::new();
                match reader.read_to_end(&mut buf).await {
                    Ok(n) => read = n as u64,
                    Err(e) => {
                        failure = Some(ContractError::ContentUnreadable {
                            pathname: pathname.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                failure = Some(ContractError::ContentUnreadable {
                    pathname: pathname.clone(),
                    message: e.to_string(),
                });
            }
        }

        seen.push((pathname, record.file_info.clone(), read));
        if let Some(acks) = &acks {
            // The importer may already have stopped listening; it is not our failure.
            let _ = acks.send(record.ok());
        }
    }
    drop(acks);

    match failure {
        Some(err) => Err(err),
        None => Ok(seen),
    }
}

fn verify_entries(
    seen: &[(String, FileInfo, u64)],
    expectations: &ImportContractExpectations,
) -> Result<(), ContractError> {
    let actual: Vec<String> = seen.iter().map(|(p, _, _)| p.clone()).collect();
    let expected: Vec<String> = expectations
        .entries
        .iter()
        .map(|e| e.pathname.clone())
        .collect();
    if actual != expected {
        return Err(ContractError::UnexpectedRecords { expected, actual });
    }

    for ((pathname, info, read), entry) in seen.iter().zip(&expectations.entries) {
        if info.size != entry.size {
            return Err(ContractError::SizeMismatch {
                pathname: pathname.clone(),
                declared: info.size,
                expected: entry.size,
            });
        }
        if *read != info.size {
            return Err(ContractError::ContentMismatch {
                pathname: pathname.clone(),
                declared: info.size,
                read: *read,
            });
        }
    }
    Ok(())
}

async fn close_twice<C: crate::connector::Connector + ?Sized>(
    connector: &C,
    cancel: &CancellationToken,
) -> Result<(), ContractError> {
    for _ in 0..2 {
        connector
            .close(cancel)
            .await
            .map_err(|e| ContractError::Close(e.to_string()))?;
    }
    Ok(())
}
