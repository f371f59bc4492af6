//! Record and result channels.
//!
//! Senders are single-owner: they cannot be cloned, and the channel closes
//! when the sender is dropped or [`close`](RecordSender::close)d. An importer
//! or exporter that takes its sender by value therefore closes it exactly once
//! on every return path.
//!
//! Record channels are bounded. Result channels are unbounded so that a
//! consumer acknowledging records never blocks a producer that is still
//! emitting them.

use crate::record::{Record, TransferResult};
use std::fmt;
use tokio::sync::mpsc;

pub const DEFAULT_RECORD_BUFFER: usize = 64;

/// The receiving side went away before the item could be delivered.
///
/// Carries the undelivered item back to the caller.
#[derive(Debug)]
pub struct ChannelClosed<T>(pub T);

impl<T> fmt::Display for ChannelClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("channel closed by receiver")
    }
}

impl<T: fmt::Debug> std::error::Error for ChannelClosed<T> {}

pub fn record_channel(capacity: usize) -> (RecordSender, RecordReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RecordSender { tx }, RecordReceiver { rx })
}

pub fn result_channel() -> (ResultSender, ResultReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResultSender { tx }, ResultReceiver { rx })
}

#[derive(Debug)]
pub struct RecordSender {
    tx: mpsc::Sender<Record>,
}

impl RecordSender {
    /// Waits for buffer space, then delivers the record.
    pub async fn send(&self, record: Record) -> Result<(), ChannelClosed<Record>> {
        self.tx.send(record).await.map_err(|e| ChannelClosed(e.0))
    }

    /// Blocking variant for producers running on a blocking thread.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_send(&self, record: Record) -> Result<(), ChannelClosed<Record>> {
        self.tx.blocking_send(record).map_err(|e| ChannelClosed(e.0))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Signals end of sequence.
    pub fn close(self) {}
}

#[derive(Debug)]
pub struct RecordReceiver {
    rx: mpsc::Receiver<Record>,
}

impl RecordReceiver {
    /// Next record, or `None` once the sender closed and the buffer is empty.
    pub async fn recv(&mut self) -> Option<Record> {
        self.rx.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for consumers outside async code.
    pub fn blocking_recv(&mut self) -> Option<Record> {
        self.rx.blocking_recv()
    }

    /// Reads and discards records until the sender closes.
    ///
    /// Discarded records are closed without their content being opened.
    pub async fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.rx.recv().await.is_some() {
            count += 1;
        }
        count
    }
}

#[derive(Debug)]
pub struct ResultSender {
    tx: mpsc::UnboundedSender<TransferResult>,
}

impl ResultSender {
    pub fn send(&self, result: TransferResult) -> Result<(), ChannelClosed<TransferResult>> {
        self.tx.send(result).map_err(|e| ChannelClosed(e.0))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Signals end of sequence.
    pub fn close(self) {}
}

#[derive(Debug)]
pub struct ResultReceiver {
    rx: mpsc::UnboundedReceiver<TransferResult>,
}

impl ResultReceiver {
    pub async fn recv(&mut self) -> Option<TransferResult> {
        self.rx.recv().await
    }

    /// Reads results until the sender closes, returning them in arrival order.
    pub async fn collect(&mut self) -> Vec<TransferResult> {
        let mut results = Vec::new();
        while let Some(result) = self.rx.recv().await {
            results.push(result);
        }
        results
    }

    /// Reads and discards results until the sender closes.
    pub async fn drain(&mut self) -> usize {
        self.collect().await.len()
    }
}
