//! Downstream delivery of extracted records.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SinkError;

/// One unit of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Blob the bytes came from.
    pub blob: String,
    /// Blob offset of the first non-framing byte in `data`.
    pub offset: u64,
    pub data: Bytes,
}

/// Receives records in blob order.
///
/// An error stops delivery for the current chunk; bytes already delivered are
/// still committed.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn emit(&mut self, record: Record) -> Result<(), SinkError>;
}

/// Forwards records over a bounded channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn emit(&mut self, record: Record) -> Result<(), SinkError> {
        self.tx.send(record).await.map_err(|_| SinkError::SinkClosed)
    }
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<Record>,
}

#[async_trait]
impl RecordSink for VecSink {
    async fn emit(&mut self, record: Record) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}
