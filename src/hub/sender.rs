//! Delivery capability handed to the hub by the transport layer

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::types::Record;

/// Largest per-connection queue we will allocate. Far below the point where
/// `mpsc::channel` refuses the capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Why a record could not be delivered to one connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Deliver a record to one specific connection.
///
/// The hub never looks behind this trait; transports decide what "send" means.
#[async_trait]
pub trait RecordSender: Send + Sync {
    async fn send(&self, record: Record) -> Result<(), SendError>;
}

/// Sender backed by a bounded per-connection queue.
///
/// The transport owns the receiving half and drains it into the socket. Once
/// that writer goes away every send fails with [`SendError::Closed`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Record>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// Create a sender together with the queue the writer task should drain.
    /// `capacity` is clamped to `1..=MAX_QUEUE_CAPACITY`.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl RecordSender for ChannelSender {
    async fn send(&self, record: Record) -> Result<(), SendError> {
        self.tx.send(record).await.map_err(|_| SendError::Closed)
    }
}
