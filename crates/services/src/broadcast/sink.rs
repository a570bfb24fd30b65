use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("subscriber is gone")]
    Closed,
    #[error("subscriber is not keeping up")]
    Full,
    #[error("{0}")]
    Other(String),
}

/// Destination for serialized broadcast events. A failed delivery removes
/// the subscriber.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn deliver(&self, text: Arc<str>) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel, drained by a WebSocket writer task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TranscriptSink for ChannelSink {
    async fn deliver(&self, text: Arc<str>) -> Result<(), SinkError> {
        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
