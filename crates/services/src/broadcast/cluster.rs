use async_trait::async_trait;
use tokio::sync::broadcast;

use super::event::RelayEnvelope;

const LOCAL_BUS_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pub/sub channel shared by every service instance.
///
/// Every instance receives every envelope, its own included.
#[async_trait]
pub trait ClusterBus: Send + Sync {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), BusError>;

    fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope>;
}

/// In-process bus. Broadcasters sharing one instance behave like separate
/// service instances on a real bus.
#[derive(Debug, Clone)]
pub struct LocalClusterBus {
    tx: broadcast::Sender<RelayEnvelope>,
}

impl LocalClusterBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOCAL_BUS_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalClusterBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterBus for LocalClusterBus {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), BusError> {
        // Fails only when no instance is subscribed.
        let _ = self.tx.send(envelope.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.tx.subscribe()
    }
}
