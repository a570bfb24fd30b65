use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cluster::{BusError, ClusterBus};
use super::event::RelayEnvelope;

const RELAY_BUFFER: usize = 256;

/// First resubscribe delay; doubles per failed attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Cluster bus on a Redis pub/sub channel.
///
/// Publishing goes through a `ConnectionManager`; a background task holds the
/// subscription, resubscribes whenever it drops, and re-broadcasts decoded
/// envelopes in-process.
#[derive(Clone)]
pub struct RedisClusterBus {
    conn: ConnectionManager,
    channel: String,
    tx: broadcast::Sender<RelayEnvelope>,
    _listener: Arc<ListenerGuard>,
}

/// Stops the subscription task once the last bus clone is dropped.
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl RedisClusterBus {
    pub async fn connect(url: &str, channel: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;

        let first = subscribe_payloads(client.clone(), channel.to_string()).await?;
        info!(%channel, "Subscribed to cluster relay channel");

        let (tx, _) = broadcast::channel(RELAY_BUFFER);
        let channel_name = channel.to_string();
        let reconnect = move || subscribe_payloads(client.clone(), channel_name.clone());
        let listener = tokio::spawn(run_listener(
            first,
            reconnect,
            tx.clone(),
            channel.to_string(),
            BACKOFF_BASE,
        ));

        Ok(Self {
            conn,
            channel: channel.to_string(),
            tx,
            _listener: Arc::new(ListenerGuard(listener)),
        })
    }
}

/// Opens a fresh pub/sub connection and yields the raw message payloads.
async fn subscribe_payloads(
    client: redis::Client,
    channel: String,
) -> Result<BoxStream<'static, String>, BusError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(&channel).await?;
    let payloads = pubsub
        .into_on_message()
        .filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(error = %e, "Unreadable relay payload");
                    None
                }
            }
        })
        .boxed();
    Ok(payloads)
}

/// Drains `payloads` into `tx`, resubscribing with exponential backoff each
/// time the stream ends. Runs until aborted.
async fn run_listener<F, Fut>(
    mut payloads: BoxStream<'static, String>,
    mut reconnect: F,
    tx: broadcast::Sender<RelayEnvelope>,
    channel: String,
    backoff_base: Duration,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<BoxStream<'static, String>, BusError>>,
{
    loop {
        while let Some(payload) = payloads.next().await {
            match serde_json::from_str::<RelayEnvelope>(&payload) {
                Ok(envelope) => {
                    // Fails only when no broadcaster is listening yet.
                    let _ = tx.send(envelope);
                }
                Err(e) => warn!(error = %e, "Dropping undecodable relay envelope"),
            }
        }
        warn!(%channel, "Cluster relay subscription ended; resubscribing");

        let mut delay = backoff_base;
        payloads = loop {
            tokio::time::sleep(delay).await;
            match reconnect().await {
                Ok(stream) => {
                    info!(%channel, "Resubscribed to cluster relay channel");
                    break stream;
                }
                Err(e) => {
                    warn!(%channel, error = %e, retry_in = ?delay, "Cluster relay resubscribe failed");
                    delay = (delay * 2).min(BACKOFF_MAX);
                }
            }
        };
    }
}

#[async_trait]
impl ClusterBus for RedisClusterBus {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        debug!(receivers, "Relay envelope published");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.tx.subscribe()
    }
}
