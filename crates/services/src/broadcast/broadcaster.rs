use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cluster::ClusterBus;
use super::event::{
    BroadcastEvent, RecentTranscripts, RelayEnvelope, SessionNotice, SessionState, TranscriptEvent,
};
use super::sink::TranscriptSink;

pub const RECENCY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Fans transcript events out to local subscribers and to peer instances.
///
/// Keeps the last [`RECENCY_CAPACITY`] locally published events, newest
/// first, for polling clients. Relayed events reach local subscribers but
/// are not buffered.
///
/// Outbound envelopes go through a queue drained by a publisher task, so
/// `publish` never waits on the bus.
pub struct TranscriptBroadcaster {
    instance_id: String,
    recent: Mutex<VecDeque<TranscriptEvent>>,
    subscribers: DashMap<SubscriberId, Arc<dyn TranscriptSink>>,
    next_subscriber: AtomicU64,
    bus: Arc<dyn ClusterBus>,
    outbound: mpsc::UnboundedSender<RelayEnvelope>,
    relay_task: Mutex<Option<JoinHandle<()>>>,
}

impl TranscriptBroadcaster {
    /// Must be called inside a tokio runtime.
    pub fn new(instance_id: impl Into<String>, bus: Arc<dyn ClusterBus>) -> Arc<Self> {
        let instance_id = instance_id.into();
        let (outbound, queue) = mpsc::unbounded_channel();
        tokio::spawn(drain_outbound(Arc::clone(&bus), queue, instance_id.clone()));

        Arc::new(Self {
            instance_id,
            recent: Mutex::new(VecDeque::with_capacity(RECENCY_CAPACITY)),
            subscribers: DashMap::new(),
            next_subscriber: AtomicU64::new(1),
            bus,
            outbound,
            relay_task: Mutex::new(None),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Starts consuming the cluster bus. The task holds only a weak
    /// reference and stops with the broadcaster.
    pub fn start_relay(self: &Arc<Self>) {
        let mut rx = self.bus.subscribe();
        let weak = Arc::downgrade(self);
        let instance_id = self.instance_id.clone();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let Some(broadcaster) = weak.upgrade() else { break };
                        broadcaster.on_relay(envelope).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%instance_id, skipped, "Relay receiver lagged; envelopes dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%instance_id, "Relay task stopped");
        });

        if let Some(previous) = self.relay_task.lock().replace(task) {
            previous.abort();
        }
        info!(instance_id = %self.instance_id, "Cluster relay started");
    }

    /// Records a locally produced event, delivers it to local subscribers
    /// and queues it for peer instances.
    pub async fn publish(&self, event: TranscriptEvent) {
        {
            let mut recent = self.recent.lock();
            recent.push_front(event.clone());
            recent.truncate(RECENCY_CAPACITY);
        }

        let event = BroadcastEvent::Transcript(event);
        self.deliver_local(&event).await;
        self.relay(&event);
    }

    pub async fn announce_session(&self, meeting_uuid: &str, state: SessionState) {
        let event = BroadcastEvent::Session(SessionNotice {
            meeting_uuid: meeting_uuid.to_string(),
            state,
        });
        self.deliver_local(&event).await;
        self.relay(&event);
    }

    /// Handles an envelope from the bus. Envelopes this instance published
    /// are ignored, so nothing is ever re-published.
    pub async fn on_relay(&self, envelope: RelayEnvelope) {
        if envelope.origin_instance_id == self.instance_id {
            return;
        }

        let origin = envelope.origin_instance_id.clone();
        match envelope.into_event() {
            Ok(event) => {
                let delivered = self.deliver_local(&event).await;
                debug!(%origin, delivered, "Relayed event delivered");
            }
            Err(e) => warn!(%origin, error = %e, "Dropping malformed relay payload"),
        }
    }

    /// Registers a sink after confirming it with a `connected` message.
    /// Returns `None` if that first delivery fails.
    pub async fn subscribe(&self, sink: Arc<dyn TranscriptSink>) -> Option<SubscriberId> {
        let connected = BroadcastEvent::Connected {
            instance_id: self.instance_id.clone(),
        };
        let text = match connected.to_json() {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                warn!(error = %e, "Could not encode connection confirmation");
                return None;
            }
        };

        if let Err(e) = sink.deliver(text).await {
            debug!(error = %e, "Subscriber failed before registration");
            return None;
        }

        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.subscribers.insert(id, sink);
        debug!(subscriber = id.0, total = self.subscribers.len(), "Subscriber added");
        Some(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id.0, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn recent(&self) -> Vec<TranscriptEvent> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn recent_since(&self, since: i64) -> RecentTranscripts {
        let events = self
            .recent
            .lock()
            .iter()
            .filter(|event| event.timestamp > since)
            .cloned()
            .collect();
        RecentTranscripts {
            events,
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Delivers to a snapshot of the subscriber set and drops every sink
    /// that fails or panics. Returns the number of successful deliveries.
    async fn deliver_local(&self, event: &BroadcastEvent) -> usize {
        let text = match event.to_json() {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                warn!(error = %e, "Could not encode broadcast event");
                return 0;
            }
        };

        let sinks: Vec<(SubscriberId, Arc<dyn TranscriptSink>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        if sinks.is_empty() {
            return 0;
        }

        let deliveries = sinks.into_iter().map(|(id, sink)| {
            let text = Arc::clone(&text);
            async move {
                let outcome = AssertUnwindSafe(sink.deliver(text)).catch_unwind().await;
                (id, outcome)
            }
        });

        let mut delivered = 0;
        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    debug!(subscriber = id.0, error = %e, "Dropping failed subscriber");
                    self.subscribers.remove(&id);
                }
                Err(_) => {
                    warn!(subscriber = id.0, "Subscriber panicked during delivery; dropping");
                    self.subscribers.remove(&id);
                }
            }
        }
        delivered
    }

    fn relay(&self, event: &BroadcastEvent) {
        let Some(envelope) = RelayEnvelope::wrap(&self.instance_id, event) else {
            return;
        };
        if self.outbound.send(envelope).is_err() {
            warn!(instance_id = %self.instance_id, "Relay publisher stopped; envelope dropped");
        }
    }
}

/// Publishes queued envelopes in order. Ends once the broadcaster is dropped.
async fn drain_outbound(
    bus: Arc<dyn ClusterBus>,
    mut queue: mpsc::UnboundedReceiver<RelayEnvelope>,
    instance_id: String,
) {
    while let Some(envelope) = queue.recv().await {
        if let Err(e) = bus.publish(&envelope).await {
            warn!(%instance_id, error = %e, "Cluster relay publish failed");
        }
    }
    debug!(%instance_id, "Relay publisher stopped");
}

impl Drop for TranscriptBroadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.relay_task.get_mut().take() {
            task.abort();
        }
    }
}
