//! Transcript fan-out: recency buffer, local subscribers, and the relay bus
//! shared with other service instances.

mod broadcaster;
mod cluster;
mod event;
mod redis_bus;
mod sink;

pub use broadcaster::{RECENCY_CAPACITY, SubscriberId, TranscriptBroadcaster};
pub use cluster::{BusError, ClusterBus, LocalClusterBus};
pub use event::{
    BroadcastEvent, EventKind, RecentTranscripts, RelayEnvelope, SessionNotice, SessionState,
    TranscriptEvent,
};
pub use redis_bus::RedisClusterBus;
pub use sink::{ChannelSink, SinkError, TranscriptSink};
