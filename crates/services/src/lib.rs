pub mod broadcast;
pub mod rtms;

pub use broadcast::{
    BroadcastEvent, ChannelSink, ClusterBus, LocalClusterBus, RecentTranscripts, RedisClusterBus,
    SessionState, SubscriberId, TranscriptBroadcaster, TranscriptEvent, TranscriptSink,
};
pub use rtms::{ConnectionRegistry, RtmsError, SignatureProvider};
