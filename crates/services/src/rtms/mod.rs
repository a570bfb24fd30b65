//! Client side of the real-time media streaming (RTMS) protocol.
//!
//! Each meeting runs two sockets: a signaling channel that authenticates and
//! discovers the media endpoint, and a media channel that carries transcript
//! frames. Both are driven by pure state machines (`SignalingSession`,
//! `MediaSession`) wrapped in a tokio task that owns the socket.

pub mod channel;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod signaling;
pub mod signature;

pub use channel::{ChannelHandle, ReadyAckForwarder};
pub use endpoint::resolve_url;
pub use error::{CodecError, RtmsError, SignatureError};
pub use media::{MediaAction, MediaHandle, MediaSession, MediaState};
pub use protocol::{OutboundMessage, RtmsMessage};
pub use registry::ConnectionRegistry;
pub use signaling::{SignalingAction, SignalingHandle, SignalingSession, SignalingState};
pub use signature::{Identity, SignatureProvider};
