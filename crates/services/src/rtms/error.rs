use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing secret is not configured")]
    MissingSecret,
    #[error("Signing key rejected: {0}")]
    InvalidKey(String),
}

/// A single inbound frame that could not be turned into a protocol message.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("Empty payload")]
    Empty,
    #[error("Missing or invalid msg_type")]
    MissingType,
}

#[derive(Debug, Error)]
pub enum RtmsError {
    #[error("No usable signaling URL for meeting {meeting_uuid}")]
    NoSignalingUrl { meeting_uuid: String },
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Channel already closed")]
    ChannelClosed,
}
