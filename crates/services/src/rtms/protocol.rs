use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use super::endpoint::resolve_url;
use super::error::CodecError;
use crate::broadcast::TranscriptEvent;

/// Numeric `msg_type` tags. Values are fixed by the remote service.
pub mod msg_type {
    pub const SIGNALING_HAND_SHAKE_REQ: u32 = 1;
    pub const SIGNALING_HAND_SHAKE_RESP: u32 = 2;
    pub const DATA_HAND_SHAKE_REQ: u32 = 3;
    pub const DATA_HAND_SHAKE_RESP: u32 = 4;
    pub const EVENT_SUBSCRIPTION: u32 = 5;
    pub const EVENT_UPDATE: u32 = 6;
    pub const CLIENT_READY_ACK: u32 = 7;
    pub const STREAM_STATE_UPDATE: u32 = 8;
    pub const SESSION_STATE_UPDATE: u32 = 9;
    pub const KEEP_ALIVE_REQ: u32 = 12;
    pub const KEEP_ALIVE_RESP: u32 = 13;
    pub const MEDIA_DATA_AUDIO: u32 = 14;
    pub const MEDIA_DATA_VIDEO: u32 = 15;
    pub const MEDIA_DATA_SHARE: u32 = 16;
    pub const MEDIA_DATA_TRANSCRIPT: u32 = 17;
    pub const MEDIA_DATA_CHAT: u32 = 18;
}

/// Media type selector bit for transcript text. The only type this client requests.
pub const MEDIA_TYPE_TRANSCRIPT: u32 = 8;

pub const STATUS_OK: i64 = 0;

pub const DEFAULT_PROTOCOL_VERSION: u32 = 1;

// ---- Outbound ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalingHandshakeRequest {
    pub msg_type: u32,
    pub protocol_version: u32,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub sequence: u32,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataHandshakeRequest {
    pub msg_type: u32,
    pub protocol_version: u32,
    pub meeting_uuid: String,
    pub rtms_stream_id: String,
    pub signature: String,
    pub media_type: u32,
    pub payload_encryption: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeepAliveResponse {
    pub msg_type: u32,
    /// Echoed exactly as received.
    pub timestamp: Number,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientReadyAck {
    pub msg_type: u32,
    pub rtms_stream_id: String,
}

/// Everything this client ever writes to either socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    SignalingHandshake(SignalingHandshakeRequest),
    DataHandshake(DataHandshakeRequest),
    KeepAliveResponse(KeepAliveResponse),
    ClientReadyAck(ClientReadyAck),
}

impl OutboundMessage {
    pub fn signaling_handshake(
        protocol_version: u32,
        meeting_uuid: &str,
        stream_id: &str,
        sequence: u32,
        signature: String,
    ) -> Self {
        Self::SignalingHandshake(SignalingHandshakeRequest {
            msg_type: msg_type::SIGNALING_HAND_SHAKE_REQ,
            protocol_version,
            meeting_uuid: meeting_uuid.to_string(),
            rtms_stream_id: stream_id.to_string(),
            sequence,
            signature,
        })
    }

    pub fn data_handshake(
        protocol_version: u32,
        meeting_uuid: &str,
        stream_id: &str,
        signature: String,
    ) -> Self {
        Self::DataHandshake(DataHandshakeRequest {
            msg_type: msg_type::DATA_HAND_SHAKE_REQ,
            protocol_version,
            meeting_uuid: meeting_uuid.to_string(),
            rtms_stream_id: stream_id.to_string(),
            signature,
            media_type: MEDIA_TYPE_TRANSCRIPT,
            payload_encryption: false,
        })
    }

    pub fn keep_alive_response(timestamp: Number) -> Self {
        Self::KeepAliveResponse(KeepAliveResponse {
            msg_type: msg_type::KEEP_ALIVE_RESP,
            timestamp,
        })
    }

    pub fn client_ready_ack(stream_id: &str) -> Self {
        Self::ClientReadyAck(ClientReadyAck {
            msg_type: msg_type::CLIENT_READY_ACK,
            rtms_stream_id: stream_id.to_string(),
        })
    }

    pub fn msg_type(&self) -> u32 {
        match self {
            Self::SignalingHandshake(m) => m.msg_type,
            Self::DataHandshake(m) => m.msg_type,
            Self::KeepAliveResponse(m) => m.msg_type,
            Self::ClientReadyAck(m) => m.msg_type,
        }
    }
}

// ---- Inbound -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandshakeResponse {
    pub status_code: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub media_server: Option<MediaServer>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaServer {
    #[serde(default)]
    pub server_urls: Value,
}

impl HandshakeResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// Media endpoint advertised by a signaling handshake response, if any.
    pub fn media_url(&self) -> Option<String> {
        self.media_server
            .as_ref()
            .and_then(|server| resolve_url(&server.server_urls))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub state: Option<i64>,
    #[serde(default)]
    pub reason: Option<i64>,
    #[serde(default)]
    pub stop_reason: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct KeepAliveRequest {
    timestamp: Number,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptFrame {
    pub content: TranscriptContent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptContent {
    #[serde(deserialize_with = "id_as_string")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub data: String,
    pub timestamp: i64,
}

impl TranscriptFrame {
    pub fn into_event(self, meeting_uuid: &str) -> TranscriptEvent {
        let content = self.content;
        TranscriptEvent {
            meeting_uuid: meeting_uuid.to_string(),
            speaker_id: content.user_id,
            speaker_name: content.user_name.filter(|name| !name.is_empty()),
            text: content.data,
            timestamp: content.timestamp,
        }
    }
}

/// Speaker ids arrive as either numbers or strings depending on the service version.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// A decoded inbound message from either socket.
#[derive(Debug, Clone, PartialEq)]
pub enum RtmsMessage {
    SignalingHandshakeResponse(HandshakeResponse),
    DataHandshakeResponse(HandshakeResponse),
    KeepAliveRequest { timestamp: Number },
    EventUpdate(Value),
    StreamStateUpdate(StateUpdate),
    SessionStateUpdate(StateUpdate),
    Transcript(TranscriptFrame),
    /// Media types this client never subscribes to, or tags it does not know.
    Unknown { msg_type: u32 },
}

impl RtmsMessage {
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, CodecError> {
        let tag = value
            .get("msg_type")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .ok_or(CodecError::MissingType)?;

        let message = match tag {
            msg_type::SIGNALING_HAND_SHAKE_RESP => {
                Self::SignalingHandshakeResponse(serde_json::from_value(value)?)
            }
            msg_type::DATA_HAND_SHAKE_RESP => {
                Self::DataHandshakeResponse(serde_json::from_value(value)?)
            }
            msg_type::KEEP_ALIVE_REQ => {
                let request: KeepAliveRequest = serde_json::from_value(value)?;
                Self::KeepAliveRequest {
                    timestamp: request.timestamp,
                }
            }
            msg_type::EVENT_UPDATE => Self::EventUpdate(value),
            msg_type::STREAM_STATE_UPDATE => Self::StreamStateUpdate(serde_json::from_value(value)?),
            msg_type::SESSION_STATE_UPDATE => {
                Self::SessionStateUpdate(serde_json::from_value(value)?)
            }
            msg_type::MEDIA_DATA_TRANSCRIPT => Self::Transcript(serde_json::from_value(value)?),
            other => Self::Unknown { msg_type: other },
        };
        Ok(message)
    }

    pub fn msg_type(&self) -> u32 {
        match self {
            Self::SignalingHandshakeResponse(_) => msg_type::SIGNALING_HAND_SHAKE_RESP,
            Self::DataHandshakeResponse(_) => msg_type::DATA_HAND_SHAKE_RESP,
            Self::KeepAliveRequest { .. } => msg_type::KEEP_ALIVE_REQ,
            Self::EventUpdate(_) => msg_type::EVENT_UPDATE,
            Self::StreamStateUpdate(_) => msg_type::STREAM_STATE_UPDATE,
            Self::SessionStateUpdate(_) => msg_type::SESSION_STATE_UPDATE,
            Self::Transcript(_) => msg_type::MEDIA_DATA_TRANSCRIPT,
            Self::Unknown { msg_type } => *msg_type,
        }
    }
}
